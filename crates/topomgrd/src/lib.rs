//! Topology Manager Daemon - network lab topology lifecycle manager
//!
//! topomgrd builds and tears down isolated Linux network topologies for
//! MACsec experimentation, handling:
//! - Network namespace provisioning per site or peer
//! - Virtual link fabric (veth pairs, GRETAP tunnels, bridges)
//! - Security overlays: static-key MACsec (WAN) and MKA-negotiated
//!   MACsec via wpa_supplicant (LAN)
//! - Per-interface packet captures with log rotation
//! - Reverse-order teardown with an aggregated error report

pub mod addr;
pub mod capture;
pub mod commands;
pub mod fabric;
pub mod netns;
pub mod orch;
pub mod security;
pub mod types;

pub use orch::{LabConfig, Orchestrator, Phase, TeardownReport};
pub use types::{ScenarioKind, Site};
