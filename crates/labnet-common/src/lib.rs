//! Common infrastructure for labnet topology daemons.
//!
//! This crate provides shared functionality for the topology lifecycle
//! orchestrator and its components:
//!
//! - [`shell`]: Safe shell command execution with quoting, sudo detection,
//!   mock mode for tests, and background process spawning
//! - [`error`]: Error types for topology operations
//! - [`poll`]: Bounded readiness polling on observable probe commands
//!
//! # Architecture
//!
//! Topology components follow this pattern:
//!
//! 1. Build a shell command string with [`shell::shellquote`]d operands
//! 2. Execute it through a [`shell::Runner`], which handles privilege
//!    elevation and, in tests, captures the command instead
//! 3. Wait for externally-observable readiness with [`poll::poll_command`]
//!    rather than fixed sleeps

pub mod error;
pub mod poll;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{LabError, LabResult};
pub use poll::{poll_command, PollOutcome};
pub use shell::{shellquote, ExecResult, Runner};
