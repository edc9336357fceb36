//! Deterministic MAC/IP assignment per site index.
//!
//! Pure functions over `(scenario, index)` so naming and addressing are
//! unit-testable without touching the network stack. MAC prefixes are
//! deterministic; suffixes are random. Collisions are statistically
//! negligible but not impossible, and no retry is performed; a re-run
//! of the session re-rolls every suffix.

use labnet_common::{LabError, LabResult};
use rand::Rng;

/// Linux interface/namespace name length limit.
const MAX_NAME_LEN: usize = 15;

/// Generates a locally-administered MAC for a site.
///
/// Format `02:ii:ii:rr:rr:rr`: the `02` prefix marks the address as
/// locally administered, the site index is encoded twice, and the three
/// trailing octets are random.
pub fn site_mac(index: usize) -> String {
    let mut rng = rand::thread_rng();
    let idx = (index & 0xff) as u8;
    format!(
        "02:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        idx,
        idx,
        rng.gen::<u8>(),
        rng.gen::<u8>(),
        rng.gen::<u8>()
    )
}

/// WAN router underlay address on the inter-router link: `172.16.0.<i>/24`.
pub fn wan_underlay_addr(index: usize) -> String {
    format!("172.16.0.{index}/24")
}

/// Bare underlay IP (no prefix), used as the GRETAP local/remote endpoint.
pub fn wan_underlay_ip(index: usize) -> String {
    format!("172.16.0.{index}")
}

/// WAN host address on the subnet bridged across the tunnel:
/// `192.168.100.<i>/24`. Both hosts share this subnet; the routers
/// bridge it over the (optionally MACsec-protected) GRETAP link.
pub fn wan_overlay_addr(index: usize) -> String {
    format!("192.168.100.{index}/24")
}

/// The shared WAN overlay subnet in CIDR form.
pub fn wan_overlay_subnet() -> String {
    "192.168.100.0/24".to_string()
}

/// Bare WAN overlay IP of host `i`, used as a benchmark target.
pub fn wan_overlay_ip(index: usize) -> String {
    format!("192.168.100.{index}")
}

/// LAN peer address bound to the secure-channel interface: `10.0.0.<i>/16`.
pub fn lan_peer_addr(index: usize) -> String {
    format!("10.0.0.{index}/16")
}

/// LAN shared subnet in CIDR form.
pub fn lan_subnet_cidr() -> String {
    "10.0.0.0/16".to_string()
}

/// Bare LAN IP of peer `i`, used as a benchmark target.
pub fn lan_peer_ip(index: usize) -> String {
    format!("10.0.0.{index}")
}

/// Validates a namespace or interface name before it reaches the shell.
///
/// Names must be non-empty, at most 15 characters, and limited to
/// lowercase alphanumerics and underscores.
pub fn validate_name(name: &str) -> LabResult<()> {
    if name.is_empty() {
        return Err(LabError::invalid_name(name, "empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(LabError::invalid_name(
            name,
            format!("longer than {MAX_NAME_LEN} characters"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(LabError::invalid_name(
            name,
            "only lowercase alphanumerics and '_' are allowed",
        ));
    }
    Ok(())
}
