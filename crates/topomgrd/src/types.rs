//! Topology type definitions and constants

use std::collections::HashMap;
use std::fmt;

/// MTU for data-path interfaces when no security overlay is active.
///
/// 1500 minus the GRETAP encapsulation overhead.
pub const MTU_PLAIN: u32 = 1462;

/// MTU for data-path interfaces when the MACsec overlay is active.
///
/// [`MTU_PLAIN`] minus the MACsec header and ICV.
pub const MTU_MACSEC: u32 = 1430;

/// Name of the kernel-created secure-channel interface.
pub const SECURE_CHANNEL_IFACE: &str = "macsec0";

/// Bridge group-forward mask bit that lets 802.1X PAE group-address
/// frames (EAPOL, carrying MKA) traverse a bridge.
pub const EAPOL_FWD_MASK: u16 = 0x8;

/// Capture filter matching the two 802.1X-family EtherTypes
/// (EAPOL 0x888e, MACsec 0x88e5).
pub const AUTH_PROTO_FILTER: &str = "ether proto 0x888e or ether proto 0x88e5";

/// Which lab scenario a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Two sites, routers, GRE tunnel, optional static-key MACsec, bridges.
    Wan,
    /// N peer namespaces on a shared bridge, MACsec negotiated via MKA.
    Lan,
}

impl ScenarioKind {
    /// Returns the scenario name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Wan => "wan",
            ScenarioKind::Lan => "lan",
        }
    }
}

/// One participating network segment.
///
/// Two per WAN session, one per peer namespace in LAN mode. Owned
/// exclusively by the orchestrator for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct Site {
    /// 1-based site index.
    pub index: usize,
    /// Host-side namespace name.
    pub host_ns: String,
    /// Router namespace name (same as `host_ns` in LAN mode).
    pub router_ns: String,
    /// The site's inner subnet in CIDR form.
    pub subnet_cidr: String,
    /// MAC addresses assigned by this session, keyed by interface name.
    pub mac_addresses: HashMap<String, String>,
    /// Current data-path MTU.
    pub mtu: u32,
}

impl Site {
    pub fn new(index: usize, host_ns: String, router_ns: String, subnet_cidr: String) -> Self {
        Self {
            index,
            host_ns,
            router_ns,
            subnet_cidr,
            mac_addresses: HashMap::new(),
            mtu: MTU_PLAIN,
        }
    }
}

/// Kind of virtual wire or overlay device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Veth,
    Gretap,
    Macsec,
    Bridge,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkKind::Veth => "veth",
            LinkKind::Gretap => "gretap",
            LinkKind::Macsec => "macsec",
            LinkKind::Bridge => "bridge",
        };
        write!(f, "{s}")
    }
}

/// One virtual wire or overlay device created by the fabric builder.
///
/// Referenced, never owned, by the security and capture components.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub kind: LinkKind,
    /// Primary endpoint interface name (the one deleted at teardown).
    pub endpoint_a: String,
    /// Peer endpoint name for veth pairs, parent device for overlays.
    pub endpoint_b: Option<String>,
    /// Namespace the primary endpoint lives in (`None` = root namespace).
    pub owning_ns: Option<String>,
}

impl LinkSpec {
    pub fn new(kind: LinkKind, endpoint_a: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint_a: endpoint_a.into(),
            endpoint_b: None,
            owning_ns: None,
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.endpoint_b = Some(peer.into());
        self
    }

    pub fn in_namespace(mut self, ns: impl Into<String>) -> Self {
        self.owning_ns = Some(ns.into());
        self
    }
}

/// One directional key pair for a static MACsec session.
///
/// For paired sites i and j the symmetric invariant must hold:
/// `tx_key(i) == rx_key(j)` and `rx_key(i) == tx_key(j)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAssociation {
    /// Hex-encoded 128-bit transmit key.
    pub tx_key: String,
    /// Hex-encoded 128-bit receive key (the peer's transmit key).
    pub rx_key: String,
    /// MAC address of the peer's tunnel endpoint.
    pub remote_mac: String,
    /// MACsec port number.
    pub port: u16,
    /// Initial packet number for the transmit SA.
    pub packet_number: u64,
}

/// Explicit site pairing, replacing index arithmetic for "the other site".
#[derive(Debug, Clone)]
pub struct PairingTable {
    peers: HashMap<usize, usize>,
}

impl PairingTable {
    /// The classic two-site pairing: 1 <-> 2.
    pub fn pair_of_two() -> Self {
        let mut peers = HashMap::new();
        peers.insert(1, 2);
        peers.insert(2, 1);
        Self { peers }
    }

    /// A ring over sites 1..=n (each site pairs with its successor).
    pub fn ring(n: usize) -> Self {
        let mut peers = HashMap::new();
        for i in 1..=n {
            peers.insert(i, i % n + 1);
        }
        Self { peers }
    }

    /// The peer of site `index`, if it has one.
    pub fn peer_of(&self, index: usize) -> Option<usize> {
        self.peers.get(&index).copied()
    }

    /// True when every pairing is mutual: `peer_of(peer_of(i)) == i`.
    ///
    /// Static key exchange needs this; a ring of more than two sites is
    /// a valid adjacency but not a mutual pairing.
    pub fn is_symmetric(&self) -> bool {
        self.peers.iter().all(|(&a, &b)| self.peers.get(&b) == Some(&a))
    }

    /// All (site, peer) entries, sorted by site index.
    pub fn entries(&self) -> Vec<(usize, usize)> {
        let mut v: Vec<_> = self.peers.iter().map(|(&a, &b)| (a, b)).collect();
        v.sort();
        v
    }
}

/// Log-rotation policy rendered into a logrotate config stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// The file the policy rotates.
    pub target_path: String,
    /// Do not error when the target is missing.
    pub missing_ok: bool,
    /// Number of rotated files to keep.
    pub keep_count: u32,
}

impl RotationPolicy {
    pub fn new(target_path: impl Into<String>) -> Self {
        Self {
            target_path: target_path.into(),
            missing_ok: true,
            keep_count: 10,
        }
    }

    /// Renders the logrotate stanza. Byte-stable so re-renders of the
    /// same policy compare equal.
    pub fn render(&self) -> String {
        let mut out = format!("{} {{\n", self.target_path);
        if self.missing_ok {
            out.push_str("    missingok\n");
        }
        out.push_str(&format!("    rotate {}\n", self.keep_count));
        out.push_str("}\n");
        out
    }
}
