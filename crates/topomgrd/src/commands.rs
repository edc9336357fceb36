//! Shell command builders for topology operations
//!
//! Pure string builders; every operand passes through `shellquote`.
//! Execution and privilege handling live in `labnet_common::shell`.

use std::path::Path;

use labnet_common::shell::{
    self, GREP_CMD, IPERF_CMD, IP_CMD, KILL_CMD, LOGROTATE_CMD, TCPDUMP_CMD, WPA_SUPPLICANT_CMD,
    XTERM_CMD,
};

/// Prefixes `cmd` with a namespace-exec wrapper when `ns` is given.
pub fn in_ns(ns: Option<&str>, cmd: String) -> String {
    match ns {
        Some(ns) => format!("{} netns exec {} {}", IP_CMD, shell::shellquote(ns), cmd),
        None => cmd,
    }
}

fn quote_path(path: &Path) -> String {
    shell::shellquote(&path.display().to_string())
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

pub fn build_netns_add_cmd(name: &str) -> String {
    format!("{} netns add {}", IP_CMD, shell::shellquote(name))
}

pub fn build_netns_del_cmd(name: &str) -> String {
    format!("{} netns del {}", IP_CMD, shell::shellquote(name))
}

pub fn build_loopback_up_cmd(ns: &str) -> String {
    in_ns(Some(ns), format!("{} link set lo up", IP_CMD))
}

pub fn build_move_link_cmd(iface: &str, ns: &str) -> String {
    format!(
        "{} link set {} netns {}",
        IP_CMD,
        shell::shellquote(iface),
        shell::shellquote(ns)
    )
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

pub fn build_veth_add_cmd(name_a: &str, name_b: &str) -> String {
    format!(
        "{} link add {} type veth peer name {}",
        IP_CMD,
        shell::shellquote(name_a),
        shell::shellquote(name_b)
    )
}

pub fn build_link_del_cmd(ns: Option<&str>, iface: &str) -> String {
    in_ns(
        ns,
        format!("{} link del {}", IP_CMD, shell::shellquote(iface)),
    )
}

pub fn build_link_up_cmd(ns: Option<&str>, iface: &str) -> String {
    in_ns(
        ns,
        format!("{} link set dev {} up", IP_CMD, shell::shellquote(iface)),
    )
}

pub fn build_link_mtu_cmd(ns: Option<&str>, iface: &str, mtu: u32) -> String {
    in_ns(
        ns,
        format!(
            "{} link set dev {} mtu {}",
            IP_CMD,
            shell::shellquote(iface),
            mtu
        ),
    )
}

pub fn build_addr_add_cmd(ns: Option<&str>, iface: &str, cidr: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} addr add {} dev {}",
            IP_CMD,
            shell::shellquote(cidr),
            shell::shellquote(iface)
        ),
    )
}

/// Existence probe; exits non-zero when the device is absent.
pub fn build_link_show_cmd(ns: Option<&str>, iface: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} link show dev {} 2>/dev/null",
            IP_CMD,
            shell::shellquote(iface)
        ),
    )
}

/// Up-state probe; exits non-zero unless the device exists and is
/// administratively up.
///
/// `ip link show dev X up` exits zero with empty output for a device
/// that is down, so the pipeline greps for any output.
pub fn build_link_show_up_cmd(ns: Option<&str>, iface: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} link show dev {} up 2>/dev/null | {} -q .",
            IP_CMD,
            shell::shellquote(iface),
            GREP_CMD
        ),
    )
}

pub fn build_addr_show_cmd(ns: Option<&str>) -> String {
    in_ns(ns, format!("{} -br addr show", IP_CMD))
}

// ---------------------------------------------------------------------------
// GRETAP tunnels
// ---------------------------------------------------------------------------

pub fn build_gretap_add_cmd(
    ns: Option<&str>,
    iface: &str,
    local_ip: &str,
    remote_ip: &str,
    mac: &str,
) -> String {
    in_ns(
        ns,
        format!(
            "{} link add {} address {} type gretap local {} remote {}",
            IP_CMD,
            shell::shellquote(iface),
            shell::shellquote(mac),
            shell::shellquote(local_ip),
            shell::shellquote(remote_ip)
        ),
    )
}

// ---------------------------------------------------------------------------
// Bridges
// ---------------------------------------------------------------------------

pub fn build_bridge_add_cmd(ns: Option<&str>, name: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} link add {} type bridge",
            IP_CMD,
            shell::shellquote(name)
        ),
    )
}

pub fn build_bridge_enslave_cmd(ns: Option<&str>, iface: &str, bridge: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} link set dev {} master {}",
            IP_CMD,
            shell::shellquote(iface),
            shell::shellquote(bridge)
        ),
    )
}

/// Sets the bridge group-forward mask so normally-filtered control-plane
/// frames (the 802.1X PAE group address) are forwarded.
pub fn build_group_fwd_mask_cmd(ns: Option<&str>, bridge: &str, mask: u16) -> String {
    in_ns(
        ns,
        format!(
            "{} link set dev {} type bridge group_fwd_mask {}",
            IP_CMD,
            shell::shellquote(bridge),
            mask
        ),
    )
}

// ---------------------------------------------------------------------------
// MACsec (static keys)
// ---------------------------------------------------------------------------

pub fn build_macsec_add_link_cmd(ns: Option<&str>, iface: &str, parent: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} link add link {} {} type macsec encrypt on",
            IP_CMD,
            shell::shellquote(parent),
            shell::shellquote(iface)
        ),
    )
}

pub fn build_macsec_tx_sa_cmd(ns: Option<&str>, iface: &str, pn: u64, key: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} macsec add {} tx sa 0 pn {} on key 01 {}",
            IP_CMD,
            shell::shellquote(iface),
            pn,
            shell::shellquote(key)
        ),
    )
}

pub fn build_macsec_rx_chan_cmd(ns: Option<&str>, iface: &str, port: u16, mac: &str) -> String {
    in_ns(
        ns,
        format!(
            "{} macsec add {} rx port {} address {}",
            IP_CMD,
            shell::shellquote(iface),
            port,
            shell::shellquote(mac)
        ),
    )
}

pub fn build_macsec_rx_sa_cmd(
    ns: Option<&str>,
    iface: &str,
    port: u16,
    mac: &str,
    pn: u64,
    key: &str,
) -> String {
    in_ns(
        ns,
        format!(
            "{} macsec add {} rx port {} address {} sa 0 pn {} on key 02 {}",
            IP_CMD,
            shell::shellquote(iface),
            port,
            shell::shellquote(mac),
            pn,
            shell::shellquote(key)
        ),
    )
}

pub fn build_macsec_show_cmd(ns: Option<&str>) -> String {
    in_ns(ns, format!("{} macsec show", IP_CMD))
}

// ---------------------------------------------------------------------------
// Collaborators: capture, supplicant, rotation, monitor
// ---------------------------------------------------------------------------

pub fn build_tcpdump_cmd(
    ns: Option<&str>,
    iface: &str,
    output: &Path,
    filter: Option<&str>,
) -> String {
    let mut cmd = format!(
        "{} -i {} -w {}",
        TCPDUMP_CMD,
        shell::shellquote(iface),
        quote_path(output)
    );
    if let Some(filter) = filter {
        cmd.push(' ');
        cmd.push_str(filter);
    }
    in_ns(ns, cmd)
}

pub fn build_wpa_supplicant_cmd(
    ns: Option<&str>,
    iface: &str,
    config: &Path,
    pid_file: &Path,
    log_file: &Path,
) -> String {
    in_ns(
        ns,
        format!(
            "{} -B -D macsec_linux -i {} -c {} -P {} -f {}",
            WPA_SUPPLICANT_CMD,
            shell::shellquote(iface),
            quote_path(config),
            quote_path(pid_file),
            quote_path(log_file)
        ),
    )
}

pub fn build_logrotate_cmd(config: &Path, state: &Path) -> String {
    format!(
        "{} -s {} {}",
        LOGROTATE_CMD,
        quote_path(state),
        quote_path(config)
    )
}

/// Background rtnetlink link-event monitor appended to a shared log.
pub fn build_link_monitor_cmd(log_file: &Path) -> String {
    format!("{} monitor link >> {}", IP_CMD, quote_path(log_file))
}

pub fn build_kill_cmd(pid: u32) -> String {
    format!("{} {}", KILL_CMD, pid)
}

/// One-shot bandwidth server; `-1` makes it exit after a single test.
pub fn build_iperf_server_cmd(ns: &str) -> String {
    in_ns(Some(ns), format!("{} -s -1", IPERF_CMD))
}

/// Bandwidth client reporting one-second intervals.
pub fn build_iperf_client_cmd(ns: &str, server_ip: &str, seconds: u32) -> String {
    in_ns(
        Some(ns),
        format!(
            "{} -c {} -t {} -i 1",
            IPERF_CMD,
            shell::shellquote(server_ip),
            seconds
        ),
    )
}

/// Interactive operator shell inside a namespace.
pub fn build_ns_shell_cmd(ns: &str) -> String {
    format!(
        "{} -T {} -e {} netns exec {} {}",
        XTERM_CMD,
        shell::shellquote(ns),
        IP_CMD,
        shell::shellquote(ns),
        shell::BASH_CMD
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_in_ns_prefix() {
        let cmd = in_ns(Some("ns1"), "true".to_string());
        assert_eq!(cmd, "/sbin/ip netns exec \"ns1\" true");
        assert_eq!(in_ns(None, "true".to_string()), "true");
    }

    #[test]
    fn test_build_netns_cmds() {
        assert_eq!(build_netns_add_cmd("ns1"), "/sbin/ip netns add \"ns1\"");
        assert_eq!(build_netns_del_cmd("ns1"), "/sbin/ip netns del \"ns1\"");
        assert!(build_loopback_up_cmd("ns1").contains("netns exec \"ns1\""));
    }

    #[test]
    fn test_build_veth_add_cmd() {
        let cmd = build_veth_add_cmd("veth_h1", "veth_r1");
        assert_eq!(
            cmd,
            "/sbin/ip link add \"veth_h1\" type veth peer name \"veth_r1\""
        );
    }

    #[test]
    fn test_build_link_cmds_in_ns() {
        let cmd = build_link_mtu_cmd(Some("router1"), "gretap1", 1430);
        assert!(cmd.starts_with("/sbin/ip netns exec \"router1\""));
        assert!(cmd.contains("link set dev \"gretap1\" mtu 1430"));

        let cmd = build_addr_add_cmd(Some("ns1"), "macsec0", "10.0.0.1/16");
        assert!(cmd.contains("addr add \"10.0.0.1/16\" dev \"macsec0\""));

        let cmd = build_link_up_cmd(None, "br0");
        assert_eq!(cmd, "/sbin/ip link set dev \"br0\" up");
    }

    #[test]
    fn test_build_gretap_add_cmd() {
        let cmd = build_gretap_add_cmd(
            Some("router1"),
            "gretap1",
            "172.16.0.1",
            "172.16.0.2",
            "02:01:01:aa:bb:cc",
        );
        assert!(cmd.contains("link add \"gretap1\" address \"02:01:01:aa:bb:cc\""));
        assert!(cmd.contains("type gretap local \"172.16.0.1\" remote \"172.16.0.2\""));
    }

    #[test]
    fn test_build_bridge_cmds() {
        assert!(build_bridge_add_cmd(None, "br0").contains("link add \"br0\" type bridge"));
        assert!(build_bridge_enslave_cmd(None, "vbr1", "br0")
            .contains("link set dev \"vbr1\" master \"br0\""));
        let cmd = build_group_fwd_mask_cmd(None, "br0", 0x8);
        assert!(cmd.contains("type bridge group_fwd_mask 8"));
    }

    #[test]
    fn test_build_macsec_cmds() {
        let add = build_macsec_add_link_cmd(Some("router1"), "macsec1", "gretap1");
        assert!(add.contains("link add link \"gretap1\" \"macsec1\" type macsec encrypt on"));

        let tx = build_macsec_tx_sa_cmd(Some("router1"), "macsec1", 1, "00112233445566778899aabbccddeeff");
        assert!(tx.contains("macsec add \"macsec1\" tx sa 0 pn 1 on key 01"));

        let chan = build_macsec_rx_chan_cmd(Some("router1"), "macsec1", 1, "02:02:02:aa:bb:cc");
        assert!(chan.contains("rx port 1 address \"02:02:02:aa:bb:cc\""));

        let rx = build_macsec_rx_sa_cmd(
            Some("router1"),
            "macsec1",
            1,
            "02:02:02:aa:bb:cc",
            1,
            "ffeeddccbbaa99887766554433221100",
        );
        assert!(rx.contains("sa 0 pn 1 on key 02"));
    }

    #[test]
    fn test_build_link_show_up_cmd() {
        let cmd = build_link_show_up_cmd(Some("ns1"), "veth1");
        assert_eq!(
            cmd,
            "/sbin/ip netns exec \"ns1\" /sbin/ip link show dev \"veth1\" up 2>/dev/null | /bin/grep -q ."
        );
    }

    #[test]
    fn test_build_iperf_cmds() {
        assert_eq!(
            build_iperf_server_cmd("ns2"),
            "/sbin/ip netns exec \"ns2\" /usr/bin/iperf3 -s -1"
        );
        assert_eq!(
            build_iperf_client_cmd("ns1", "10.0.0.2", 10),
            "/sbin/ip netns exec \"ns1\" /usr/bin/iperf3 -c \"10.0.0.2\" -t 10 -i 1"
        );
    }

    #[test]
    fn test_build_tcpdump_cmd() {
        let out = PathBuf::from("/var/log/labnet/pcap/vbr1.pcap");
        let cmd = build_tcpdump_cmd(None, "vbr1", &out, Some("ether proto 0x888e"));
        assert!(cmd.starts_with("/usr/bin/tcpdump -i \"vbr1\" -w"));
        assert!(cmd.ends_with("ether proto 0x888e"));

        let plain = build_tcpdump_cmd(Some("router1"), "wan1", &out, None);
        assert!(plain.starts_with("/sbin/ip netns exec \"router1\" /usr/bin/tcpdump"));
        assert!(!plain.contains("ether proto"));
    }

    #[test]
    fn test_build_wpa_supplicant_cmd() {
        let cmd = build_wpa_supplicant_cmd(
            Some("ns1"),
            "veth1",
            &PathBuf::from("/tmp/mka/ns1.conf"),
            &PathBuf::from("/tmp/mka/ns1.pid"),
            &PathBuf::from("/tmp/mka/ns1.log"),
        );
        assert!(cmd.contains("-B -D macsec_linux -i \"veth1\""));
        assert!(cmd.contains("-c \"/tmp/mka/ns1.conf\""));
        assert!(cmd.contains("-P \"/tmp/mka/ns1.pid\""));
        assert!(cmd.contains("-f \"/tmp/mka/ns1.log\""));
    }

    #[test]
    fn test_build_logrotate_cmd() {
        let cmd = build_logrotate_cmd(
            &PathBuf::from("/tmp/rotate/vbr1.conf"),
            &PathBuf::from("/tmp/rotate/vbr1.state"),
        );
        assert_eq!(
            cmd,
            "/usr/sbin/logrotate -s \"/tmp/rotate/vbr1.state\" \"/tmp/rotate/vbr1.conf\""
        );
    }

    #[test]
    fn test_build_link_monitor_cmd() {
        let cmd = build_link_monitor_cmd(&PathBuf::from("/tmp/rtnetlink.log"));
        assert_eq!(cmd, "/sbin/ip monitor link >> \"/tmp/rtnetlink.log\"");
    }

    #[test]
    fn test_shellquote_safety() {
        // Hostile names stay inside quotes all the way to the shell.
        let cmd = build_netns_add_cmd("ns1; rm -rf /");
        assert!(cmd.contains("\"ns1; rm -rf /\""));
    }
}
