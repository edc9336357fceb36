//! Lifecycle orchestrator - topology state machine, menu, and teardown

use std::collections::HashMap;
use std::path::PathBuf;

use labnet_common::{LabResult, Runner};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tracing::{error, info, warn};

use crate::addr;
use crate::capture::CaptureMgr;
use crate::commands::{
    build_addr_show_cmd, build_iperf_client_cmd, build_iperf_server_cmd, build_macsec_show_cmd,
    build_ns_shell_cmd,
};
use crate::fabric::FabricMgr;
use crate::netns::NetnsMgr;
use crate::security::{install_static_overlay, MkaMgr, SessionKeys};
use crate::types::{
    LinkKind, PairingTable, ScenarioKind, Site, AUTH_PROTO_FILTER, EAPOL_FWD_MASK, MTU_MACSEC,
    MTU_PLAIN, SECURE_CHANNEL_IFACE,
};

/// Number of sites in the fixed WAN scenario.
const WAN_SITES: usize = 2;

/// Duration of a menu-triggered bandwidth measurement.
const BENCH_SECONDS: u32 = 10;

/// Session lifecycle phase.
///
/// Transitions are strictly forward during setup; any setup failure is
/// fatal to the session. Teardown runs every stage regardless of earlier
/// stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    LoggingReady,
    NamespacesUp,
    FabricWired,
    OverlaySecured,
    BridgesUp,
    Operational,
    TearingDown,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::LoggingReady => "logging-ready",
            Phase::NamespacesUp => "namespaces-up",
            Phase::FabricWired => "fabric-wired",
            Phase::OverlaySecured => "overlay-secured",
            Phase::BridgesUp => "bridges-up",
            Phase::Operational => "operational",
            Phase::TearingDown => "tearing-down",
            Phase::Done => "done",
        }
    }
}

/// Session configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct LabConfig {
    pub scenario: ScenarioKind,
    /// Enable the static-key MACsec overlay (WAN mode only).
    pub macsec: bool,
    /// Number of peer namespaces (LAN mode only).
    pub peer_count: usize,
    /// Open an interactive terminal per namespace.
    pub open_shells: bool,
    /// Root of the log/capture/rotation directory tree.
    pub log_dir: PathBuf,
}

impl LabConfig {
    pub fn wan(macsec: bool, open_shells: bool, log_dir: PathBuf) -> Self {
        Self {
            scenario: ScenarioKind::Wan,
            macsec,
            peer_count: WAN_SITES,
            open_shells,
            log_dir,
        }
    }

    pub fn lan(peer_count: usize, open_shells: bool, log_dir: PathBuf) -> Self {
        Self {
            scenario: ScenarioKind::Lan,
            macsec: true, // negotiated dynamically, always on in LAN mode
            peer_count,
            open_shells,
            log_dir,
        }
    }
}

/// Result of one teardown stage.
#[derive(Debug)]
pub struct StageReport {
    pub stage: &'static str,
    pub errors: Vec<String>,
}

impl StageReport {
    fn clean(stage: &'static str) -> Self {
        Self {
            stage,
            errors: Vec::new(),
        }
    }
}

/// Aggregated outcome of the full teardown pipeline.
///
/// Stages never abort each other; their failures are collected here
/// instead of raised as control flow.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub stages: Vec<StageReport>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.stages.iter().all(|s| s.errors.is_empty())
    }

    pub fn total_errors(&self) -> usize {
        self.stages.iter().map(|s| s.errors.len()).sum()
    }
}

/// Parsed interactive menu command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    List,
    Show(String),
    Bench { server: String, client: String },
    Exit,
    /// A known command with missing arguments; carries its usage line.
    Usage(&'static str),
    Unknown(String),
}

impl MenuCommand {
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("list") => MenuCommand::List,
            Some("show") => match parts.next() {
                Some(ns) => MenuCommand::Show(ns.to_string()),
                None => MenuCommand::Usage("show <namespace>"),
            },
            Some("bench") => match (parts.next(), parts.next()) {
                (Some(server), Some(client)) => MenuCommand::Bench {
                    server: server.to_string(),
                    client: client.to_string(),
                },
                _ => MenuCommand::Usage("bench <server-ns> <client-ns>"),
            },
            Some("exit") | Some("quit") => MenuCommand::Exit,
            Some(other) => MenuCommand::Unknown(other.to_string()),
            None => MenuCommand::Unknown(String::new()),
        }
    }
}

/// Top-level topology lifecycle orchestrator.
///
/// Owns every component and the shared command runner. Sequences setup in
/// dependency order, serves the read-only inspection menu, and drives the
/// reverse-order teardown.
pub struct Orchestrator {
    config: LabConfig,
    runner: Runner,
    phase: Phase,
    netns: NetnsMgr,
    fabric: FabricMgr,
    capture: CaptureMgr,
    mka: MkaMgr,
    pairing: PairingTable,
    sites: Vec<Site>,
    shells: Vec<Child>,
}

impl Orchestrator {
    pub fn new(config: LabConfig, runner: Runner) -> Self {
        let pairing = match config.scenario {
            ScenarioKind::Wan => PairingTable::pair_of_two(),
            ScenarioKind::Lan => PairingTable::ring(config.peer_count),
        };
        Self {
            config,
            runner,
            phase: Phase::Idle,
            netns: NetnsMgr::new(),
            fabric: FabricMgr::new(),
            capture: CaptureMgr::new(),
            mka: MkaMgr::new(),
            pairing,
            sites: Vec::new(),
            shells: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "phase must move forward");
        info!(from = self.phase.as_str(), to = next.as_str(), "phase transition");
        self.phase = next;
    }

    /// Runs the full session: setup, menu, teardown.
    ///
    /// A setup failure unwinds whatever was built, then returns the
    /// original error. A menu failure is logged; the topology is still
    /// torn down and its report returned.
    pub async fn run(&mut self) -> LabResult<TeardownReport> {
        if let Err(e) = self.setup().await {
            let report = self.teardown().await;
            for stage in &report.stages {
                for err in &stage.errors {
                    warn!(stage = stage.stage, "teardown error: {}", err);
                }
            }
            return Err(e);
        }
        if let Err(e) = self.run_menu().await {
            error!("menu loop failed: {}", e);
        }
        Ok(self.teardown().await)
    }

    /// Sequences setup in dependency order. Any failure is fatal; the
    /// caller may still invoke [`Orchestrator::teardown`] to clean up
    /// whatever was built.
    pub async fn setup(&mut self) -> LabResult<()> {
        info!(scenario = self.config.scenario.as_str(), "starting topology setup");

        self.prepare_logging().await?;
        match self.config.scenario {
            ScenarioKind::Wan => self.setup_wan().await?,
            ScenarioKind::Lan => self.setup_lan().await?,
        }
        self.open_shells().await;
        self.advance(Phase::Operational);
        info!("topology operational");
        Ok(())
    }

    async fn prepare_logging(&mut self) -> LabResult<()> {
        std::fs::create_dir_all(self.config.log_dir.join("pcap"))?;
        std::fs::create_dir_all(self.config.log_dir.join("rotate"))?;

        let monitor_log = self.config.log_dir.join("rtnetlink.log");
        self.capture.start_link_monitor(&mut self.runner, &monitor_log)?;
        self.capture.write_rotation_policy(
            &self.config.log_dir.join("rotate").join("rtnetlink.conf"),
            &crate::types::RotationPolicy::new(monitor_log.display().to_string()),
        )?;

        self.advance(Phase::LoggingReady);
        Ok(())
    }

    // -----------------------------------------------------------------
    // WAN scenario
    // -----------------------------------------------------------------

    async fn setup_wan(&mut self) -> LabResult<()> {
        // Namespaces: one host and one router per site
        for i in 1..=WAN_SITES {
            let host_ns = format!("host{i}");
            let router_ns = format!("router{i}");
            self.netns.create_fresh(&mut self.runner, &host_ns).await?;
            self.netns.create_fresh(&mut self.runner, &router_ns).await?;
            self.sites
                .push(Site::new(i, host_ns, router_ns, addr::wan_overlay_subnet()));
        }
        self.advance(Phase::NamespacesUp);

        let mtu = if self.config.macsec { MTU_MACSEC } else { MTU_PLAIN };

        // Host-to-router veth per site
        for i in 1..=WAN_SITES {
            let (host_ns, router_ns) = {
                let site = &self.sites[i - 1];
                (site.host_ns.clone(), site.router_ns.clone())
            };
            let veth_h = format!("veth_h{i}");
            let veth_r = format!("veth_r{i}");

            self.fabric
                .create_veth_pair(&mut self.runner, &veth_h, &veth_r)
                .await?;
            self.netns.move_link(&mut self.runner, &veth_h, &host_ns).await?;
            self.fabric.relocate(&veth_h, &host_ns);
            self.netns.move_link(&mut self.runner, &veth_r, &router_ns).await?;
            self.fabric
                .add_address(&mut self.runner, Some(&host_ns), &veth_h, &addr::wan_overlay_addr(i))
                .await?;
            self.fabric.link_up(&mut self.runner, Some(&host_ns), &veth_h).await?;
            self.fabric.link_up(&mut self.runner, Some(&router_ns), &veth_r).await?;
        }

        // Inter-router underlay link
        self.fabric
            .create_veth_pair(&mut self.runner, "wan1", "wan2")
            .await?;
        for i in 1..=WAN_SITES {
            let router_ns = self.sites[i - 1].router_ns.clone();
            let wan_if = format!("wan{i}");
            self.netns.move_link(&mut self.runner, &wan_if, &router_ns).await?;
            self.fabric.relocate(&wan_if, &router_ns);
            self.fabric
                .add_address(&mut self.runner, Some(&router_ns), &wan_if, &addr::wan_underlay_addr(i))
                .await?;
            self.fabric.link_up(&mut self.runner, Some(&router_ns), &wan_if).await?;
        }

        // GRETAP endpoint per router, remote chosen via the pairing table
        for i in 1..=WAN_SITES {
            let peer = self
                .pairing
                .peer_of(i)
                .expect("WAN pairing covers every site");
            let router_ns = self.sites[i - 1].router_ns.clone();
            let gretap = format!("gretap{i}");
            let mac = addr::site_mac(i);

            self.fabric
                .create_gretap(
                    &mut self.runner,
                    &router_ns,
                    &gretap,
                    &addr::wan_underlay_ip(i),
                    &addr::wan_underlay_ip(peer),
                    &mac,
                )
                .await?;
            self.fabric.link_up(&mut self.runner, Some(&router_ns), &gretap).await?;
            self.sites[i - 1].mac_addresses.insert(gretap, mac);
        }
        self.advance(Phase::FabricWired);

        // Security overlay (optional) and data-path MTU
        if self.config.macsec {
            let remote_macs: HashMap<usize, String> = (1..=WAN_SITES)
                .map(|i| {
                    let peer = self.pairing.peer_of(i).expect("paired");
                    let mac = self.sites[peer - 1]
                        .mac_addresses
                        .get(&format!("gretap{peer}"))
                        .cloned()
                        .expect("gretap MAC recorded during fabric wiring");
                    (i, mac)
                })
                .collect();
            let keys = SessionKeys::generate(&self.pairing, &remote_macs);

            for i in 1..=WAN_SITES {
                let router_ns = self.sites[i - 1].router_ns.clone();
                let sa = keys.for_site(i).expect("keys generated per site").clone();
                install_static_overlay(
                    &mut self.runner,
                    &mut self.fabric,
                    &router_ns,
                    &format!("gretap{i}"),
                    &format!("macsec{i}"),
                    &sa,
                )
                .await?;
            }
        }

        for i in 1..=WAN_SITES {
            let (host_ns, router_ns) = {
                let site = &self.sites[i - 1];
                (site.host_ns.clone(), site.router_ns.clone())
            };
            self.fabric
                .set_mtu(&mut self.runner, Some(&host_ns), &format!("veth_h{i}"), mtu)
                .await?;
            self.fabric
                .set_mtu(&mut self.runner, Some(&router_ns), &format!("veth_r{i}"), mtu)
                .await?;
            if !self.config.macsec {
                self.fabric
                    .set_mtu(&mut self.runner, Some(&router_ns), &format!("gretap{i}"), mtu)
                    .await?;
            }
            self.sites[i - 1].mtu = mtu;
        }
        self.advance(Phase::OverlaySecured);

        // Bridge host-side veth with the (secured) tunnel device
        for i in 1..=WAN_SITES {
            let router_ns = self.sites[i - 1].router_ns.clone();
            let data_if = if self.config.macsec {
                format!("macsec{i}")
            } else {
                format!("gretap{i}")
            };
            self.fabric
                .create_bridge(
                    &mut self.runner,
                    Some(&router_ns),
                    &format!("br{i}"),
                    &[&format!("veth_r{i}"), &data_if],
                    None,
                )
                .await?;
        }
        self.advance(Phase::BridgesUp);

        // Underlay captures, one per router
        for i in 1..=WAN_SITES {
            let router_ns = self.sites[i - 1].router_ns.clone();
            let wan_if = format!("wan{i}");
            let pcap_dir = self.config.log_dir.join("pcap");
            self.capture
                .start_capture(&mut self.runner, Some(&router_ns), &wan_if, &pcap_dir, None)
                .await?;
            self.write_capture_policy(&wan_if)?;
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // LAN scenario
    // -----------------------------------------------------------------

    async fn setup_lan(&mut self) -> LabResult<()> {
        for i in 1..=self.config.peer_count {
            let ns = format!("ns{i}");
            self.netns.create_fresh(&mut self.runner, &ns).await?;
            self.sites
                .push(Site::new(i, ns.clone(), ns, addr::lan_subnet_cidr()));
        }
        self.advance(Phase::NamespacesUp);

        // Shared bridge forwarding 802.1X control frames
        self.fabric
            .create_bridge(&mut self.runner, None, "br0", &[], Some(EAPOL_FWD_MASK))
            .await?;

        for i in 1..=self.config.peer_count {
            let ns = self.sites[i - 1].host_ns.clone();
            let veth = format!("veth{i}");
            let vbr = format!("vbr{i}");

            self.fabric.create_veth_pair(&mut self.runner, &veth, &vbr).await?;
            self.netns.move_link(&mut self.runner, &veth, &ns).await?;
            self.fabric.relocate(&veth, &ns);
            self.fabric.enslave(&mut self.runner, None, &vbr, "br0").await?;
            self.fabric.link_up(&mut self.runner, None, &vbr).await?;
            self.fabric.link_up(&mut self.runner, Some(&ns), &veth).await?;
        }
        self.advance(Phase::FabricWired);

        // Capture the authentication traffic on each bridge port before
        // negotiation begins
        for i in 1..=self.config.peer_count {
            let vbr = format!("vbr{i}");
            let pcap_dir = self.config.log_dir.join("pcap");
            self.capture
                .start_capture(&mut self.runner, None, &vbr, &pcap_dir, Some(AUTH_PROTO_FILTER))
                .await?;
            self.write_capture_policy(&vbr)?;
        }

        // Per-namespace MKA supplicants, then wait for every secure channel
        let mka_dir = self.config.log_dir.join("mka");
        for i in 1..=self.config.peer_count {
            let ns = self.sites[i - 1].host_ns.clone();
            self.mka
                .start(&mut self.runner, &ns, &format!("veth{i}"), &mka_dir)
                .await?;
        }
        for i in 1..=self.config.peer_count {
            let ns = self.sites[i - 1].host_ns.clone();
            self.mka.wait_secure_channel(&mut self.runner, &ns).await?;
            self.fabric
                .link_up(&mut self.runner, Some(&ns), SECURE_CHANNEL_IFACE)
                .await?;
            self.fabric
                .add_address(
                    &mut self.runner,
                    Some(&ns),
                    SECURE_CHANNEL_IFACE,
                    &addr::lan_peer_addr(i),
                )
                .await?;
            self.sites[i - 1].mtu = MTU_MACSEC;
        }
        self.advance(Phase::OverlaySecured);
        self.advance(Phase::BridgesUp);

        Ok(())
    }

    fn write_capture_policy(&self, iface: &str) -> LabResult<()> {
        let pcap = self.config.log_dir.join("pcap").join(format!("{iface}.pcap"));
        let config = self.config.log_dir.join("rotate").join(format!("{iface}.conf"));
        self.capture.write_rotation_policy(
            &config,
            &crate::types::RotationPolicy::new(pcap.display().to_string()),
        )
    }

    async fn open_shells(&mut self) {
        if !self.config.open_shells {
            return;
        }
        let namespaces: Vec<String> = self.netns.created().map(String::from).collect();
        for ns in namespaces {
            match self.runner.spawn(&build_ns_shell_cmd(&ns)) {
                Ok(Some(child)) => self.shells.push(child),
                Ok(None) => {}
                // Shells are a convenience; a missing terminal emulator
                // must not fail the session
                Err(e) => warn!(ns = %ns, error = %e, "could not open namespace shell"),
            }
        }
    }

    // -----------------------------------------------------------------
    // Interactive menu
    // -----------------------------------------------------------------

    /// Serves the read-only inspection menu until the operator exits.
    pub async fn run_menu(&mut self) -> LabResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        const HELP: &str =
            "commands: list | show <namespace> | bench <server-ns> <client-ns> | exit";

        println!("topology operational. {HELP}");
        loop {
            print!("> ");
            use std::io::Write;
            let _ = std::io::stdout().flush();

            let Some(line) = lines.next_line().await? else {
                info!("stdin closed, leaving menu");
                return Ok(());
            };

            match MenuCommand::parse(&line) {
                MenuCommand::List => self.print_topology(),
                MenuCommand::Show(ns) => self.show_namespace(&ns).await,
                MenuCommand::Bench { server, client } => {
                    self.run_benchmark(&server, &client).await
                }
                MenuCommand::Exit => return Ok(()),
                MenuCommand::Usage(usage) => println!("usage: {usage}"),
                MenuCommand::Unknown(cmd) if cmd.is_empty() => {}
                MenuCommand::Unknown(cmd) => {
                    println!("unknown command '{cmd}'. {HELP}");
                }
            }
        }
    }

    fn print_topology(&self) {
        println!("namespaces:");
        for ns in self.netns.created() {
            println!("  {ns}");
        }
        println!("links:");
        for link in self.fabric.links() {
            let ns = link.owning_ns.as_deref().unwrap_or("-");
            match &link.endpoint_b {
                Some(peer) => println!("  {} {} <-> {} (ns {})", link.kind, link.endpoint_a, peer, ns),
                None => println!("  {} {} (ns {})", link.kind, link.endpoint_a, ns),
            }
        }
    }

    /// The benchmark/data-path IP of the site whose data namespace is `ns`.
    fn site_ip(&self, ns: &str) -> Option<String> {
        self.sites.iter().find(|s| s.host_ns == ns).map(|s| match self.config.scenario {
            ScenarioKind::Wan => addr::wan_overlay_ip(s.index),
            ScenarioKind::Lan => addr::lan_peer_ip(s.index),
        })
    }

    /// Measures bandwidth from `client_ns` to `server_ns` over the data
    /// path (the secured one when an overlay is active).
    ///
    /// A one-shot server is spawned in the server namespace; the client
    /// report is printed as produced.
    async fn run_benchmark(&mut self, server_ns: &str, client_ns: &str) {
        let Some(server_ip) = self.site_ip(server_ns) else {
            println!("no such namespace '{server_ns}'");
            return;
        };
        if self.site_ip(client_ns).is_none() {
            println!("no such namespace '{client_ns}'");
            return;
        }

        let server = match self.runner.spawn(&build_iperf_server_cmd(server_ns)) {
            Ok(child) => child,
            Err(e) => {
                error!(ns = server_ns, error = %e, "could not start bandwidth server");
                return;
            }
        };

        info!(server = server_ns, client = client_ns, seconds = BENCH_SECONDS, "running bandwidth test");
        match self
            .runner
            .run_checked(&build_iperf_client_cmd(client_ns, &server_ip, BENCH_SECONDS))
            .await
        {
            Ok(report) => println!("{report}"),
            Err(e) => error!(error = %e, "bandwidth test failed"),
        }

        // The server exits after one test; reap it if it is still around
        if let Some(mut child) = server {
            let _ = child.start_kill();
        }
    }

    async fn show_namespace(&mut self, ns: &str) {
        if !self.netns.created().any(|n| n == ns) {
            println!("no such namespace '{ns}'");
            return;
        }
        match self.runner.run(&build_addr_show_cmd(Some(ns))).await {
            Ok(result) => println!("{}", result.stdout),
            Err(e) => error!(ns, error = %e, "address listing failed"),
        }
        match self.runner.run(&build_macsec_show_cmd(Some(ns))).await {
            Ok(result) if result.success() && !result.stdout.is_empty() => {
                println!("{}", result.stdout)
            }
            Ok(_) => {}
            Err(e) => error!(ns, error = %e, "macsec listing failed"),
        }
    }

    // -----------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------

    /// Unwinds the topology in reverse dependency order.
    ///
    /// Every stage runs even if an earlier one reported errors; the
    /// aggregated report is returned instead of raising.
    pub async fn teardown(&mut self) -> TeardownReport {
        self.phase = Phase::TearingDown;
        info!("starting teardown");
        let mut report = TeardownReport::default();

        // Background monitors and captures stop before their interfaces go
        self.capture.stop_all();
        report.stages.push(StageReport::clean("captures"));

        for shell in &mut self.shells {
            let _ = shell.start_kill();
        }
        self.shells.clear();
        report.stages.push(StageReport::clean("shells"));

        report.stages.push(StageReport {
            stage: "supplicants",
            errors: self.mka.stop_all(&mut self.runner).await,
        });
        report.stages.push(StageReport {
            stage: "overlay",
            errors: self.fabric.teardown_kind(&mut self.runner, LinkKind::Macsec).await,
        });
        report.stages.push(StageReport {
            stage: "bridges",
            errors: self.fabric.teardown_kind(&mut self.runner, LinkKind::Bridge).await,
        });
        report.stages.push(StageReport {
            stage: "tunnels",
            errors: self.fabric.teardown_kind(&mut self.runner, LinkKind::Gretap).await,
        });
        report.stages.push(StageReport {
            stage: "links",
            errors: self.fabric.teardown_kind(&mut self.runner, LinkKind::Veth).await,
        });

        let mut ns_errors = Vec::new();
        let namespaces: Vec<String> = self.netns.created().map(String::from).collect();
        for ns in namespaces.iter().rev() {
            if let Err(e) = self.netns.delete(&mut self.runner, ns).await {
                debug_assert!(e.is_teardown_tolerable(), "teardown sequencing bug: {e}");
                ns_errors.push(format!("{ns}: {e}"));
            }
        }
        report.stages.push(StageReport {
            stage: "namespaces",
            errors: ns_errors,
        });

        self.phase = Phase::Done;
        if report.is_clean() {
            info!("teardown complete");
        } else {
            warn!(errors = report.total_errors(), "teardown completed with errors");
        }
        report
    }

    /// Namespaces created but not deleted; empty after a clean teardown.
    pub fn leaked_namespaces(&self) -> Vec<String> {
        self.netns.leaked()
    }

    #[cfg(test)]
    pub fn runner(&self) -> &Runner {
        &self.runner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wan_orchestrator(macsec: bool) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = LabConfig::wan(macsec, false, dir.path().to_path_buf());
        (Orchestrator::new(config, Runner::mock()), dir)
    }

    fn lan_orchestrator(peers: usize) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = LabConfig::lan(peers, false, dir.path().to_path_buf());
        (Orchestrator::new(config, Runner::mock()), dir)
    }

    fn position(cmds: &[String], needle: &str) -> usize {
        cmds.iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("no command containing '{needle}'"))
    }

    #[test]
    fn test_menu_command_parse() {
        assert_eq!(MenuCommand::parse("list"), MenuCommand::List);
        assert_eq!(MenuCommand::parse("  show ns1 "), MenuCommand::Show("ns1".to_string()));
        assert_eq!(MenuCommand::parse("exit"), MenuCommand::Exit);
        assert_eq!(MenuCommand::parse("quit"), MenuCommand::Exit);
        assert_eq!(
            MenuCommand::parse("bench ns2 ns1"),
            MenuCommand::Bench {
                server: "ns2".to_string(),
                client: "ns1".to_string()
            }
        );
        assert!(matches!(MenuCommand::parse("frobnicate"), MenuCommand::Unknown(_)));
        assert!(matches!(MenuCommand::parse(""), MenuCommand::Unknown(_)));
    }

    #[test]
    fn test_menu_command_usage_lines() {
        // Incomplete known commands get a usage line, not "unknown command".
        assert_eq!(MenuCommand::parse("show"), MenuCommand::Usage("show <namespace>"));
        assert_eq!(
            MenuCommand::parse("bench ns2"),
            MenuCommand::Usage("bench <server-ns> <client-ns>")
        );
        assert_eq!(
            MenuCommand::parse("bench"),
            MenuCommand::Usage("bench <server-ns> <client-ns>")
        );
    }

    #[tokio::test]
    async fn test_wan_setup_with_macsec_orders_stages() {
        let (mut orch, _dir) = wan_orchestrator(true);
        orch.setup().await.unwrap();
        assert_eq!(orch.phase(), Phase::Operational);

        let cmds = orch.runner().captured_commands().to_vec();

        // Namespaces exist before links, links before tunnels, tunnels
        // before the overlay, the overlay before bridges.
        let ns_add = position(&cmds, "netns add \"host1\"");
        let veth_add = position(&cmds, "type veth peer name \"veth_r1\"");
        let gretap_add = position(&cmds, "type gretap");
        let macsec_add = position(&cmds, "type macsec encrypt on");
        let bridge_add = position(&cmds, "link add \"br1\" type bridge");
        assert!(ns_add < veth_add);
        assert!(veth_add < gretap_add);
        assert!(gretap_add < macsec_add);
        assert!(macsec_add < bridge_add);

        // One tx and one rx SA per router
        let tx_count = cmds.iter().filter(|c| c.contains("tx sa 0 pn 1")).count();
        let rx_count = cmds.iter().filter(|c| c.contains("key 02")).count();
        assert_eq!(tx_count, 2);
        assert_eq!(rx_count, 2);

        // Reduced MTU everywhere on the data path
        assert!(cmds.iter().any(|c| c.contains("\"veth_h1\" mtu 1430")));
        assert!(cmds.iter().any(|c| c.contains("\"veth_h2\" mtu 1430")));
        assert!(!cmds.iter().any(|c| c.contains("mtu 1462")));
    }

    #[tokio::test]
    async fn test_wan_setup_without_macsec_uses_plain_mtu() {
        let (mut orch, _dir) = wan_orchestrator(false);
        orch.setup().await.unwrap();

        let cmds = orch.runner().captured_commands().to_vec();
        assert!(cmds.iter().any(|c| c.contains("\"veth_h1\" mtu 1462")));
        assert!(cmds.iter().any(|c| c.contains("\"gretap1\" mtu 1462")));
        assert!(!cmds.iter().any(|c| c.contains("macsec")));

        // Bridges enslave the bare tunnel instead of an overlay device
        assert!(cmds.iter().any(|c| c.contains("set dev \"gretap1\" master \"br1\"")));
    }

    #[tokio::test]
    async fn test_wan_teardown_reverses_setup() {
        let (mut orch, _dir) = wan_orchestrator(true);
        orch.setup().await.unwrap();
        let report = orch.teardown().await;

        assert!(report.is_clean(), "unexpected errors: {report:?}");
        assert_eq!(orch.phase(), Phase::Done);
        assert!(orch.leaked_namespaces().is_empty());

        let cmds = orch.runner().captured_commands().to_vec();
        let del_macsec = cmds.iter().rposition(|c| c.contains("link del \"macsec1\"")).unwrap();
        let del_bridge = cmds.iter().rposition(|c| c.contains("link del \"br1\"")).unwrap();
        let del_gretap = cmds.iter().rposition(|c| c.contains("link del \"gretap1\"")).unwrap();
        let del_ns = cmds.iter().rposition(|c| c.contains("netns del \"router1\"")).unwrap();
        assert!(del_macsec < del_bridge);
        assert!(del_bridge < del_gretap);
        assert!(del_gretap < del_ns);
    }

    #[tokio::test]
    async fn test_wan_teardown_deletes_veths_where_they_live() {
        let (mut orch, _dir) = wan_orchestrator(false);
        orch.setup().await.unwrap();
        let report = orch.teardown().await;
        assert!(report.is_clean(), "unexpected errors: {report:?}");

        // Moved veth endpoints must be deleted inside their namespaces,
        // not in the root namespace where they no longer exist.
        let cmds = orch.runner().captured_commands().to_vec();
        let del_veth = cmds
            .iter()
            .rev()
            .find(|c| c.contains("link del \"veth_h1\""))
            .unwrap();
        assert_eq!(
            del_veth,
            "/sbin/ip netns exec \"host1\" /sbin/ip link del \"veth_h1\""
        );
        let del_wan = cmds
            .iter()
            .rev()
            .find(|c| c.contains("link del \"wan1\""))
            .unwrap();
        assert_eq!(
            del_wan,
            "/sbin/ip netns exec \"router1\" /sbin/ip link del \"wan1\""
        );
    }

    #[tokio::test]
    async fn test_lan_teardown_deletes_veths_where_they_live() {
        let (mut orch, _dir) = lan_orchestrator(2);
        orch.setup().await.unwrap();
        orch.teardown().await;

        let cmds = orch.runner().captured_commands().to_vec();
        let del_veth = cmds
            .iter()
            .rev()
            .find(|c| c.contains("link del \"veth1\""))
            .unwrap();
        assert_eq!(
            del_veth,
            "/sbin/ip netns exec \"ns1\" /sbin/ip link del \"veth1\""
        );
    }

    #[tokio::test]
    async fn test_wan_namespaces_created_equal_deleted() {
        let (mut orch, _dir) = wan_orchestrator(false);
        orch.setup().await.unwrap();

        let created: Vec<String> = orch.netns.created().map(String::from).collect();
        assert_eq!(created, vec!["host1", "host2", "router1", "router2"]);

        orch.teardown().await;
        assert!(orch.leaked_namespaces().is_empty());
    }

    #[tokio::test]
    async fn test_lan_setup_three_peers() {
        let (mut orch, _dir) = lan_orchestrator(3);
        orch.setup().await.unwrap();
        assert_eq!(orch.phase(), Phase::Operational);
        assert_eq!(orch.sites().len(), 3);

        let cmds = orch.runner().captured_commands().to_vec();

        // Shared bridge passes EAPOL frames
        assert!(cmds.iter().any(|c| c.contains("group_fwd_mask 8")));

        // One supplicant per namespace, each with its own config and pid file
        for i in 1..=3 {
            assert!(cmds
                .iter()
                .any(|c| c.contains("wpa_supplicant") && c.contains(&format!("\"ns{i}\""))));
            assert!(cmds
                .iter()
                .any(|c| c.contains(&format!("addr add \"10.0.0.{i}/16\" dev \"macsec0\""))));
        }

        // Captures filter for the authentication EtherTypes
        assert!(cmds
            .iter()
            .any(|c| c.contains("tcpdump") && c.contains("0x888e")));
    }

    #[tokio::test]
    async fn test_lan_teardown_removes_all_namespaces() {
        let (mut orch, _dir) = lan_orchestrator(3);
        orch.setup().await.unwrap();

        let report = orch.teardown().await;
        assert!(report.is_clean(), "unexpected errors: {report:?}");
        assert!(orch.leaked_namespaces().is_empty());

        let cmds = orch.runner().captured_commands().to_vec();
        for i in 1..=3 {
            assert!(cmds.iter().any(|c| c.contains(&format!("netns del \"ns{i}\""))));
        }
        // Shared bridge removed too
        assert!(cmds.iter().rposition(|c| c.contains("link del \"br0\"")).is_some());
    }

    #[tokio::test]
    async fn test_lan_captures_start_before_supplicants() {
        let (mut orch, _dir) = lan_orchestrator(2);
        orch.setup().await.unwrap();

        let cmds = orch.runner().captured_commands().to_vec();
        let first_capture = position(&cmds, "tcpdump");
        let first_supplicant = position(&cmds, "wpa_supplicant");
        assert!(first_capture < first_supplicant);
    }

    #[tokio::test]
    async fn test_benchmark_spawns_server_then_client() {
        let (mut orch, _dir) = lan_orchestrator(2);
        orch.setup().await.unwrap();

        orch.run_benchmark("ns2", "ns1").await;

        let cmds = orch.runner().captured_commands().to_vec();
        let server = position(&cmds, "iperf3 -s -1");
        let client = position(&cmds, "iperf3 -c \"10.0.0.2\"");
        assert!(server < client);
        assert!(cmds[server].contains("netns exec \"ns2\""));
        assert!(cmds[client].contains("netns exec \"ns1\""));
        assert!(cmds[client].contains(&format!("-t {BENCH_SECONDS}")));
    }

    #[tokio::test]
    async fn test_benchmark_rejects_unknown_namespace() {
        let (mut orch, _dir) = lan_orchestrator(2);
        orch.setup().await.unwrap();
        let before = orch.runner().captured_commands().len();

        orch.run_benchmark("ns9", "ns1").await;
        orch.run_benchmark("ns1", "ns9").await;

        // No server or client runs against namespaces this session
        // does not own.
        assert_eq!(orch.runner().captured_commands().len(), before);
    }

    #[tokio::test]
    async fn test_rotation_policies_written_per_interface() {
        let (mut orch, dir) = lan_orchestrator(2);
        orch.setup().await.unwrap();

        for iface in ["vbr1", "vbr2"] {
            let conf = dir.path().join("rotate").join(format!("{iface}.conf"));
            assert!(conf.exists(), "missing rotation config for {iface}");
            let text = std::fs::read_to_string(&conf).unwrap();
            assert!(text.contains("missingok"));
            assert!(text.contains("rotate 10"));
        }
        assert!(dir.path().join("rotate").join("rtnetlink.conf").exists());
    }

    #[tokio::test]
    async fn test_teardown_runs_all_stages() {
        let (mut orch, _dir) = wan_orchestrator(true);
        orch.setup().await.unwrap();
        let report = orch.teardown().await;

        let stages: Vec<&str> = report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                "captures",
                "shells",
                "supplicants",
                "overlay",
                "bridges",
                "tunnels",
                "links",
                "namespaces"
            ]
        );
    }
}
