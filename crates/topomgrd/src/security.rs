//! Security overlay configuration - static MACsec keys and MKA supplicants

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use labnet_common::{poll_command, LabError, LabResult, Runner};
use rand::Rng;
use tracing::{info, warn};

use crate::commands::{
    build_kill_cmd, build_link_show_cmd, build_link_up_cmd, build_macsec_add_link_cmd,
    build_macsec_rx_chan_cmd, build_macsec_rx_sa_cmd, build_macsec_tx_sa_cmd,
    build_wpa_supplicant_cmd,
};
use crate::fabric::FabricMgr;
use crate::types::{
    LinkKind, LinkSpec, PairingTable, SecurityAssociation, MTU_MACSEC, SECURE_CHANNEL_IFACE,
};

/// How long to wait for the kernel secure-channel interface to appear
/// after starting a supplicant.
pub const NEGOTIATION_BOUND: Duration = Duration::from_secs(2);

/// Polling interval while waiting for negotiation.
pub const NEGOTIATION_INTERVAL: Duration = Duration::from_millis(100);

/// MACsec port used for every receive channel.
const MACSEC_PORT: u16 = 1;

/// Initial packet number for fresh security associations.
const INITIAL_PN: u64 = 1;

/// Generates `n` random bytes as a lowercase hex string.
fn random_hex(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

/// Per-session static key material, one association per site.
///
/// Generated once per session and never persisted.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    per_site: HashMap<usize, SecurityAssociation>,
}

impl SessionKeys {
    /// Generates pairwise 128-bit keys honouring the symmetric invariant:
    /// for paired sites i and j, `tx_key(i) == rx_key(j)` and vice versa.
    ///
    /// `remote_macs` maps each site index to the MAC of its peer's tunnel
    /// endpoint.
    ///
    /// # Panics
    ///
    /// The pairing must be mutual (`peer_of(peer_of(i)) == i`): one
    /// association per site cannot express a site keyed by two different
    /// peers, so a non-mutual table would silently overwrite keys.
    pub fn generate(pairing: &PairingTable, remote_macs: &HashMap<usize, String>) -> Self {
        assert!(
            pairing.is_symmetric(),
            "static key generation requires a mutual pairing"
        );
        let mut per_site = HashMap::new();

        for (site, peer) in pairing.entries() {
            if site > peer {
                continue; // each unordered pair handled once
            }
            let key_forward = random_hex(16);
            let key_reverse = random_hex(16);

            per_site.insert(
                site,
                SecurityAssociation {
                    tx_key: key_forward.clone(),
                    rx_key: key_reverse.clone(),
                    remote_mac: remote_macs.get(&site).cloned().unwrap_or_default(),
                    port: MACSEC_PORT,
                    packet_number: INITIAL_PN,
                },
            );
            per_site.insert(
                peer,
                SecurityAssociation {
                    tx_key: key_reverse,
                    rx_key: key_forward,
                    remote_mac: remote_macs.get(&peer).cloned().unwrap_or_default(),
                    port: MACSEC_PORT,
                    packet_number: INITIAL_PN,
                },
            );
        }

        Self { per_site }
    }

    /// The association for a site, if one was generated.
    pub fn for_site(&self, index: usize) -> Option<&SecurityAssociation> {
        self.per_site.get(&index)
    }
}

/// Installs a static MACsec overlay on top of an existing tunnel link.
///
/// The tunnel must already be up; otherwise this fails with
/// `DependencyNotReady` rather than installing keys onto a dead device.
pub async fn install_static_overlay(
    runner: &mut Runner,
    fabric: &mut FabricMgr,
    ns: &str,
    parent_iface: &str,
    macsec_iface: &str,
    sa: &SecurityAssociation,
) -> LabResult<LinkSpec> {
    if !fabric.link_is_up(runner, Some(ns), parent_iface).await? {
        return Err(LabError::not_ready(
            format!("macsec overlay on {macsec_iface}"),
            format!("{parent_iface} in {ns} is not up"),
        ));
    }

    runner
        .run_checked(&build_macsec_add_link_cmd(Some(ns), macsec_iface, parent_iface))
        .await?;
    runner
        .run_checked(&build_macsec_tx_sa_cmd(
            Some(ns),
            macsec_iface,
            sa.packet_number,
            &sa.tx_key,
        ))
        .await?;
    runner
        .run_checked(&build_macsec_rx_chan_cmd(
            Some(ns),
            macsec_iface,
            sa.port,
            &sa.remote_mac,
        ))
        .await?;
    runner
        .run_checked(&build_macsec_rx_sa_cmd(
            Some(ns),
            macsec_iface,
            sa.port,
            &sa.remote_mac,
            sa.packet_number,
            &sa.rx_key,
        ))
        .await?;
    runner
        .run_checked(&build_link_up_cmd(Some(ns), macsec_iface))
        .await?;
    fabric
        .set_mtu(runner, Some(ns), macsec_iface, MTU_MACSEC)
        .await?;

    let link = LinkSpec::new(LinkKind::Macsec, macsec_iface)
        .with_peer(parent_iface)
        .in_namespace(ns);
    fabric.register(link.clone());
    info!(ns, iface = macsec_iface, parent = parent_iface, "static MACsec overlay installed");
    Ok(link)
}

/// MKA supplicant supervisor for the LAN scenario.
///
/// One supplicant per peer namespace, all sharing a session CAK/CKN pair.
/// Supplicants daemonize and record their pid in a per-namespace pid file;
/// shutdown signals that pid and treats a missing file as already stopped.
#[derive(Debug)]
pub struct MkaMgr {
    cak: String,
    ckn: String,
    pid_files: HashMap<String, PathBuf>,
}

impl MkaMgr {
    /// Creates a manager with a fresh random CAK/CKN pair for this session.
    pub fn new() -> Self {
        Self {
            cak: random_hex(16),
            ckn: random_hex(32),
            pid_files: HashMap::new(),
        }
    }

    #[cfg(test)]
    fn with_keys(cak: String, ckn: String) -> Self {
        Self {
            cak,
            ckn,
            pid_files: HashMap::new(),
        }
    }

    /// Renders the supplicant configuration for MACsec over the link layer.
    pub fn config_text(&self) -> String {
        format!(
            "eapol_version=3\n\
             ap_scan=0\n\
             fast_reauth=1\n\
             network={{\n\
             \tkey_mgmt=NONE\n\
             \teapol_flags=0\n\
             \tmacsec_policy=1\n\
             \tmka_cak={}\n\
             \tmka_ckn={}\n\
             }}\n",
            self.cak, self.ckn
        )
    }

    /// Writes the per-namespace supplicant config file.
    pub fn write_config(&self, dir: &Path, ns: &str) -> LabResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{ns}.conf"));
        std::fs::write(&path, self.config_text())?;
        Ok(path)
    }

    /// Spawns a supplicant for `iface` inside `ns`.
    ///
    /// The supplicant daemonizes itself (`-B`), so no child handle is
    /// tracked; the pid file it writes is the handle used at shutdown.
    pub async fn start(
        &mut self,
        runner: &mut Runner,
        ns: &str,
        iface: &str,
        dir: &Path,
    ) -> LabResult<()> {
        let config = self.write_config(dir, ns)?;
        let pid_file = dir.join(format!("{ns}.pid"));
        let log_file = dir.join(format!("{ns}.log"));

        let cmd = build_wpa_supplicant_cmd(Some(ns), iface, &config, &pid_file, &log_file);
        runner.run_checked(&cmd).await?;

        self.pid_files.insert(ns.to_string(), pid_file);
        info!(ns, iface, "started MKA supplicant");
        Ok(())
    }

    /// Waits for the kernel secure-channel interface to appear in `ns`,
    /// proving key agreement completed.
    pub async fn wait_secure_channel(&self, runner: &mut Runner, ns: &str) -> LabResult<()> {
        self.wait_secure_channel_within(runner, ns, NEGOTIATION_BOUND)
            .await
    }

    async fn wait_secure_channel_within(
        &self,
        runner: &mut Runner,
        ns: &str,
        bound: Duration,
    ) -> LabResult<()> {
        let cmd = build_link_show_cmd(Some(ns), SECURE_CHANNEL_IFACE);
        let outcome = poll_command(runner, &cmd, bound, NEGOTIATION_INTERVAL).await?;

        if !outcome.is_ready() {
            return Err(LabError::negotiation_timeout(
                SECURE_CHANNEL_IFACE,
                outcome.waited_ms(),
            ));
        }
        info!(ns, waited_ms = outcome.waited_ms(), "secure channel negotiated");
        Ok(())
    }

    /// Stops the supplicant for `ns` via its pid file.
    ///
    /// A missing pid file means the supplicant already exited; that is
    /// success, not an error.
    pub async fn stop(&mut self, runner: &mut Runner, ns: &str) -> LabResult<()> {
        let Some(pid_file) = self.pid_files.remove(ns) else {
            return Ok(());
        };

        let contents = match std::fs::read_to_string(&pid_file) {
            Ok(c) => c,
            Err(_) => {
                info!(ns, "supplicant pid file absent, already stopped");
                return Ok(());
            }
        };

        match contents.trim().parse::<u32>() {
            Ok(pid) => {
                runner.run_checked(&build_kill_cmd(pid)).await?;
                info!(ns, pid, "stopped MKA supplicant");
            }
            Err(_) => {
                warn!(ns, pid_file = %pid_file.display(), "unparsable pid file, skipping kill");
            }
        }

        let _ = std::fs::remove_file(&pid_file);
        Ok(())
    }

    /// Stops every supplicant, collecting errors for the teardown report.
    pub async fn stop_all(&mut self, runner: &mut Runner) -> Vec<String> {
        let mut errors = Vec::new();
        let namespaces: Vec<String> = self.pid_files.keys().cloned().collect();
        for ns in namespaces {
            if let Err(e) = self.stop(runner, &ns).await {
                errors.push(format!("{ns}: {e}"));
            }
        }
        errors
    }
}

impl Default for MkaMgr {
    fn default() -> Self {
        Self::new()
    }
}
