//! Diagnostic capture - per-interface tcpdump jobs and log rotation

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use labnet_common::{poll_command, LabError, LabResult, Runner};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::commands::{
    build_link_monitor_cmd, build_link_show_up_cmd, build_logrotate_cmd, build_tcpdump_cmd,
};
use crate::types::RotationPolicy;

/// How long to wait for an interface to come up before capturing on it.
const IFACE_WAIT_BOUND: Duration = Duration::from_secs(2);

/// Polling interval for the interface-readiness wait.
const IFACE_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// One background capture process scoped to a single interface.
#[derive(Debug)]
pub struct CaptureJob {
    /// The monitored interface.
    pub interface: String,
    /// Where the capture file is written.
    pub output_path: PathBuf,
    /// Handle of the capture process (`None` in mock mode).
    child: Option<Child>,
}

/// Capture manager.
///
/// Starts and stops one capture collaborator per monitored interface and
/// owns the rotation-policy files. Jobs are keyed by interface name so
/// teardown terminates exactly the processes this session started.
#[derive(Debug, Default)]
pub struct CaptureMgr {
    jobs: HashMap<String, CaptureJob>,
    monitor: Option<Child>,
    monitor_started: bool,
}

impl CaptureMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a capture on `iface`, optionally restricted to `filter`.
    ///
    /// The interface must be up before the capture starts; readiness is
    /// awaited with a bounded poll and `DependencyNotReady` is returned if
    /// it never comes up.
    pub async fn start_capture(
        &mut self,
        runner: &mut Runner,
        ns: Option<&str>,
        iface: &str,
        output_dir: &Path,
        filter: Option<&str>,
    ) -> LabResult<()> {
        let probe = build_link_show_up_cmd(ns, iface);
        let outcome = poll_command(runner, &probe, IFACE_WAIT_BOUND, IFACE_WAIT_INTERVAL).await?;
        if !outcome.is_ready() {
            return Err(LabError::not_ready(
                format!("capture on {iface}"),
                format!("interface did not come up within {} ms", outcome.waited_ms()),
            ));
        }

        std::fs::create_dir_all(output_dir)?;
        let output_path = output_dir.join(format!("{iface}.pcap"));

        let cmd = build_tcpdump_cmd(ns, iface, &output_path, filter);
        let child = runner.spawn(&cmd)?;

        self.jobs.insert(
            iface.to_string(),
            CaptureJob {
                interface: iface.to_string(),
                output_path,
                child,
            },
        );
        info!(iface, ns = ns.unwrap_or("-"), "started capture");
        Ok(())
    }

    /// Stops the capture on `iface`. Idempotent: a missing job or an
    /// already-exited process is not an error.
    pub fn stop_capture(&mut self, iface: &str) {
        if let Some(mut job) = self.jobs.remove(iface) {
            if let Some(child) = job.child.as_mut() {
                if let Err(e) = child.start_kill() {
                    debug!(iface, error = %e, "capture process already gone");
                }
            }
            info!(iface = %job.interface, "stopped capture");
        }
    }

    /// Stops every capture job plus the link monitor.
    pub fn stop_all(&mut self) {
        let interfaces: Vec<String> = self.jobs.keys().cloned().collect();
        for iface in interfaces {
            self.stop_capture(&iface);
        }
        if let Some(mut monitor) = self.monitor.take() {
            if let Err(e) = monitor.start_kill() {
                debug!(error = %e, "link monitor already gone");
            }
        }
        if self.monitor_started {
            self.monitor_started = false;
            info!("stopped link-state monitor");
        }
    }

    /// Interfaces with an active capture job, in no particular order.
    pub fn active_interfaces(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    /// Writes a rotation policy config, create-once.
    ///
    /// An existing file is left byte-identical; re-running the orchestrator
    /// must not duplicate or corrupt policy files.
    pub fn write_rotation_policy(&self, config_path: &Path, policy: &RotationPolicy) -> LabResult<()> {
        if config_path.exists() {
            debug!(path = %config_path.display(), "rotation policy already present");
            return Ok(());
        }
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, policy.render())?;
        info!(path = %config_path.display(), "wrote rotation policy");
        Ok(())
    }

    /// Invokes the rotation collaborator with a state file scoped to this
    /// policy, so rotations from different namespaces never interfere.
    pub async fn rotate_now(
        &self,
        runner: &mut Runner,
        config_path: &Path,
        state_path: &Path,
    ) -> LabResult<()> {
        runner
            .run_checked(&build_logrotate_cmd(config_path, state_path))
            .await?;
        Ok(())
    }

    /// Starts the always-on rtnetlink link-event monitor appending to a
    /// shared log file.
    pub fn start_link_monitor(&mut self, runner: &mut Runner, log_file: &Path) -> LabResult<()> {
        if self.monitor_started {
            warn!("link monitor already running");
            return Ok(());
        }
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.monitor = runner.spawn(&build_link_monitor_cmd(log_file))?;
        self.monitor_started = true;
        info!(log = %log_file.display(), "started link-state monitor");
        Ok(())
    }
}
