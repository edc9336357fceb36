//! Shell command execution for topology daemons.
//!
//! Provides safe shell command execution with proper quoting to prevent
//! command injection, plus a [`Runner`] that transparently prefixes `sudo`
//! when the daemon is not running as root and can run in mock mode for
//! tests (commands are captured instead of executed).
//!
//! # Example
//!
//! ```ignore
//! use labnet_common::shell::{Runner, IP_CMD, shellquote};
//!
//! let mut runner = Runner::detect().await?;
//! let cmd = format!("{} link set dev {} mtu {}",
//!     IP_CMD, shellquote("veth0"), shellquote("1462"));
//! runner.run_checked(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::error::{LabError, LabResult};

/// Path to the `ip` command for namespace/link/macsec configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `tcpdump` capture tool.
pub const TCPDUMP_CMD: &str = "/usr/bin/tcpdump";

/// Path to the `wpa_supplicant` MKA supplicant.
pub const WPA_SUPPLICANT_CMD: &str = "/usr/sbin/wpa_supplicant";

/// Path to the `logrotate` tool.
pub const LOGROTATE_CMD: &str = "/usr/sbin/logrotate";

/// Path to the `sudo` privilege-elevation wrapper.
pub const SUDO_CMD: &str = "/usr/bin/sudo";

/// Path to the `kill` command for signalling supplicants.
pub const KILL_CMD: &str = "/bin/kill";

/// Path to the `id` command used for privilege detection.
pub const ID_CMD: &str = "/usr/bin/id";

/// Path to the `xterm` terminal emulator for per-namespace shells.
pub const XTERM_CMD: &str = "/usr/bin/xterm";

/// Path to the `iperf3` bandwidth measurement tool.
pub const IPERF_CMD: &str = "/usr/bin/iperf3";

/// Path to `grep`, used in probe pipelines.
pub const GREP_CMD: &str = "/bin/grep";

/// Path to the `bash` shell.
pub const BASH_CMD: &str = "/bin/bash";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Wraps the string in double quotes and escapes any characters that have
/// special meaning inside double quotes: `$`, `` ` ``, `"`, `\`, newline.
///
/// # Example
///
/// ```
/// use labnet_common::shell::shellquote;
///
/// assert_eq!(shellquote("veth0"), "\"veth0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The trimmed stdout output.
    pub stdout: String,
    /// The trimmed stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a command runner with optional `sudo` prefixing and mock mode.
///
/// Every topology component funnels its commands through one of these.
/// In mock mode nothing is executed; command strings are captured so tests
/// can assert on ordering and contents.
#[derive(Debug)]
pub struct Runner {
    use_sudo: bool,
    mock_mode: bool,
    captured: Vec<String>,
}

impl Runner {
    /// Creates a runner with an explicit sudo setting.
    pub fn new(use_sudo: bool) -> Self {
        Self {
            use_sudo,
            mock_mode: false,
            captured: Vec::new(),
        }
    }

    /// Creates a mock runner that captures commands instead of running them.
    pub fn mock() -> Self {
        Self {
            use_sudo: false,
            mock_mode: true,
            captured: Vec::new(),
        }
    }

    /// Detects whether the current process is root and configures sudo
    /// prefixing accordingly.
    pub async fn detect() -> LabResult<Self> {
        let out = exec(&format!("{} -u", ID_CMD)).await?;
        let use_sudo = out.stdout.trim() != "0";
        if use_sudo {
            tracing::info!("not running as root, prefixing commands with sudo");
        }
        Ok(Self::new(use_sudo))
    }

    /// Commands captured in mock mode, in execution order.
    pub fn captured_commands(&self) -> &[String] {
        &self.captured
    }

    fn command_for(&self, cmd: &str) -> Command {
        if self.use_sudo {
            let mut c = Command::new(SUDO_CMD);
            c.arg("/bin/sh").arg("-c").arg(cmd);
            c
        } else {
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(cmd);
            c
        }
    }

    /// Executes a command, returning its result without judging the exit code.
    pub async fn run(&mut self, cmd: &str) -> LabResult<ExecResult> {
        if self.mock_mode {
            self.captured.push(cmd.to_string());
            return Ok(ExecResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        tracing::debug!(command = %cmd, "executing");

        let output = self
            .command_for(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| LabError::ShellExec {
                command: cmd.to_string(),
                source: e,
            })?;

        let result = ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !result.success() {
            tracing::warn!(
                command = %cmd,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "command failed"
            );
        }

        Ok(result)
    }

    /// Executes a command and returns an error on non-zero exit.
    pub async fn run_checked(&mut self, cmd: &str) -> LabResult<String> {
        let result = self.run(cmd).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(LabError::CommandFailed {
                command: cmd.to_string(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }

    /// Spawns a long-running background collaborator.
    ///
    /// Returns `None` in mock mode (the command string is still captured).
    /// Stdout/stderr are discarded; collaborators that need output are given
    /// their own log files on the command line.
    pub fn spawn(&mut self, cmd: &str) -> LabResult<Option<Child>> {
        if self.mock_mode {
            self.captured.push(format!("spawn: {cmd}"));
            return Ok(None);
        }

        tracing::debug!(command = %cmd, "spawning background process");

        let child = self
            .command_for(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LabError::ShellExec {
                command: cmd.to_string(),
                source: e,
            })?;

        Ok(Some(child))
    }
}

/// Executes a shell command asynchronously without sudo prefixing.
///
/// Runs through `/bin/sh -c` to support pipes and redirects.
pub async fn exec(cmd: &str) -> LabResult<ExecResult> {
    tracing::debug!(command = %cmd, "executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| LabError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    Ok(ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("veth0"), "\"veth0\"");
        assert_eq!(shellquote("1462"), "\"1462\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert_eq!(result.combined_output(), "stdout\nstderr");

        let result = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "error".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "error");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_failure() {
        let result = exec("exit 42").await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_runner_mock_captures() {
        let mut runner = Runner::mock();
        runner.run("ip link show").await.unwrap();
        runner.run_checked("ip netns add ns1").await.unwrap();
        let child = runner.spawn("tcpdump -i veth0").unwrap();
        assert!(child.is_none());

        assert_eq!(
            runner.captured_commands(),
            &[
                "ip link show".to_string(),
                "ip netns add ns1".to_string(),
                "spawn: tcpdump -i veth0".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_runner_run_checked_failure() {
        let mut runner = Runner::new(false);
        let result = runner.run_checked("exit 3").await;
        match result {
            Err(LabError::CommandFailed { exit_code, .. }) => assert_eq!(exit_code, 3),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }
}
