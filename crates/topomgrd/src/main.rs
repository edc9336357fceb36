//! Topology Manager Daemon Entry Point

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use labnet_common::Runner;
use topomgrd::{LabConfig, Orchestrator};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "topomgrd", about = "MACsec lab topology lifecycle manager")]
struct Cli {
    /// Directory for captures, rotation policies, and monitor logs
    #[arg(long, global = true, default_value = "/var/log/labnet")]
    log_dir: PathBuf,

    /// Skip interactive prompts and use the flag values as-is
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand)]
enum Scenario {
    /// Two sites joined by a GRE tunnel, optionally protected by
    /// static-key MACsec
    Wan {
        /// Enable the static-key MACsec overlay on the tunnel
        #[arg(long)]
        macsec: bool,

        /// Open an xterm per namespace
        #[arg(long)]
        shells: bool,
    },
    /// N peer namespaces on a shared bridge with MKA-negotiated MACsec
    Lan {
        /// Number of peer namespaces
        #[arg(long, default_value_t = 3)]
        namespaces: usize,

        /// Open an xterm per namespace
        #[arg(long)]
        shells: bool,
    },
}

/// Asks a yes/no question on stdin, falling back to `default` on empty
/// or unreadable input.
fn prompt_bool(question: &str, default: bool) -> bool {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    print!("{question} {hint} ");
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return default;
    }
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    }
}

fn prompt_count(question: &str, default: usize) -> usize {
    print!("{question} [{default}] ");
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return default;
    }
    line.trim().parse().unwrap_or(default)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.scenario {
        Scenario::Wan { macsec, shells } => {
            let macsec = if cli.yes || macsec {
                macsec
            } else {
                prompt_bool("Enable MACsec protection on the tunnel?", false)
            };
            let shells = if cli.yes || shells {
                shells
            } else {
                prompt_bool("Open a terminal per namespace?", false)
            };
            LabConfig::wan(macsec, shells, cli.log_dir)
        }
        Scenario::Lan { namespaces, shells } => {
            let namespaces = if cli.yes {
                namespaces
            } else {
                prompt_count("Number of peer namespaces?", namespaces)
            };
            if namespaces < 2 {
                error!("a LAN needs at least 2 peer namespaces");
                std::process::exit(1);
            }
            let shells = if cli.yes || shells {
                shells
            } else {
                prompt_bool("Open a terminal per namespace?", false)
            };
            LabConfig::lan(namespaces, shells, cli.log_dir)
        }
    };

    let runner = match Runner::detect().await {
        Ok(runner) => runner,
        Err(e) => {
            error!("privilege detection failed: {}", e);
            std::process::exit(1);
        }
    };

    info!("starting topomgrd");
    let mut orch = Orchestrator::new(config, runner);

    // run() unwinds whatever was built even when setup fails
    let report = match orch.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("setup failed: {}", e);
            std::process::exit(1);
        }
    };

    for stage in &report.stages {
        for err in &stage.errors {
            error!(stage = stage.stage, "teardown error: {}", err);
        }
    }
    let leaked = orch.leaked_namespaces();
    if !leaked.is_empty() {
        error!(namespaces = ?leaked, "namespaces were not cleaned up");
    }

    // The session reached operational state; teardown problems are
    // reported above but do not fail the run.
    info!("topomgrd finished");
}
