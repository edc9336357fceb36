//! Bounded readiness polling.
//!
//! Background collaborators (the kernel creating a link, a supplicant
//! completing key agreement) signal readiness only through observable
//! state. Instead of fixed sleeps, callers poll a probe command at a
//! fixed interval until it succeeds or the bound elapses.

use std::time::{Duration, Instant};

use crate::error::LabResult;
use crate::shell::Runner;

/// Outcome of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The probe succeeded within the bound.
    Ready {
        /// How long readiness took.
        waited_ms: u64,
    },
    /// The bound elapsed without the probe succeeding.
    TimedOut {
        /// Total time waited, including the final check.
        waited_ms: u64,
    },
}

impl PollOutcome {
    /// Returns true if the poll succeeded.
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    /// Time spent waiting, in milliseconds.
    pub fn waited_ms(&self) -> u64 {
        match self {
            PollOutcome::Ready { waited_ms } | PollOutcome::TimedOut { waited_ms } => *waited_ms,
        }
    }
}

/// Runs `probe` every `interval` until it exits zero or `bound` elapses.
///
/// The probe is always run at least once, so a zero bound still performs
/// one check. Spawn failures abort the poll immediately; a non-zero exit
/// just means "not ready yet".
pub async fn poll_command(
    runner: &mut Runner,
    probe: &str,
    bound: Duration,
    interval: Duration,
) -> LabResult<PollOutcome> {
    let start = Instant::now();

    loop {
        if runner.run(probe).await?.success() {
            return Ok(PollOutcome::Ready {
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }

        if start.elapsed() >= bound {
            return Ok(PollOutcome::TimedOut {
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }

        tokio::time::sleep(interval).await;
    }
}
