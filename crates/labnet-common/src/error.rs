//! Error types for topology lifecycle operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for labnet operations.
pub type LabResult<T> = Result<T, LabError>;

/// Errors that can occur while building or tearing down a topology.
#[derive(Debug, Error)]
pub enum LabError {
    /// Failed to spawn a shell command at all.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// An external tool returned a non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// A namespace or link with this name already exists.
    #[error("{kind} '{name}' already exists")]
    ResourceExists {
        /// Resource kind ("namespace", "link", ...).
        kind: String,
        /// The colliding name.
        name: String,
    },

    /// An operation was attempted before its prerequisite was ready.
    #[error("Dependency not ready for {what}: {detail}")]
    DependencyNotReady {
        /// What was being attempted.
        what: String,
        /// Why the prerequisite is missing.
        detail: String,
    },

    /// Dynamic key agreement did not produce a secure channel in time.
    #[error("MKA negotiation timed out waiting for '{interface}' after {waited_ms} ms")]
    NegotiationTimeout {
        /// The secure-channel interface that never appeared.
        interface: String,
        /// Total time waited.
        waited_ms: u64,
    },

    /// A namespace or interface name failed validation.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Validation failure reason.
        reason: String,
    },

    /// Filesystem operation failed (config files, pid files, log dirs).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl LabError {
    /// Creates a resource-exists error.
    pub fn resource_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ResourceExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a dependency-not-ready error.
    pub fn not_ready(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::DependencyNotReady {
            what: what.into(),
            detail: detail.into(),
        }
    }

    /// Creates a negotiation-timeout error.
    pub fn negotiation_timeout(interface: impl Into<String>, waited_ms: u64) -> Self {
        Self::NegotiationTimeout {
            interface: interface.into(),
            waited_ms,
        }
    }

    /// Creates an invalid-name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error may be swallowed during teardown.
    ///
    /// Teardown stages log these and keep going; anything else indicates
    /// a bug in the teardown sequencing itself.
    pub fn is_teardown_tolerable(&self) -> bool {
        matches!(
            self,
            LabError::CommandFailed { .. }
                | LabError::ShellExec { .. }
                | LabError::Io(_)
        )
    }
}
