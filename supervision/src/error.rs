//! Attempt error taxonomy.
//!
//! Every failure of a single connection attempt is represented here. None of
//! them are fatal to the caller: they travel inside a [`crate::RawAttempt`]
//! and are turned into a human-readable category by
//! [`crate::AttemptOutcome::from_attempt`].

use std::time::Duration;

use thiserror::Error;

use crate::process::ClientExit;

/// Result type alias for supervision operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// The client binary could not be started (missing, not executable, ...).
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No success marker appeared within the attempt budget.
    #[error("timeout exceeded ({}s)", .0.as_secs())]
    Timeout(Duration),

    /// The client exited on its own with a failing status.
    #[error("client exited with {0}")]
    Exited(ClientExit),

    /// Waiting on the child failed at the OS level.
    #[error("failed to wait on client: {0}")]
    Wait(#[source] std::io::Error),

    /// The host is shutting down; the client was killed without escalation.
    #[error("attempt cancelled by host shutdown")]
    Cancelled,

    /// A zero-length budget can never observe a marker.
    #[error("attempt timeout must be greater than zero")]
    InvalidTimeout,
}

impl ProbeError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_uses_whole_seconds() {
        let err = ProbeError::Timeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "timeout exceeded (90s)");
        assert!(err.is_timeout());
    }

    #[test]
    fn spawn_error_names_the_program() {
        let err = ProbeError::spawn(
            "openvpn",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            err.to_string(),
            "failed to start openvpn: No such file or directory"
        );
        assert!(!err.is_timeout());
    }

    #[test]
    fn exit_error_shows_code() {
        let err = ProbeError::Exited(ClientExit { code: Some(1) });
        assert_eq!(err.to_string(), "client exited with exit code 1");
    }
}
