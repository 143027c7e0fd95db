//! Escalating shutdown: interrupt, then terminate, then kill.
//!
//! An abrupt kill can leave the server holding a session it believes is
//! active, so the client first gets a chance to send its disconnect. Every
//! failure along the way is logged and swallowed; `stop` always returns.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::process::{ClientProcess, SignalLevel};

/// Grace window given to the first polite signal.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Which step ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No handle was given.
    NoProcess,
    /// The process had already exited; nothing was sent.
    AlreadyExited,
    /// Exited within the grace window after the interrupt.
    Interrupted,
    /// Exited within half the grace window after the terminate request.
    Terminated,
    /// Had to be force-killed.
    Killed,
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProcess => write!(f, "no_process"),
            Self::AlreadyExited => write!(f, "already_exited"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Terminated => write!(f, "terminated"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownSequencer {
    grace: Duration,
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl ShutdownSequencer {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Stop `process`, escalating until it is gone. Idempotent.
    pub async fn stop<P>(&self, process: Option<&mut P>) -> ShutdownOutcome
    where
        P: ClientProcess + ?Sized,
    {
        let Some(process) = process else {
            return ShutdownOutcome::NoProcess;
        };

        if exited(process) {
            return ShutdownOutcome::AlreadyExited;
        }

        let steps = [
            (SignalLevel::Interrupt, self.grace, ShutdownOutcome::Interrupted),
            (SignalLevel::Terminate, self.grace / 2, ShutdownOutcome::Terminated),
        ];
        for (level, window, outcome) in steps {
            if let Err(e) = process.signal(level) {
                debug!(step = %level, error = %e, "signal not delivered");
            }
            if wait_within(process, window).await {
                return outcome;
            }
            debug!(step = %level, window_ms = window.as_millis() as u64, "still running");
        }

        if let Err(e) = process.force_kill().await {
            debug!(error = %e, "force kill failed");
        }
        ShutdownOutcome::Killed
    }
}

fn exited<P: ClientProcess + ?Sized>(process: &mut P) -> bool {
    match process.try_wait() {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(e) => {
            // Treat an unqueryable child as gone; there is nothing left to signal.
            debug!(error = %e, "liveness check failed");
            true
        }
    }
}

async fn wait_within<P: ClientProcess + ?Sized>(process: &mut P, window: Duration) -> bool {
    match tokio::time::timeout(window, process.wait()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "wait failed during shutdown");
            false
        }
        Err(_) => false,
    }
}
