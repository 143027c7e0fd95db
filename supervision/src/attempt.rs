//! One bounded connection attempt.
//!
//! Spawns the client, then waits in a single biased `select!` on host
//! cancellation, the attempt deadline, the client exiting on its own, and a
//! fixed-period poll of the captured output for a success marker.
//!
//! ```text
//! spawn ─┬─ tick: marker seen ──────────► shutdown ─► success
//!        ├─ deadline: marker seen ──────► shutdown ─► success
//!        ├─ deadline: no marker ────────► shutdown ─► Timeout
//!        ├─ exit: marker in drained log ► success
//!        ├─ exit: clean, no marker ─────► success
//!        ├─ exit: error, no marker ─────► Exited (classified from log)
//!        └─ host cancel ────────────────► force kill ─► Cancelled
//! ```
//!
//! Error markers seen mid-stream never end the attempt early; a late
//! success marker would otherwise be missed. Classification happens after
//! the fact in [`crate::AttemptOutcome::from_attempt`].

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::outcome::{EndpointConfig, RawAttempt};
use crate::process::{ClientExit, ClientLauncher, ClientProcess};
use crate::shutdown::{ShutdownSequencer, DEFAULT_GRACE};

/// How often the captured output is inspected.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Literal substrings the client prints once the tunnel is operational.
pub const SUCCESS_MARKERS: &[&str] = &["PUSH_REPLY", "Initialization Sequence Completed"];

pub fn has_success_marker(output: &str) -> bool {
    SUCCESS_MARKERS.iter().any(|m| output.contains(m))
}

enum Verdict {
    Connected,
    TimedOut,
    Exited(std::io::Result<ClientExit>),
    Cancelled,
}

/// Runs bounded attempts with one launcher. Attempts are not meant to overlap;
/// the caller serializes them.
#[derive(Debug)]
pub struct ConnectionAttempt<L> {
    launcher: L,
    poll_interval: Duration,
    shutdown: ShutdownSequencer,
    cancel: CancellationToken,
}

impl<L: ClientLauncher> ConnectionAttempt<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            poll_interval: POLL_INTERVAL,
            shutdown: ShutdownSequencer::new(DEFAULT_GRACE),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.shutdown = ShutdownSequencer::new(grace);
        self
    }

    /// Host-level shutdown token. Firing it kills an in-flight client outright.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Try to bring up a tunnel for `config` within `timeout`.
    ///
    /// The client is always gone (exited, shut down or killed) by the time
    /// this returns.
    pub async fn try_connect(&self, config: &EndpointConfig, timeout: Duration) -> RawAttempt {
        let started = Instant::now();
        let failed = |error: ProbeError| RawAttempt {
            output: String::new(),
            success: false,
            error: Some(error),
            elapsed: started.elapsed(),
        };

        if timeout.is_zero() {
            return failed(ProbeError::InvalidTimeout);
        }

        let mut process = match self.launcher.launch(config).await {
            Ok(process) => process,
            Err(e) => {
                warn!(endpoint = %config.name, error = %e, "client did not start");
                return failed(e);
            }
        };
        let output = process.output();
        debug!(endpoint = %config.name, pid = ?process.id(), timeout_s = timeout.as_secs(), "attempt started");

        let deadline = tokio::time::sleep_until(started + timeout);
        tokio::pin!(deadline);
        let mut ticker =
            tokio::time::interval_at(started + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let verdict = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Verdict::Cancelled,
                _ = &mut deadline => {
                    // A marker captured before the deadline still counts;
                    // anything written after this check does not.
                    if has_success_marker(&output.snapshot()) {
                        break Verdict::Connected;
                    }
                    break Verdict::TimedOut;
                }
                exit = process.wait() => break Verdict::Exited(exit),
                _ = ticker.tick() => {
                    if has_success_marker(&output.snapshot()) {
                        break Verdict::Connected;
                    }
                }
            }
        };

        let (success, error) = match verdict {
            Verdict::Connected => {
                let step = self.shutdown.stop(Some(&mut process)).await;
                info!(endpoint = %config.name, elapsed_ms = started.elapsed().as_millis() as u64, %step, "tunnel established");
                (true, None)
            }
            Verdict::TimedOut => {
                let step = self.shutdown.stop(Some(&mut process)).await;
                warn!(endpoint = %config.name, timeout_s = timeout.as_secs(), %step, "no success marker before deadline");
                (false, Some(ProbeError::Timeout(timeout)))
            }
            Verdict::Exited(Ok(exit)) => {
                let connected = has_success_marker(&output.snapshot());
                debug!(endpoint = %config.name, %exit, connected, "client exited on its own");
                if connected || exit.success() {
                    (true, None)
                } else {
                    (false, Some(ProbeError::Exited(exit)))
                }
            }
            Verdict::Exited(Err(e)) => {
                let step = self.shutdown.stop(Some(&mut process)).await;
                warn!(endpoint = %config.name, error = %e, %step, "lost track of client");
                (has_success_marker(&output.snapshot()), Some(ProbeError::Wait(e)))
            }
            Verdict::Cancelled => {
                if let Err(e) = process.force_kill().await {
                    debug!(endpoint = %config.name, error = %e, "kill on cancel failed");
                }
                info!(endpoint = %config.name, "attempt cancelled");
                (false, Some(ProbeError::Cancelled))
            }
        };

        RawAttempt {
            output: output.snapshot(),
            // A wait error is reported even if a marker was seen.
            success: success && error.is_none(),
            error,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SignalLevel;
    use crate::testing::{ScriptedLauncher, ScriptedProcess};

    fn endpoint() -> EndpointConfig {
        EndpointConfig::new("office", "/etc/openvpn/office.ovpn")
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn markers_are_case_sensitive() {
        assert!(has_success_marker("... PUSH_REPLY,route-gateway 10.8.0.1"));
        assert!(has_success_marker("Initialization Sequence Completed"));
        assert!(!has_success_marker("push_reply"));
        assert!(!has_success_marker("initialization sequence completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn push_reply_is_seen_on_next_tick() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder()
                .line(ms(300), "TCP/UDP: Preserving recently used remote address")
                .line(ms(1200), "PUSH: Received control message: 'PUSH_REPLY,route 10.8.0.1'"),
        );
        let attempt = ConnectionAttempt::new(launcher);

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(90)).await;

        assert!(raw.success, "{raw:?}");
        assert!(raw.error.is_none());
        assert!(raw.elapsed >= ms(1200) && raw.elapsed <= ms(1700), "{:?}", raw.elapsed);
        assert!(raw.output.contains("PUSH_REPLY"));
        assert_eq!(attempt.launcher().signals(), vec![SignalLevel::Interrupt]);
        assert_eq!(attempt.launcher().kills(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_marker_times_out_and_shuts_down() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder().line(ms(100), "TLS: Initial packet from [AF_INET]1.2.3.4:1194"),
        );
        let attempt = ConnectionAttempt::new(launcher);

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(2)).await;

        assert!(!raw.success);
        assert!(matches!(raw.error, Some(ProbeError::Timeout(t)) if t == Duration::from_secs(2)));
        assert!(raw.elapsed >= Duration::from_secs(2) && raw.elapsed < ms(2500));
        assert_eq!(attempt.launcher().signals(), vec![SignalLevel::Interrupt]);
    }

    #[tokio::test(start_paused = true)]
    async fn marker_after_deadline_is_ignored() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder()
                .line(ms(3000), "Initialization Sequence Completed")
                .exits_on(SignalLevel::Terminate, ms(10)),
        );
        let attempt = ConnectionAttempt::new(launcher).with_grace(Duration::from_secs(2));

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(2)).await;

        // The marker lands during the shutdown sequence, after the deadline.
        assert!(!raw.success);
        assert!(raw.error.as_ref().is_some_and(ProbeError::is_timeout));
        assert!(raw.output.contains("Initialization Sequence Completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn marker_in_final_poll_window_counts() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder().line(ms(1900), "Initialization Sequence Completed"),
        );
        let attempt = ConnectionAttempt::new(launcher);

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(2)).await;

        assert!(raw.success);
        assert!(raw.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn marker_wins_over_concurrent_exit() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder()
                .line(ms(100), "Initialization Sequence Completed")
                .exit_with(ms(200), 1),
        );
        let attempt = ConnectionAttempt::new(launcher);

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(90)).await;

        assert!(raw.success);
        assert!(raw.error.is_none());
        assert!(raw.elapsed < ms(500));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_exit_is_reported_without_signals() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder()
                .line(ms(400), "AUTH: Received control message: AUTH_FAILED")
                .line(ms(800), "SIGTERM[soft,auth-failure] received, process exiting")
                .exit_with(ms(900), 1),
        );
        let attempt = ConnectionAttempt::new(launcher);

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(90)).await;

        // AUTH_FAILED at 400ms did not end the attempt early
        assert!(raw.elapsed >= ms(900));
        assert!(!raw.success);
        assert!(matches!(raw.error, Some(ProbeError::Exited(ClientExit { code: Some(1) }))));
        assert!(raw.output.contains("AUTH_FAILED"));
        assert!(attempt.launcher().signals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clean_exit_counts_as_success() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder()
                .line(ms(10), "OpenVPN 2.6.8 x86_64-pc-linux-gnu")
                .exit_at(ms(50)),
        );
        let attempt = ConnectionAttempt::new(launcher);

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(90)).await;

        assert!(raw.success);
        assert!(raw.error.is_none());
        assert!(raw.elapsed < ms(500));
        assert!(attempt.launcher().signals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_is_immediate() {
        let attempt = ConnectionAttempt::new(ScriptedLauncher::failing());

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(90)).await;

        assert!(!raw.success);
        assert!(matches!(raw.error, Some(ProbeError::Spawn { .. })));
        assert!(raw.output.is_empty());
        assert_eq!(raw.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_is_rejected_before_spawn() {
        let attempt = ConnectionAttempt::new(ScriptedLauncher::new(ScriptedProcess::builder()));

        let raw = attempt.try_connect(&endpoint(), Duration::ZERO).await;

        assert!(matches!(raw.error, Some(ProbeError::InvalidTimeout)));
        assert_eq!(attempt.launcher().launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn host_cancellation_kills_without_escalation() {
        let token = CancellationToken::new();
        let attempt = ConnectionAttempt::new(ScriptedLauncher::new(ScriptedProcess::builder()))
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(90)).await;
        canceller.await.unwrap();

        assert!(matches!(raw.error, Some(ProbeError::Cancelled)));
        assert!(attempt.launcher().signals().is_empty());
        assert_eq!(attempt.launcher().kills(), 1);
        assert!(raw.elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_poll_interval() {
        let launcher = ScriptedLauncher::new(
            ScriptedProcess::builder().line(ms(120), "PUSH_REPLY"),
        );
        let attempt = ConnectionAttempt::new(launcher).with_poll_interval(ms(50));

        let raw = attempt.try_connect(&endpoint(), Duration::from_secs(5)).await;

        assert!(raw.success);
        assert!(raw.elapsed <= ms(150), "{:?}", raw.elapsed);
    }
}
