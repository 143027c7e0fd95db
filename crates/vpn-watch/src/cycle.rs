//! Check cycles: probe every profile in turn, then report.

use std::time::Duration;

use anyhow::Result;
use supervision::{AttemptOutcome, ClientLauncher, ConnectionAttempt, EndpointConfig, ProbeError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WatchConfig;
use crate::discovery::discover_configs;
use crate::report::{EndpointStatus, Reporter};

/// Counts from one finished cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub total: usize,
    pub failed: usize,
}

pub struct Watcher<L, R> {
    config: WatchConfig,
    attempt: ConnectionAttempt<L>,
    reporter: R,
    cancel: CancellationToken,
}

impl<L: ClientLauncher, R: Reporter> Watcher<L, R> {
    /// `cancel` should be the same token the attempt was built with.
    pub fn new(
        config: WatchConfig,
        attempt: ConnectionAttempt<L>,
        reporter: R,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            attempt,
            reporter,
            cancel,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Probe `endpoints` one at a time.
    ///
    /// Stops early when cancelled; the interrupted attempt is not included.
    pub async fn check_all(&self, endpoints: &[EndpointConfig]) -> Vec<EndpointStatus> {
        let mut statuses = Vec::with_capacity(endpoints.len());

        for (i, endpoint) in endpoints.iter().enumerate() {
            if i > 0 && !self.settle(self.config.settle_delay).await {
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            info!(endpoint = %endpoint.name, path = %endpoint.path.display(), "Checking endpoint");
            let raw = self
                .attempt
                .try_connect(endpoint, self.config.attempt_timeout)
                .await;
            if matches!(raw.error, Some(ProbeError::Cancelled)) {
                info!(endpoint = %endpoint.name, "Check cancelled");
                break;
            }

            let elapsed_ms = raw.elapsed.as_millis() as u64;
            let outcome = AttemptOutcome::from_attempt(raw, self.config.output_tail);
            if outcome.success {
                info!(endpoint = %endpoint.name, elapsed_ms, "Endpoint OK");
            } else {
                warn!(
                    endpoint = %endpoint.name,
                    elapsed_ms,
                    category = %outcome.error_category,
                    "Endpoint failed"
                );
            }

            statuses.push(EndpointStatus {
                config: endpoint.clone(),
                outcome,
            });
        }

        statuses
    }

    /// Sleep for `delay` unless cancelled first. Returns false on cancellation.
    async fn settle(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Discover profiles, probe them all, and hand the statuses to the reporter.
    pub async fn run_once(&self) -> Result<CycleSummary> {
        let endpoints = discover_configs(&self.config.config_dir)?;
        if endpoints.is_empty() {
            warn!(dir = %self.config.config_dir.display(), "No .ovpn profiles found");
        }

        let statuses = self.check_all(&endpoints).await;
        let summary = CycleSummary {
            total: statuses.len(),
            failed: statuses.iter().filter(|s| s.failed()).count(),
        };

        if self.cancel.is_cancelled() {
            info!(checked = summary.total, "Cycle cancelled, report skipped");
            return Ok(summary);
        }

        if let Err(e) = self.reporter.send_report(&statuses).await {
            error!(error = %format!("{e:#}"), "Failed to deliver report");
        }
        info!(total = summary.total, failed = summary.failed, "Check cycle completed");
        Ok(summary)
    }

    /// Run cycles until cancelled: one right away, then one per `check_interval`.
    pub async fn run(&self) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_once().await {
                error!(error = %format!("{e:#}"), "Check cycle failed");
            }
        }
        info!("Watcher stopped");
    }
}
