//! vpn-watch: check every OpenVPN profile on a schedule and report failures.
//!
//! # Usage
//!
//! ```bash
//! # Check ./ovpn every 30 minutes, report to Telegram
//! TELEGRAM_BOT_TOKEN=... TELEGRAM_CHAT_ID=... vpn-watch
//!
//! # One cycle, report to the log only
//! vpn-watch --config-dir /etc/openvpn/profiles --once --dry-run
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use supervision::{ConnectionAttempt, OpenVpnLauncher};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vpn_watch::config::{parse_duration, WatchConfig};
use vpn_watch::{LogReporter, Reporter, TelegramReporter, Watcher};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing *.ovpn profiles (overrides VPN_CONFIG_DIR)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Time between cycles, e.g. 30m or 1h (overrides CHECK_INTERVAL)
    #[arg(long, value_parser = duration_arg)]
    interval: Option<Duration>,

    /// Budget for one connection attempt, e.g. 90s (overrides CONNECT_TIMEOUT)
    #[arg(long, value_parser = duration_arg)]
    timeout: Option<Duration>,

    /// Run a single cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Log the report instead of sending it to Telegram
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = WatchConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.config_dir {
        config.config_dir = dir;
    }
    if let Some(interval) = args.interval {
        config.check_interval = interval;
    }
    if let Some(timeout) = args.timeout {
        config.attempt_timeout = timeout;
    }
    config.validate(!args.dry_run)?;

    info!(
        dir = %config.config_dir.display(),
        interval_s = config.check_interval.as_secs(),
        timeout_s = config.attempt_timeout.as_secs(),
        binary = %config.openvpn_binary.display(),
        dry_run = args.dry_run,
        "vpn-watch starting"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
        on_signal.cancel();
    });

    if args.dry_run {
        let reporter = LogReporter::new(config.output_limit);
        drive(config, reporter, cancel, args.once).await
    } else {
        let telegram = config
            .telegram
            .clone()
            .context("Telegram credentials missing")?;
        let reporter = TelegramReporter::new(telegram, config.output_limit, config.message_limit);
        drive(config, reporter, cancel, args.once).await
    }
}

async fn drive<R: Reporter>(
    config: WatchConfig,
    reporter: R,
    cancel: CancellationToken,
    once: bool,
) -> Result<()> {
    let attempt = ConnectionAttempt::new(OpenVpnLauncher::new(config.openvpn_binary.clone()))
        .with_grace(config.grace_window)
        .with_cancellation(cancel.clone());
    let watcher = Watcher::new(config, attempt, reporter, cancel);

    if once {
        let summary = watcher.run_once().await?;
        info!(total = summary.total, failed = summary.failed, "Single cycle finished");
    } else {
        watcher.run().await;
    }
    Ok(())
}
