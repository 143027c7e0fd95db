//! Periodic OpenVPN reachability checks.
//!
//! Every cycle discovers the `*.ovpn` profiles in a directory, tries each one
//! in turn with [`supervision::ConnectionAttempt`], and sends a report of the
//! failures:
//! - [`config`]: defaults, TOML file and environment overrides
//! - [`discovery`]: profile lookup
//! - [`cycle`]: the serial check loop
//! - [`report`]: report rendering, Telegram and log delivery

pub mod config;
pub mod cycle;
pub mod discovery;
pub mod report;

pub use config::{TelegramConfig, WatchConfig};
pub use cycle::{CycleSummary, Watcher};
pub use report::{EndpointStatus, LogReporter, Reporter, TelegramReporter};
