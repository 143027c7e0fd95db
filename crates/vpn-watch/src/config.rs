//! Watcher configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Command-line flags (applied in `main`)
//! 2. Environment variables
//! 3. TOML file given with `--config`
//! 4. Built-in defaults
//!
//! | Variable             | Field              | Default     |
//! |----------------------|--------------------|-------------|
//! | `VPN_CONFIG_DIR`     | `config_dir`       | `./ovpn`    |
//! | `CHECK_INTERVAL`     | `check_interval`   | `30m`       |
//! | `CONNECT_TIMEOUT`    | `attempt_timeout`  | `90s`       |
//! | `OPENVPN_BINARY`     | `openvpn_binary`   | `openvpn`   |
//! | `TELEGRAM_BOT_TOKEN` | `telegram.bot_token` | —         |
//! | `TELEGRAM_CHAT_ID`   | `telegram.chat_id` | —           |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use tracing::warn;

const ENV_CONFIG_DIR: &str = "VPN_CONFIG_DIR";
const ENV_CHECK_INTERVAL: &str = "CHECK_INTERVAL";
const ENV_CONNECT_TIMEOUT: &str = "CONNECT_TIMEOUT";
const ENV_OPENVPN_BINARY: &str = "OPENVPN_BINARY";
const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
const ENV_TELEGRAM_CHAT: &str = "TELEGRAM_CHAT_ID";

/// Telegram bot credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
}

impl TelegramConfig {
    fn is_complete(&self) -> bool {
        !self.bot_token.is_empty() && self.chat_id != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory scanned for `*.ovpn` profiles.
    pub config_dir: PathBuf,
    /// Time between check cycles.
    #[serde(deserialize_with = "de_duration")]
    pub check_interval: Duration,
    /// Budget for one connection attempt.
    #[serde(deserialize_with = "de_duration")]
    pub attempt_timeout: Duration,
    /// Pause between two attempts so at most one client runs at a time.
    #[serde(deserialize_with = "de_duration")]
    pub settle_delay: Duration,
    /// Grace window for the interrupt step of a shutdown.
    #[serde(deserialize_with = "de_duration")]
    pub grace_window: Duration,
    /// Maximum lines in a failure excerpt.
    pub output_tail: usize,
    /// Maximum characters of excerpt per failed endpoint in a report.
    pub output_limit: usize,
    /// Maximum characters per report message.
    pub message_limit: usize,
    pub openvpn_binary: PathBuf,
    pub telegram: Option<TelegramConfig>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("./ovpn"),
            check_interval: Duration::from_secs(30 * 60),
            attempt_timeout: Duration::from_secs(90),
            settle_delay: Duration::from_secs(2),
            grace_window: supervision::shutdown::DEFAULT_GRACE,
            output_tail: 10,
            output_limit: 3000,
            message_limit: 4000,
            openvpn_binary: PathBuf::from(supervision::process::DEFAULT_BINARY),
            telegram: None,
        }
    }
}

impl WatchConfig {
    /// Defaults, overlaid with `path` (if any) and then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML {}", path.display()))
    }

    /// Overlay values found through `lookup`. Unparsable values are logged and skipped.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_CONFIG_DIR) {
            self.config_dir = PathBuf::from(dir);
        }
        if let Some(bin) = lookup(ENV_OPENVPN_BINARY) {
            self.openvpn_binary = PathBuf::from(bin);
        }
        env_duration(&lookup, ENV_CHECK_INTERVAL, &mut self.check_interval);
        env_duration(&lookup, ENV_CONNECT_TIMEOUT, &mut self.attempt_timeout);

        let token = lookup(ENV_TELEGRAM_TOKEN);
        let chat = lookup(ENV_TELEGRAM_CHAT);
        if token.is_some() || chat.is_some() {
            let telegram = self.telegram.get_or_insert_with(TelegramConfig::default);
            if let Some(token) = token {
                telegram.bot_token = token;
            }
            if let Some(chat) = chat {
                match chat.trim().parse() {
                    Ok(id) => telegram.chat_id = id,
                    Err(e) => warn!(value = %chat, "Ignoring {ENV_TELEGRAM_CHAT}: {e}"),
                }
            }
        }
    }

    /// Reject settings the watcher cannot run with.
    pub fn validate(&self, require_telegram: bool) -> Result<()> {
        if self.attempt_timeout.is_zero() {
            bail!("attempt timeout must be greater than zero");
        }
        if self.check_interval.is_zero() {
            bail!("check interval must be greater than zero");
        }
        if self.output_tail == 0 {
            bail!("output_tail must be at least 1");
        }
        if require_telegram && !self.telegram.as_ref().is_some_and(TelegramConfig::is_complete) {
            bail!("{ENV_TELEGRAM_TOKEN} and {ENV_TELEGRAM_CHAT} must be set (or use --dry-run)");
        }
        Ok(())
    }
}

fn env_duration(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Duration) {
    if let Some(raw) = lookup(key) {
        match parse_duration(&raw) {
            Ok(d) => *target = d,
            Err(e) => warn!(value = %raw, "Ignoring {key}: {e}"),
        }
    }
}

/// Parse `90s`, `30m`, `1h30m`, `500ms` or bare seconds (`90`).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .with_context(|| format!("missing unit in duration {input:?}"))?;
        if num_len == 0 {
            bail!("invalid duration {input:?}");
        }
        let value: f64 = rest[..num_len]
            .parse()
            .with_context(|| format!("invalid number in duration {input:?}"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let secs = match &rest[..unit_len] {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            other => bail!("unknown unit {other:?} in duration {input:?}"),
        };
        rest = &rest[unit_len..];
        total = Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|part| total.checked_add(part))
            .with_context(|| format!("duration {input:?} out of range"))?;
    }
    Ok(total)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Secs(u64),
    Text(String),
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
