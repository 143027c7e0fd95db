//! Telegram Bot API reporter.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{render_report, truncate_chars, EndpointStatus, Reporter};
use crate::config::TelegramConfig;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const TRUNCATED_SUFFIX: &str = "\n... (truncated)";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramReporter {
    client: reqwest::Client,
    api_base: String,
    credentials: TelegramConfig,
    output_limit: usize,
    message_limit: usize,
}

impl TelegramReporter {
    pub fn new(credentials: TelegramConfig, output_limit: usize, message_limit: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            credentials,
            output_limit,
            message_limit,
        }
    }

    /// Point at a different Bot API server (self-hosted or a test double).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.credentials.bot_token
        )
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.credentials.chat_id,
            "text": fit_message(text, self.message_limit),
            "parse_mode": "Markdown",
        })
    }
}

impl std::fmt::Debug for TelegramReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramReporter")
            .field("api_base", &self.api_base)
            .field("chat_id", &self.credentials.chat_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Reporter for TelegramReporter {
    async fn send_report(&self, statuses: &[EndpointStatus]) -> Result<()> {
        let Some(text) = render_report(statuses, self.output_limit) else {
            info!(total = statuses.len(), "All endpoints OK, no report sent");
            return Ok(());
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&self.payload(&text))
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .context("Telegram request failed")?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("Telegram returned an unreadable response ({status})"))?;
        if !status.is_success() || !body.ok {
            bail!(
                "Telegram rejected the report ({status}): {}",
                body.description.unwrap_or_default()
            );
        }

        info!(chat_id = self.credentials.chat_id, "Error report sent");
        Ok(())
    }
}

/// Cut `text` to `limit` characters, closing a code block left open by the cut.
fn fit_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let budget = limit.saturating_sub(TRUNCATED_SUFFIX.len() + 4);
    let mut out = truncate_chars(text, budget).to_string();
    if out.matches("```").count() % 2 == 1 {
        out.push_str("\n```");
    }
    out.push_str(TRUNCATED_SUFFIX);
    out
}
