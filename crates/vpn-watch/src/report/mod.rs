//! Cycle reports.
//!
//! A report lists failed endpoints only; a cycle where everything connected
//! produces no message at all.

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use supervision::{AttemptOutcome, EndpointConfig};
use tracing::{info, warn};

pub use telegram::TelegramReporter;

/// Result of checking one endpoint in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub config: EndpointConfig,
    pub outcome: AttemptOutcome,
}

impl EndpointStatus {
    pub fn failed(&self) -> bool {
        !self.outcome.success
    }
}

/// Delivers the statuses of one cycle somewhere an operator will see them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn send_report(&self, statuses: &[EndpointStatus]) -> Result<()>;
}

/// Writes the report to the log instead of sending it (`--dry-run`).
#[derive(Debug, Clone)]
pub struct LogReporter {
    output_limit: usize,
}

impl LogReporter {
    pub fn new(output_limit: usize) -> Self {
        Self { output_limit }
    }
}

#[async_trait]
impl Reporter for LogReporter {
    async fn send_report(&self, statuses: &[EndpointStatus]) -> Result<()> {
        match render_report(statuses, self.output_limit) {
            Some(text) => warn!(report = %text, "Failure report (dry run, not sent)"),
            None => info!(total = statuses.len(), "All endpoints OK, no report"),
        }
        Ok(())
    }
}

/// Telegram-Markdown report of every failed endpoint, or `None` if all succeeded.
pub fn render_report(statuses: &[EndpointStatus], output_limit: usize) -> Option<String> {
    let blocks: Vec<String> = statuses
        .iter()
        .filter(|s| s.failed())
        .map(|s| {
            let excerpt = s.outcome.relevant_excerpt.replace('`', "'");
            format!(
                "❌ *{}*\nError: {}\n\n```\n{}\n```",
                escape_markdown(&s.config.name),
                escape_markdown(&s.outcome.error_category),
                truncate_chars(&excerpt, output_limit),
            )
        })
        .collect();

    if blocks.is_empty() {
        return None;
    }

    Some(format!(
        "*VPN Error Report*\n\nFailed: {}/{}\n\n{}",
        blocks.len(),
        statuses.len(),
        blocks.join("\n\n")
    ))
}

const MARKDOWN_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Backslash-escape characters Telegram treats as markup.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// First `max` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
