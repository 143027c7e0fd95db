//! Values flowing in and out of an attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::classifier::{classify_error, extract_relevant};
use crate::error::ProbeError;

/// One connection profile to probe. Read-only to the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointConfig {
    pub name: String,
    pub path: PathBuf,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Name the endpoint after the profile's file stem (`office.ovpn` -> `office`).
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(name, path)
    }
}

/// What a single attempt observed, before classification.
#[derive(Debug)]
pub struct RawAttempt {
    /// Everything the client wrote to stdout and stderr.
    pub output: String,
    pub success: bool,
    pub error: Option<ProbeError>,
    pub elapsed: Duration,
}

/// Final, classified result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptOutcome {
    pub success: bool,
    pub raw_output: String,
    /// Empty on success.
    pub error_category: String,
    /// Empty on success.
    pub relevant_excerpt: String,
}

impl AttemptOutcome {
    /// Classify a raw attempt. Failures carry a category and an excerpt of at
    /// most `tail_lines` lines.
    pub fn from_attempt(raw: RawAttempt, tail_lines: usize) -> Self {
        if raw.success {
            return Self {
                success: true,
                raw_output: raw.output,
                error_category: String::new(),
                relevant_excerpt: String::new(),
            };
        }

        let error_category = match &raw.error {
            Some(ProbeError::Spawn { source, .. }) => format!("Failed to start: {source}"),
            Some(ProbeError::Timeout(budget)) => {
                format!("Timeout exceeded ({}s)", budget.as_secs())
            }
            Some(ProbeError::Cancelled) => "Check cancelled".to_string(),
            Some(ProbeError::InvalidTimeout) => "Invalid attempt timeout".to_string(),
            // Exit codes are not a reliable signal; the log decides.
            Some(ProbeError::Exited(_)) | Some(ProbeError::Wait(_)) | None => {
                classify_error(&raw.output).to_string()
            }
        };

        Self {
            success: false,
            relevant_excerpt: extract_relevant(&raw.output, tail_lines),
            raw_output: raw.output,
            error_category,
        }
    }
}
