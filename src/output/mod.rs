use anyhow::Result;
use console::style;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::cli::OutputFormat;
use crate::error::{ErrorKind, ExtractionFailure};
use crate::models::ExtractionResult;
use crate::utils::format_display;

/// One attempt as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub strategy: String,
    pub error_kind: ErrorKind,
}

/// Response envelope handed back to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtractionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<Vec<AttemptSummary>>,
}

impl ResponseEnvelope {
    pub fn success(result: ExtractionResult) -> Self {
        Self {
            success: true,
            source: Some(result.source().to_string()),
            data: Some(result),
            error_kind: None,
            message: None,
            attempts: None,
        }
    }

    pub fn failure(failure: &ExtractionFailure) -> Self {
        Self {
            success: false,
            source: None,
            data: None,
            error_kind: Some(failure.kind),
            message: Some(failure.message.clone()),
            attempts: Some(
                failure
                    .attempts
                    .iter()
                    .map(|a| AttemptSummary {
                        strategy: a.strategy.clone(),
                        error_kind: a.error_kind,
                    })
                    .collect(),
            ),
        }
    }

    /// A request that never reached the engine
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            success: false,
            source: None,
            data: None,
            error_kind: None,
            message: Some(message.into()),
            attempts: None,
        }
    }

    pub fn from_outcome(outcome: &Result<ExtractionResult, ExtractionFailure>) -> Self {
        match outcome {
            Ok(result) => Self::success(result.clone()),
            Err(failure) => Self::failure(failure),
        }
    }
}

/// Render an outcome in the requested format
pub fn render(
    outcome: &Result<ExtractionResult, ExtractionFailure>,
    format: &OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => format_as_json(&ResponseEnvelope::from_outcome(outcome)),
        OutputFormat::Text => Ok(match outcome {
            Ok(result) => format_result_text(result),
            Err(failure) => format_failure_text(failure),
        }),
    }
}

pub fn format_as_json(envelope: &ResponseEnvelope) -> Result<String> {
    Ok(serde_json::to_string_pretty(envelope)?)
}

/// Single-line JSON, for batch output
pub fn format_as_json_line(envelope: &ResponseEnvelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn format_result_text(result: &ExtractionResult) -> String {
    let mut out = String::new();
    match result {
        ExtractionResult::Transcript(transcript) => {
            let kind = if transcript.is_auto_generated {
                "auto-generated"
            } else {
                "manual"
            };
            let _ = writeln!(
                out,
                "{} Transcript ({}, {}) via {}",
                style("✓").green(),
                transcript.language_code,
                kind,
                style(&transcript.source).cyan()
            );
            let _ = writeln!(out);
            let _ = write!(out, "{}", transcript.text);
        }
        ExtractionResult::Metadata(meta) => {
            let _ = writeln!(
                out,
                "{} Metadata via {}",
                style("✓").green(),
                style(&meta.source).cyan()
            );
            let _ = writeln!(out, "  Title:    {}", meta.title);
            let _ = writeln!(out, "  Channel:  {}", meta.channel_name);
            if let Some(seconds) = meta.duration_seconds {
                let _ = writeln!(out, "  Duration: {} ({}s)", format_display(seconds), seconds);
            }
            if let Some(date) = &meta.upload_date {
                let _ = writeln!(out, "  Uploaded: {}", date);
            }
            if let Some(thumb) = &meta.thumbnail_url {
                let _ = writeln!(out, "  Thumbnail: {}", thumb);
            }
        }
    }
    out.trim_end().to_string()
}

pub fn format_failure_text(failure: &ExtractionFailure) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}: {}",
        style("✗").red(),
        style(failure.kind).red().bold(),
        failure.message
    );
    for attempt in &failure.attempts {
        let _ = write!(out, "  • {} → {}", attempt.strategy, attempt.error_kind);
        if !attempt.message.is_empty() {
            let _ = write!(out, " ({})", attempt.message);
        }
        let _ = writeln!(out);
    }
    out.trim_end().to_string()
}
