use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Failure taxonomy shared by every strategy and the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The host flagged the request as automated (429, captcha, sign-in wall)
    BotDetected,
    /// The video has no caption track at all
    NoCaptionsAvailable,
    /// The external media tool could not be started
    ToolUnavailable,
    /// The attempt ran out of time or the connection stalled
    NetworkTimeout,
    /// The response did not have the expected shape
    MalformedResponse,
    /// The strategy needs credentials and the cookie jar is unusable
    CredentialExpired,
    /// The configured proxy refused or could not be reached
    ProxyUnreachable,
    /// The orchestration exceeded its global time budget
    BudgetExceeded,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::BotDetected,
        ErrorKind::NoCaptionsAvailable,
        ErrorKind::ToolUnavailable,
        ErrorKind::NetworkTimeout,
        ErrorKind::MalformedResponse,
        ErrorKind::CredentialExpired,
        ErrorKind::ProxyUnreachable,
        ErrorKind::BudgetExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BotDetected => "BotDetected",
            ErrorKind::NoCaptionsAvailable => "NoCaptionsAvailable",
            ErrorKind::ToolUnavailable => "ToolUnavailable",
            ErrorKind::NetworkTimeout => "NetworkTimeout",
            ErrorKind::MalformedResponse => "MalformedResponse",
            ErrorKind::CredentialExpired => "CredentialExpired",
            ErrorKind::ProxyUnreachable => "ProxyUnreachable",
            ErrorKind::BudgetExceeded => "BudgetExceeded",
        }
    }

    /// No other strategy can change this outcome
    pub fn is_definitive(&self) -> bool {
        matches!(self, ErrorKind::NoCaptionsAvailable)
    }

    /// Rank used to pick the headline kind of an exhausted chain.
    /// Lower wins: host-side blocking first, then auth, then infrastructure.
    pub fn precedence(&self) -> u8 {
        match self {
            ErrorKind::NoCaptionsAvailable => 0,
            ErrorKind::BotDetected => 1,
            ErrorKind::CredentialExpired => 2,
            ErrorKind::ProxyUnreachable => 3,
            ErrorKind::NetworkTimeout => 4,
            ErrorKind::MalformedResponse => 5,
            ErrorKind::ToolUnavailable => 6,
            ErrorKind::BudgetExceeded => 7,
        }
    }

    /// Short human description for text output
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::BotDetected => "the host blocked the request as automated",
            ErrorKind::NoCaptionsAvailable => "the video has no transcript",
            ErrorKind::ToolUnavailable => "the media extraction tool is not installed",
            ErrorKind::NetworkTimeout => "the host did not respond in time",
            ErrorKind::MalformedResponse => "the host returned an unexpected response",
            ErrorKind::CredentialExpired => "the stored cookies are too old to use",
            ErrorKind::ProxyUnreachable => "the proxy could not be reached",
            ErrorKind::BudgetExceeded => "the overall time budget ran out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single strategy attempt
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StrategyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StrategyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn no_captions(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoCaptionsAvailable, message)
    }
}

impl From<serde_json::Error> for StrategyError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(format!("invalid JSON: {}", e))
    }
}

/// One failed attempt as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub strategy: String,
    pub error_kind: ErrorKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub latency_ms: u64,
}

impl AttemptRecord {
    pub fn new(strategy: impl Into<String>, error: &StrategyError, latency: Duration) -> Self {
        Self {
            strategy: strategy.into(),
            error_kind: error.kind,
            message: error.message.clone(),
            latency_ms: latency.as_millis() as u64,
        }
    }
}

/// Terminal failure of an orchestration, listing every attempt made
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ExtractionFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
}

impl ExtractionFailure {
    /// Build the failure for a chain that ran out of strategies
    pub fn exhausted(attempts: Vec<AttemptRecord>) -> Self {
        let kind = headline_kind(&attempts).unwrap_or(ErrorKind::ToolUnavailable);
        let message = if attempts.is_empty() {
            "no extraction strategy is configured".to_string()
        } else {
            format!(
                "all {} strategies failed; {}",
                attempts.len(),
                kind.description()
            )
        };
        Self {
            kind,
            message,
            attempts,
        }
    }

    pub fn budget_exceeded(budget: Duration, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            kind: ErrorKind::BudgetExceeded,
            message: format!(
                "time budget of {}s exceeded after {} attempts",
                budget.as_secs(),
                attempts.len()
            ),
            attempts,
        }
    }

    /// The chain stopped early on a definitive failure
    pub fn definitive(error: &StrategyError, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            kind: error.kind,
            message: error.message.clone(),
            attempts,
        }
    }
}

/// Pick the most diagnostic kind among the attempts
fn headline_kind(attempts: &[AttemptRecord]) -> Option<ErrorKind> {
    attempts
        .iter()
        .map(|a| a.error_kind)
        .min_by_key(|k| k.precedence())
}
