//! Maps raw failure signals (tool stderr, HTTP status, transport errors,
//! page bodies) onto the shared [`ErrorKind`] taxonomy.

use reqwest::StatusCode;

use crate::error::{ErrorKind, StrategyError};

const BOT_PATTERNS: &[&str] = &[
    "confirm you're not a bot",
    "confirm you’re not a bot",
    "sign in to confirm",
    "http error 429",
    "too many requests",
    "unusual traffic",
    "captcha",
    "http error 403",
    "forbidden",
    "po token",
    "rate-limited",
];

const CREDENTIAL_PATTERNS: &[&str] = &[
    "cookies are no longer valid",
    "cookies have expired",
    "invalid cookies",
    "login required",
];

const PROXY_PATTERNS: &[&str] = &[
    "unable to connect to proxy",
    "proxy error",
    "tunnel connection failed",
    "407 proxy authentication",
    "socks",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "temporary failure in name resolution",
    "network is unreachable",
    "connection refused",
];

const NO_CAPTION_PATTERNS: &[&str] = &[
    "there are no subtitles",
    "has no subtitles",
    "no subtitles for the requested languages",
    "no captions",
];

const MISSING_TOOL_PATTERNS: &[&str] = &[
    "command not found",
    "no module named",
    "is not recognized as an internal or external command",
];

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Classify a failed tool run from its stderr
pub fn classify_tool_failure(stderr: &str) -> ErrorKind {
    let lower = stderr.to_lowercase();

    if contains_any(&lower, MISSING_TOOL_PATTERNS) {
        ErrorKind::ToolUnavailable
    } else if contains_any(&lower, BOT_PATTERNS) {
        ErrorKind::BotDetected
    } else if contains_any(&lower, CREDENTIAL_PATTERNS) {
        ErrorKind::CredentialExpired
    } else if contains_any(&lower, PROXY_PATTERNS) {
        ErrorKind::ProxyUnreachable
    } else if contains_any(&lower, TIMEOUT_PATTERNS) {
        ErrorKind::NetworkTimeout
    } else if contains_any(&lower, NO_CAPTION_PATTERNS) {
        ErrorKind::NoCaptionsAvailable
    } else {
        ErrorKind::MalformedResponse
    }
}

/// Last meaningful stderr line, for attempt messages
pub fn summarize_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("tool exited without output")
        .to_string()
}

/// `None` for success statuses
pub fn classify_status(status: StatusCode) -> Option<ErrorKind> {
    if status.is_success() {
        return None;
    }
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => ErrorKind::BotDetected,
        StatusCode::UNAUTHORIZED => ErrorKind::CredentialExpired,
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => ErrorKind::ProxyUnreachable,
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => ErrorKind::NetworkTimeout,
        _ => ErrorKind::MalformedResponse,
    };
    Some(kind)
}

/// Transport-level failure of an HTTP request
pub fn classify_reqwest(err: &reqwest::Error, via_proxy: bool) -> StrategyError {
    let kind = if err.is_timeout() {
        ErrorKind::NetworkTimeout
    } else if err.is_connect() && via_proxy {
        ErrorKind::ProxyUnreachable
    } else if err.is_connect() || err.is_request() {
        ErrorKind::NetworkTimeout
    } else if err.is_decode() || err.is_body() {
        ErrorKind::MalformedResponse
    } else if let Some(kind) = err.status().and_then(classify_status) {
        kind
    } else {
        ErrorKind::NetworkTimeout
    };
    StrategyError::new(kind, err.to_string())
}

/// Interstitial pages served instead of content when automation is suspected
pub fn looks_like_bot_wall(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("confirm you're not a bot")
        || lower.contains("confirm you’re not a bot")
        || lower.contains("/sorry/index")
        || lower.contains("unusual traffic from your computer network")
}
