use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Duration as observed in the wild, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawDuration {
    /// Whole or fractional seconds
    Seconds(f64),
    /// Millisecond count (e.g. `approxDurationMs`)
    Millis(u64),
    /// Display or unit-suffixed text: `"1:01:01"`, `"212"`, `"90s"`, `"1h 2m 3s"`
    Text(String),
}

impl From<u64> for RawDuration {
    fn from(seconds: u64) -> Self {
        RawDuration::Seconds(seconds as f64)
    }
}

impl From<f64> for RawDuration {
    fn from(seconds: f64) -> Self {
        RawDuration::Seconds(seconds)
    }
}

impl From<&str> for RawDuration {
    fn from(text: &str) -> Self {
        RawDuration::Text(text.to_string())
    }
}

impl From<String> for RawDuration {
    fn from(text: String) -> Self {
        RawDuration::Text(text)
    }
}

impl RawDuration {
    /// Interpret a JSON field that may hold a number or a string
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(RawDuration::Seconds),
            Value::String(s) => Some(RawDuration::Text(s.clone())),
            _ => None,
        }
    }
}

/// Convert any observed duration encoding to whole seconds.
///
/// Returns `None` when no rule matches; this never panics.
pub fn normalize(raw: impl Into<RawDuration>) -> Option<u64> {
    match raw.into() {
        RawDuration::Seconds(s) if s.is_finite() && s >= 0.0 => Some(s.floor() as u64),
        RawDuration::Seconds(_) => None,
        RawDuration::Millis(ms) => Some(ms / 1000),
        RawDuration::Text(text) => parse_text(&text),
    }
}

fn parse_text(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.contains(':') {
        return parse_clock(text);
    }

    if text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok();
    }

    if let Ok(seconds) = text.parse::<f64>() {
        return normalize(seconds);
    }

    parse_units(text)
}

/// `"H:MM:SS"` or `"MM:SS"`; the leading component may exceed 59
fn parse_clock(text: &str) -> Option<u64> {
    let parts: Vec<&str> = text.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }

    let mut total: u64 = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let value: u64 = part.parse().ok()?;
        if i > 0 && value >= 60 {
            return None;
        }
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

/// Unit-suffixed forms: `"90s"`, `"1500ms"`, `"1h 2m 3s"`, `"PT1H2M3S"`
fn parse_units(text: &str) -> Option<u64> {
    let lower = text.to_ascii_lowercase();
    let body = lower.strip_prefix("pt").unwrap_or(&lower);

    let mut total_ms: u64 = 0;
    let mut number = String::new();
    let mut chars = body.chars().peekable();
    let mut matched = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        if c.is_whitespace() {
            continue;
        }

        let factor_ms = match c {
            'h' => 3_600_000.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1.0
            }
            'm' => 60_000.0,
            's' => 1000.0,
            _ => return None,
        };
        let value: f64 = number.parse().ok()?;
        number.clear();
        total_ms = total_ms.checked_add((value * factor_ms) as u64)?;
        matched = true;
    }

    if !number.is_empty() || !matched {
        return None;
    }
    Some(total_ms / 1000)
}

/// Format seconds as `M:SS` or `H:MM:SS`
pub fn format_display(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Normalize `YYYYMMDD`, `YYYY-MM-DD` or RFC 3339 timestamps to `YYYY-MM-DD`
pub fn normalize_upload_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Check if the current environment has the configured tool
pub async fn check_dependencies(program: &str, base_args: &[String]) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(program, base_args).await {
        missing.push(format!(
            "{} - required by the tool-based strategies",
            program
        ));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, base_args: &[String]) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .args(base_args)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_integer_seconds() {
        assert_eq!(normalize(45u64), Some(45));
        assert_eq!(normalize(212.9), Some(212));
        assert_eq!(normalize(-1.0), None);
    }

    #[test]
    fn test_normalize_millis() {
        assert_eq!(normalize(RawDuration::Millis(212_091)), Some(212));
        assert_eq!(normalize("212091ms"), Some(212));
    }

    #[test]
    fn test_normalize_clock_strings() {
        assert_eq!(normalize("0:45"), Some(45));
        assert_eq!(normalize("2:05"), Some(125));
        assert_eq!(normalize("1:01:01"), Some(3661));
        assert_eq!(normalize("75:00"), Some(4500));
        assert_eq!(normalize("1:75"), None);
        assert_eq!(normalize("1::2"), None);
        assert_eq!(normalize("1:2:3:4"), None);
    }

    #[test]
    fn test_normalize_digit_and_unit_strings() {
        assert_eq!(normalize("212"), Some(212));
        assert_eq!(normalize("90s"), Some(90));
        assert_eq!(normalize("1h 1m 1s"), Some(3661));
        assert_eq!(normalize("PT3M33S"), Some(213));
    }

    #[test]
    fn test_normalize_unparseable() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("soon"), None);
        assert_eq!(normalize("12x"), None);
        assert_eq!(normalize("h"), None);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(RawDuration::from_json(&json!(45)).and_then(normalize), Some(45));
        assert_eq!(RawDuration::from_json(&json!("3:33")).and_then(normalize), Some(213));
        assert_eq!(RawDuration::from_json(&json!(null)), None);
    }

    #[test]
    fn test_format_display() {
        assert_eq!(format_display(45), "0:45");
        assert_eq!(format_display(125), "2:05");
        assert_eq!(format_display(3661), "1:01:01");
        assert_eq!(format_display(0), "0:00");
    }

    #[test]
    fn test_display_round_trips_through_normalize() {
        for seconds in [0, 59, 60, 3599, 3600, 86_399] {
            assert_eq!(normalize(format_display(seconds)), Some(seconds));
        }
    }

    #[test]
    fn test_normalize_upload_date() {
        assert_eq!(normalize_upload_date("20091025").as_deref(), Some("2009-10-25"));
        assert_eq!(normalize_upload_date("2009-10-24").as_deref(), Some("2009-10-24"));
        assert_eq!(
            normalize_upload_date("2009-10-24T23:57:33-07:00").as_deref(),
            Some("2009-10-24")
        );
        assert_eq!(normalize_upload_date("yesterday"), None);
    }
}
