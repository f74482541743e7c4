use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use super::CaptionText;
use crate::error::StrategyError;
use crate::models::TranscriptSegment;

lazy_static! {
    static ref TRACK_RE: Regex = Regex::new(r"<track\s+([^>]*?)/?>").unwrap();
    static ref ATTR_RE: Regex = Regex::new(r#"(\w+)="([^"]*)""#).unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// A caption track offered by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    pub language_code: String,
    pub name: Option<String>,
    pub is_auto_generated: bool,
    /// Direct download URL when the source provides one
    pub url: Option<String>,
}

/// Pick the best track for `preferred`.
///
/// Exact language beats a regional/base match, which beats any track;
/// manual tracks beat auto-generated ones at the same rank.
pub fn select_track<'a>(tracks: &'a [CaptionTrack], preferred: &str) -> Option<&'a CaptionTrack> {
    let preferred = preferred.to_ascii_lowercase();
    let preferred_base = base_language(&preferred).to_string();

    tracks.iter().min_by_key(|track| {
        let code = track.language_code.to_ascii_lowercase();
        let rank = if code == preferred {
            0
        } else if base_language(&code) == preferred_base {
            1
        } else {
            2
        };
        (rank, track.is_auto_generated)
    })
}

fn base_language(code: &str) -> &str {
    code.split(['-', '_']).next().unwrap_or(code)
}

/// Parse the `type=list` XML track listing
pub fn parse_track_list(xml: &str) -> Vec<CaptionTrack> {
    TRACK_RE
        .captures_iter(xml)
        .filter_map(|cap| {
            let attrs: Vec<(String, String)> = ATTR_RE
                .captures_iter(&cap[1])
                .map(|a| (a[1].to_string(), unescape_xml(&a[2])))
                .collect();
            let get = |key: &str| attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

            let language_code = get("lang_code")?;
            Some(CaptionTrack {
                language_code,
                name: get("name").filter(|n| !n.is_empty()),
                is_auto_generated: get("kind").as_deref() == Some("asr"),
                url: None,
            })
        })
        .collect()
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs", default)]
    start_ms: u64,
    #[serde(rename = "dDurationMs", default)]
    duration_ms: u64,
    #[serde(default)]
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse the host's `json3` timed-text payload into segments
pub fn parse_json3(body: &str) -> Result<Vec<TranscriptSegment>, StrategyError> {
    if body.trim().is_empty() {
        return Err(StrategyError::malformed("empty caption payload"));
    }
    let parsed: Json3 = serde_json::from_str(body)?;

    let segments = parsed
        .events
        .into_iter()
        .filter_map(|event| {
            let raw: String = event.segs?.into_iter().map(|s| s.utf8).collect();
            let text = WHITESPACE_RE.replace_all(raw.trim(), " ").into_owned();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment {
                start_ms: event.start_ms,
                duration_ms: event.duration_ms,
                text,
            })
        })
        .collect();

    Ok(segments)
}

/// Parse a payload for `track` into transcript text
pub fn caption_text(track: &CaptionTrack, body: &str) -> Result<CaptionText, StrategyError> {
    let segments = parse_json3(body)?;
    if segments.is_empty() {
        return Err(StrategyError::malformed(format!(
            "caption track '{}' has no text",
            track.language_code
        )));
    }

    let text = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(CaptionText {
        text,
        language_code: track.language_code.clone(),
        is_auto_generated: track.is_auto_generated,
        segments,
    })
}
