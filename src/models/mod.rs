use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::TranscriptorError;

/// Default caption language when the caller expresses no preference
pub const DEFAULT_LANGUAGE: &str = "en";

/// Opaque key identifying a video on the remote host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    /// Parse a bare identifier or a watch/short/embed/youtu.be URL
    pub fn parse(input: &str) -> Result<Self, TranscriptorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TranscriptorError::InvalidVideoId("empty identifier".to_string()));
        }

        let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::id_from_url(trimmed)
                .ok_or_else(|| TranscriptorError::InvalidVideoId(trimmed.to_string()))?
        } else {
            trimmed.to_string()
        };

        let valid = candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if candidate.is_empty() || !valid {
            return Err(TranscriptorError::InvalidVideoId(trimmed.to_string()));
        }

        Ok(Self(candidate))
    }

    fn id_from_url(input: &str) -> Option<String> {
        let url = Url::parse(input).ok()?;
        let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

        if host == "youtu.be" {
            return url.path_segments()?.next().map(str::to_string);
        }

        if !host.ends_with("youtube.com") && !host.ends_with("youtube-nocookie.com") {
            return None;
        }

        if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
            return Some(v.into_owned());
        }

        let mut segments = url.path_segments()?;
        match segments.next()? {
            "embed" | "shorts" | "v" | "live" => segments.next().map(str::to_string),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VideoId {
    type Error = TranscriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VideoId> for String {
    fn from(id: VideoId) -> Self {
        id.0
    }
}

/// Which kind of data a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Transcript,
    Metadata,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Transcript => "transcript",
            ArtifactType::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOptions {
    /// Preferred caption language (BCP-47 style, e.g. "en", "pt-BR")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,

    /// Bypass any cached result and re-run the strategy chain
    #[serde(default)]
    pub force_refresh: bool,
}

/// A single extraction request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub video_id: VideoId,
    pub artifact_type: ArtifactType,
    #[serde(default)]
    pub options: ExtractionOptions,
}

impl ExtractionRequest {
    pub fn new(video_id: VideoId, artifact_type: ArtifactType) -> Self {
        Self {
            video_id,
            artifact_type,
            options: ExtractionOptions::default(),
        }
    }

    pub fn transcript(video_id: VideoId) -> Self {
        Self::new(video_id, ArtifactType::Transcript)
    }

    pub fn metadata(video_id: VideoId) -> Self {
        Self::new(video_id, ArtifactType::Metadata)
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.options.preferred_language = language.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.options.force_refresh = force;
        self
    }

    /// Parse one JSON request envelope
    pub fn from_json_line(line: &str) -> Result<Self, TranscriptorError> {
        serde_json::from_str(line).map_err(|e| TranscriptorError::InvalidRequest(e.to_string()))
    }

    /// Language to ask for when selecting caption tracks
    pub fn language(&self) -> &str {
        self.options
            .preferred_language
            .as_deref()
            .unwrap_or(DEFAULT_LANGUAGE)
    }
}

/// One timed line of a transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub duration_ms: u64,
    pub text: String,
}

/// Transcript produced by a strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    pub language_code: String,
    pub is_auto_generated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<TranscriptSegment>,
    pub source: String,
}

/// Normalized video metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: String,
    pub channel_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Upload date as `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub source: String,
}

/// Successful extraction, tagged by artifact type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "artifactType", rename_all = "lowercase")]
pub enum ExtractionResult {
    Transcript(Transcript),
    Metadata(VideoMetadata),
}

impl ExtractionResult {
    /// Name of the strategy that produced this result
    pub fn source(&self) -> &str {
        match self {
            ExtractionResult::Transcript(t) => &t.source,
            ExtractionResult::Metadata(m) => &m.source,
        }
    }

    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            ExtractionResult::Transcript(_) => ArtifactType::Transcript,
            ExtractionResult::Metadata(_) => ArtifactType::Metadata,
        }
    }
}
