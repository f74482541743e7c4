use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use url::Url;

use super::captions::{self, CaptionTrack};
use super::classify::looks_like_bot_wall;
use super::{
    fetch_text, http_client, AttemptContext, Extracted, ExtractionStrategy, RawMetadata,
    StrategyDescriptor,
};
use crate::error::{ErrorKind, StrategyError};
use crate::models::{ArtifactType, ExtractionRequest, VideoId};
use crate::utils::RawDuration;

lazy_static! {
    static ref PLAYER_RESPONSE_RE: Regex =
        Regex::new(r"ytInitialPlayerResponse\s*=\s*(\{.+?\})\s*;\s*(?:var\s|</script>)").unwrap();
    static ref META_DURATION_RE: Regex =
        Regex::new(r#"<meta\s+itemprop="duration"\s+content="([^"]+)""#).unwrap();
    static ref META_UPLOAD_RE: Regex =
        Regex::new(r#"<meta\s+itemprop="(?:uploadDate|datePublished)"\s+content="([^"]+)""#).unwrap();
    static ref META_TITLE_RE: Regex =
        Regex::new(r#"<meta\s+name="title"\s+content="([^"]*)""#).unwrap();
    static ref META_CHANNEL_RE: Regex =
        Regex::new(r#"<link\s+itemprop="name"\s+content="([^"]*)""#).unwrap();
    static ref META_THUMBNAIL_RE: Regex =
        Regex::new(r#"<meta\s+property="og:image"\s+content="([^"]+)""#).unwrap();
}

/// Last resort: fetch the public watch page and pattern-match embedded data
pub struct PageScrapeStrategy {
    descriptor: StrategyDescriptor,
    watch_url: String,
}

impl PageScrapeStrategy {
    pub fn new(descriptor: StrategyDescriptor, watch_url: String) -> Self {
        Self {
            descriptor,
            watch_url,
        }
    }

    async fn fetch_transcript(
        &self,
        client: &reqwest::Client,
        page: &str,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError> {
        let player = player_response(page)?
            .ok_or_else(|| StrategyError::malformed("watch page has no player response"))?;
        check_playability(&player)?;

        let tracks = caption_tracks(&player)?;
        if tracks.is_empty() {
            return Err(StrategyError::no_captions(format!(
                "video {} has no caption tracks",
                request.video_id
            )));
        }

        let track = captions::select_track(&tracks, request.language())
            .ok_or_else(|| StrategyError::no_captions("no selectable caption track"))?;
        let base = track
            .url
            .as_deref()
            .ok_or_else(|| StrategyError::malformed("caption track has no baseUrl"))?;
        let url = self.resolve(base)?;

        let body = fetch_text(client, url.as_str(), &[("fmt", "json3")], ctx).await?;
        Ok(Extracted::Transcript(captions::caption_text(track, &body)?))
    }

    /// Caption URLs may be relative to the watch page
    fn resolve(&self, base: &str) -> Result<Url, StrategyError> {
        let page = Url::parse(&self.watch_url)
            .map_err(|e| StrategyError::malformed(format!("bad watch URL: {}", e)))?;
        page.join(base)
            .map_err(|e| StrategyError::malformed(format!("bad caption URL '{}': {}", base, e)))
    }
}

/// GET the watch page for `video_id`, failing on a bot check
pub(super) async fn fetch_watch_page(
    client: &reqwest::Client,
    watch_url: &str,
    video_id: &VideoId,
    ctx: &AttemptContext,
) -> Result<String, StrategyError> {
    let body = fetch_text(client, watch_url, &[("v", video_id.as_str()), ("hl", "en")], ctx).await?;

    if looks_like_bot_wall(&body) {
        return Err(StrategyError::new(
            ErrorKind::BotDetected,
            "watch page served a bot check",
        ));
    }
    Ok(body)
}

/// The embedded player JSON, if the page carries one
pub(super) fn player_response(page: &str) -> Result<Option<Value>, StrategyError> {
    match PLAYER_RESPONSE_RE.captures(page) {
        Some(cap) => Ok(Some(serde_json::from_str(&cap[1])?)),
        None => Ok(None),
    }
}

pub(super) fn check_playability(player: &Value) -> Result<(), StrategyError> {
    let Some(status) = player.get("playabilityStatus") else {
        return Ok(());
    };
    let state = status.get("status").and_then(Value::as_str).unwrap_or("OK");
    let reason = status
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match state {
        "OK" | "LIVE_STREAM_OFFLINE" => Ok(()),
        "LOGIN_REQUIRED" if reason.to_lowercase().contains("bot") => Err(StrategyError::new(
            ErrorKind::BotDetected,
            format!("playability: {}", reason),
        )),
        "LOGIN_REQUIRED" => Err(StrategyError::new(
            ErrorKind::CredentialExpired,
            format!("playability: {}", reason),
        )),
        other => Err(StrategyError::malformed(format!(
            "playability {}: {}",
            other, reason
        ))),
    }
}

/// Tracks from `captions.playerCaptionsTracklistRenderer.captionTracks`.
///
/// A missing `captions` object means the page was incomplete; an empty
/// track list means the video genuinely has none.
fn caption_tracks(player: &Value) -> Result<Vec<CaptionTrack>, StrategyError> {
    let captions = player
        .get("captions")
        .ok_or_else(|| StrategyError::malformed("player response has no captions object"))?;

    let tracks = captions
        .pointer("/playerCaptionsTracklistRenderer/captionTracks")
        .and_then(Value::as_array)
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|track| {
                    let language_code = track.get("languageCode")?.as_str()?.to_string();
                    let name = track
                        .pointer("/name/simpleText")
                        .or_else(|| track.pointer("/name/runs/0/text"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    Some(CaptionTrack {
                        language_code,
                        name,
                        is_auto_generated: track.get("kind").and_then(Value::as_str) == Some("asr"),
                        url: track.get("baseUrl").and_then(Value::as_str).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(tracks)
}

pub(super) fn metadata_from_player(player: &Value) -> Option<RawMetadata> {
    let details = player.get("videoDetails")?;
    let title = details
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())?
        .to_string();

    let duration = details
        .get("lengthSeconds")
        .and_then(RawDuration::from_json)
        .or_else(|| {
            player
                .pointer("/streamingData/formats/0/approxDurationMs")
                .and_then(Value::as_str)
                .and_then(|ms| ms.parse::<u64>().ok())
                .map(RawDuration::Millis)
        });

    let microformat = player.pointer("/microformat/playerMicroformatRenderer");
    let upload_date = microformat
        .and_then(|m| m.get("uploadDate").or_else(|| m.get("publishDate")))
        .and_then(Value::as_str)
        .map(str::to_string);

    let thumbnail_url = details
        .pointer("/thumbnail/thumbnails")
        .and_then(Value::as_array)
        .and_then(|thumbs| thumbs.last())
        .and_then(|t| t.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(RawMetadata {
        title,
        channel_name: details
            .get("author")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        duration,
        upload_date,
        thumbnail_url,
    })
}

/// Fallback for pages whose player JSON is absent or unparseable
fn metadata_from_meta_tags(page: &str) -> Option<RawMetadata> {
    let capture = |re: &Regex| {
        re.captures(page)
            .map(|c| html_unescape(&c[1]))
            .filter(|s| !s.is_empty())
    };

    Some(RawMetadata {
        title: capture(&META_TITLE_RE)?,
        channel_name: capture(&META_CHANNEL_RE).unwrap_or_default(),
        duration: capture(&META_DURATION_RE).map(RawDuration::Text),
        upload_date: capture(&META_UPLOAD_RE),
        thumbnail_url: capture(&META_THUMBNAIL_RE),
    })
}

fn html_unescape(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[async_trait]
impl ExtractionStrategy for PageScrapeStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn extract(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError> {
        let client = http_client(&self.descriptor.identity, ctx)?;
        let page = fetch_watch_page(&client, &self.watch_url, &request.video_id, ctx).await?;

        match request.artifact_type {
            ArtifactType::Transcript => self.fetch_transcript(&client, &page, request, ctx).await,
            ArtifactType::Metadata => {
                let player = player_response(&page).ok().flatten();
                if let Some(player) = &player {
                    check_playability(player)?;
                }
                player
                    .as_ref()
                    .and_then(metadata_from_player)
                    .or_else(|| metadata_from_meta_tags(&page))
                    .map(Extracted::Metadata)
                    .ok_or_else(|| StrategyError::malformed("watch page carries no metadata"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(player: &Value) -> String {
        format!(
            "<html><script>var ytInitialPlayerResponse = {};var meta = 1;</script></html>",
            player
        )
    }

    #[test]
    fn test_player_response_extraction() {
        let player = serde_json::json!({"videoDetails": {"title": "A; B", "author": "C"}});
        let parsed = player_response(&page_with(&player)).unwrap().unwrap();
        assert_eq!(parsed["videoDetails"]["title"], "A; B");
        assert!(player_response("<html></html>").unwrap().is_none());
    }

    #[test]
    fn test_metadata_from_player_with_millis_fallback() {
        let player = serde_json::json!({
            "videoDetails": {
                "title": "Never Gonna Give You Up",
                "author": "Rick Astley",
                "thumbnail": {"thumbnails": [{"url": "small"}, {"url": "large"}]}
            },
            "streamingData": {"formats": [{"approxDurationMs": "212091"}]},
            "microformat": {"playerMicroformatRenderer": {"publishDate": "2009-10-24"}}
        });
        let meta = metadata_from_player(&player).unwrap();
        assert_eq!(meta.channel_name, "Rick Astley");
        assert_eq!(meta.duration, Some(RawDuration::Millis(212091)));
        assert_eq!(meta.upload_date.as_deref(), Some("2009-10-24"));
        assert_eq!(meta.thumbnail_url.as_deref(), Some("large"));
    }

    #[test]
    fn test_meta_tag_fallback() {
        let page = r#"<meta name="title" content="Rock &amp; Roll">
<link itemprop="name" content="Someone">
<meta itemprop="duration" content="PT3M32S">
<meta itemprop="uploadDate" content="2009-10-25">"#;
        let meta = metadata_from_meta_tags(page).unwrap();
        assert_eq!(meta.title, "Rock & Roll");
        assert_eq!(meta.channel_name, "Someone");
        assert_eq!(meta.duration, Some(RawDuration::Text("PT3M32S".to_string())));
        assert_eq!(meta.upload_date.as_deref(), Some("2009-10-25"));
        assert!(metadata_from_meta_tags("<html></html>").is_none());
    }

    #[test]
    fn test_caption_tracks_distinguish_missing_from_empty() {
        let missing = serde_json::json!({"videoDetails": {}});
        assert_eq!(
            caption_tracks(&missing).unwrap_err().kind,
            ErrorKind::MalformedResponse
        );

        let empty = serde_json::json!({
            "captions": {"playerCaptionsTracklistRenderer": {"captionTracks": []}}
        });
        assert!(caption_tracks(&empty).unwrap().is_empty());

        let some = serde_json::json!({
            "captions": {"playerCaptionsTracklistRenderer": {"captionTracks": [
                {"baseUrl": "/api/timedtext?v=x&lang=en", "languageCode": "en", "kind": "asr",
                 "name": {"simpleText": "English (auto-generated)"}}
            ]}}
        });
        let tracks = caption_tracks(&some).unwrap();
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].is_auto_generated);
        assert_eq!(tracks[0].name.as_deref(), Some("English (auto-generated)"));
    }

    #[test]
    fn test_playability_states() {
        let bot = serde_json::json!({"playabilityStatus": {
            "status": "LOGIN_REQUIRED", "reason": "Sign in to confirm you're not a bot"}});
        assert_eq!(check_playability(&bot).unwrap_err().kind, ErrorKind::BotDetected);

        let gone = serde_json::json!({"playabilityStatus": {
            "status": "ERROR", "reason": "Video unavailable"}});
        assert_eq!(check_playability(&gone).unwrap_err().kind, ErrorKind::MalformedResponse);

        assert!(check_playability(&serde_json::json!({"playabilityStatus": {"status": "OK"}})).is_ok());
    }
}
