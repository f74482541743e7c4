use async_trait::async_trait;
use serde::Deserialize;

use super::captions::{self, CaptionTrack};
use super::classify::looks_like_bot_wall;
use super::page;
use super::{
    fetch_text, http_client, watch_url, AttemptContext, Extracted, ExtractionStrategy,
    RawMetadata, StrategyDescriptor,
};
use crate::error::{ErrorKind, StrategyError};
use crate::models::{ArtifactType, ExtractionRequest};

/// Calls the host's purpose-built caption and oEmbed endpoints.
///
/// oEmbed carries no duration or upload date, so metadata requests also read
/// the player JSON embedded in the watch page.
pub struct DirectApiStrategy {
    descriptor: StrategyDescriptor,
    timedtext_url: String,
    oembed_url: String,
    watch_url: String,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
    author_name: Option<String>,
    thumbnail_url: Option<String>,
}

impl DirectApiStrategy {
    pub fn new(
        descriptor: StrategyDescriptor,
        timedtext_url: String,
        oembed_url: String,
        watch_url: String,
    ) -> Self {
        Self {
            descriptor,
            timedtext_url,
            oembed_url,
            watch_url,
        }
    }

    /// List the caption tracks the API knows about
    async fn list_tracks(
        &self,
        client: &reqwest::Client,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Vec<CaptionTrack>, StrategyError> {
        let body = fetch_text(
            client,
            &self.timedtext_url,
            &[("type", "list"), ("v", request.video_id.as_str())],
            ctx,
        )
        .await?;

        if looks_like_bot_wall(&body) {
            return Err(StrategyError::new(
                ErrorKind::BotDetected,
                "caption API served a bot check",
            ));
        }
        if !body.contains("<transcript_list") {
            return Err(StrategyError::malformed(
                "caption API returned no track listing",
            ));
        }

        let tracks = captions::parse_track_list(&body);
        if tracks.is_empty() {
            return Err(StrategyError::no_captions(format!(
                "video {} has no caption tracks",
                request.video_id
            )));
        }
        Ok(tracks)
    }

    async fn fetch_transcript(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError> {
        let client = http_client(&self.descriptor.identity, ctx)?;
        let tracks = self.list_tracks(&client, request, ctx).await?;

        let track = captions::select_track(&tracks, request.language())
            .ok_or_else(|| StrategyError::no_captions("no selectable caption track"))?;
        tracing::debug!(
            "Selected caption track {} (auto: {})",
            track.language_code,
            track.is_auto_generated
        );

        let mut query = vec![
            ("v", request.video_id.as_str()),
            ("lang", track.language_code.as_str()),
            ("fmt", "json3"),
        ];
        if track.is_auto_generated {
            query.push(("kind", "asr"));
        }
        if let Some(name) = &track.name {
            query.push(("name", name.as_str()));
        }

        let body = fetch_text(&client, &self.timedtext_url, &query, ctx).await?;
        let text = captions::caption_text(track, &body)?;
        Ok(Extracted::Transcript(text))
    }

    async fn fetch_metadata(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError> {
        let client = http_client(&self.descriptor.identity, ctx)?;
        let page_url = watch_url(&request.video_id);
        let body = fetch_text(
            &client,
            &self.oembed_url,
            &[("url", page_url.as_str()), ("format", "json")],
            ctx,
        )
        .await?;

        let oembed: OEmbed = serde_json::from_str(&body)?;
        let title = oembed
            .title
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StrategyError::malformed("oEmbed response has no title"))?;

        let details = self.player_details(&client, request, ctx).await?;
        let channel_name = oembed
            .author_name
            .filter(|a| !a.is_empty())
            .or_else(|| details.as_ref().map(|d| d.channel_name.clone()))
            .unwrap_or_default();
        let (duration, upload_date, thumbnail) = match details {
            Some(d) => (d.duration, d.upload_date, d.thumbnail_url),
            None => (None, None, None),
        };

        Ok(Extracted::Metadata(RawMetadata {
            title,
            channel_name,
            duration,
            upload_date,
            thumbnail_url: oembed.thumbnail_url.or(thumbnail),
        }))
    }

    async fn player_details(
        &self,
        client: &reqwest::Client,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Option<RawMetadata>, StrategyError> {
        let body = page::fetch_watch_page(client, &self.watch_url, &request.video_id, ctx).await?;
        let player = page::player_response(&body)?
            .ok_or_else(|| StrategyError::malformed("watch page has no player response"))?;
        page::check_playability(&player)?;
        Ok(page::metadata_from_player(&player))
    }
}

#[async_trait]
impl ExtractionStrategy for DirectApiStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn extract(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError> {
        match request.artifact_type {
            ArtifactType::Transcript => self.fetch_transcript(request, ctx).await,
            ArtifactType::Metadata => self.fetch_metadata(request, ctx).await,
        }
    }
}
