use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use super::captions::{self, CaptionTrack};
use super::classify::{classify_tool_failure, summarize_stderr};
use super::{
    fetch_text, http_client, watch_url, AttemptContext, Extracted, ExtractionStrategy,
    RawMetadata, StrategyDescriptor,
};
use crate::error::{ErrorKind, StrategyError};
use crate::models::{ArtifactType, ExtractionRequest};
use crate::process::CommandRunner;
use crate::utils::RawDuration;

/// Shells out to an external media tool (yt-dlp compatible) presenting a
/// specific player client
pub struct ToolBasedStrategy {
    descriptor: StrategyDescriptor,
    program: String,
    base_args: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl ToolBasedStrategy {
    pub fn new(
        descriptor: StrategyDescriptor,
        program: String,
        base_args: Vec<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            descriptor,
            program,
            base_args,
            runner,
        }
    }

    /// Build command arguments
    pub fn build_args(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
        cookie_file: Option<&str>,
    ) -> Vec<String> {
        let identity = &self.descriptor.identity;
        let mut args = self.base_args.clone();
        args.extend([
            "--dump-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            ctx.timeout.as_secs().max(1).to_string(),
            "--user-agent".to_string(),
            identity.user_agent.clone(),
        ]);

        if let Some(client) = &identity.player_client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        if let Some(referer) = &identity.referer {
            args.push("--referer".to_string());
            args.push(referer.clone());
        }

        if let Some(path) = cookie_file {
            args.push("--cookies".to_string());
            args.push(path.to_string());
        }

        args.extend(ctx.proxy.cli_args());

        args.push(watch_url(&request.video_id));
        args
    }

    /// Run the tool and return its JSON document
    async fn dump_info(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Value, StrategyError> {
        // The snapshot file must outlive the process run
        let snapshot = match &ctx.credentials {
            Some(creds) => Some(creds.write_snapshot(Utc::now()).map_err(|e| {
                StrategyError::new(ErrorKind::CredentialExpired, format!("cookie snapshot: {}", e))
            })?),
            None => None,
        };
        let cookie_path = snapshot
            .as_ref()
            .map(|file| file.path().to_string_lossy().into_owned());

        let args = self.build_args(request, ctx, cookie_path.as_deref());
        let output = self.runner.run(&self.program, &args, ctx.timeout).await?;

        if !output.success() {
            let stderr = output.stderr_lossy();
            let kind = classify_tool_failure(&stderr);
            return Err(StrategyError::new(kind, summarize_stderr(&stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with('{'))
            .ok_or_else(|| StrategyError::malformed("tool printed no JSON document"))?;
        Ok(serde_json::from_str(line)?)
    }

    async fn fetch_transcript(
        &self,
        info: &Value,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError> {
        let tracks = caption_tracks(info)?;
        if tracks.is_empty() {
            return Err(StrategyError::no_captions(format!(
                "video {} has no subtitles",
                request.video_id
            )));
        }

        let track = captions::select_track(&tracks, request.language())
            .ok_or_else(|| StrategyError::no_captions("no selectable caption track"))?;
        let url = track
            .url
            .as_deref()
            .ok_or_else(|| StrategyError::malformed("caption track has no URL"))?;

        let client = http_client(&self.descriptor.identity, ctx)?;
        let body = fetch_text(&client, url, &[], ctx).await?;
        Ok(Extracted::Transcript(captions::caption_text(track, &body)?))
    }
}

/// Caption tracks from `subtitles` (manual) and `automatic_captions`.
///
/// Output without either map, or with tracks that offer no `json3` format,
/// is unusable rather than proof the video has no captions.
fn caption_tracks(info: &Value) -> Result<Vec<CaptionTrack>, StrategyError> {
    let mut tracks = Vec::new();
    let mut saw_map = false;
    let mut offered = 0;

    for (field, auto) in [("subtitles", false), ("automatic_captions", true)] {
        let Some(map) = info.get(field).and_then(Value::as_object) else {
            continue;
        };
        saw_map = true;
        for (language, formats) in map {
            if language == "live_chat" {
                continue;
            }
            offered += 1;
            let json3 = formats
                .as_array()
                .into_iter()
                .flatten()
                .find(|f| f.get("ext").and_then(Value::as_str) == Some("json3"));
            if let Some(format) = json3 {
                tracks.push(CaptionTrack {
                    language_code: language.clone(),
                    name: format.get("name").and_then(Value::as_str).map(str::to_string),
                    is_auto_generated: auto,
                    url: format.get("url").and_then(Value::as_str).map(str::to_string),
                });
            }
        }
    }

    if !saw_map {
        return Err(StrategyError::malformed(
            "tool output has no subtitles or automatic_captions",
        ));
    }
    if offered > 0 && tracks.is_empty() {
        return Err(StrategyError::malformed(format!(
            "none of {} caption tracks is available as json3",
            offered
        )));
    }
    Ok(tracks)
}

fn metadata_from_info(info: &Value) -> Result<RawMetadata, StrategyError> {
    let text = |key: &str| {
        info.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let title = text("title").ok_or_else(|| StrategyError::malformed("tool output has no title"))?;
    let duration = info
        .get("duration")
        .and_then(RawDuration::from_json)
        .or_else(|| text("duration_string").map(RawDuration::Text));

    Ok(RawMetadata {
        title,
        channel_name: text("channel").or_else(|| text("uploader")).unwrap_or_default(),
        duration,
        upload_date: text("upload_date"),
        thumbnail_url: text("thumbnail"),
    })
}

#[async_trait]
impl ExtractionStrategy for ToolBasedStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn extract(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError> {
        let info = self.dump_info(request, ctx).await?;
        match request.artifact_type {
            ArtifactType::Metadata => Ok(Extracted::Metadata(metadata_from_info(&info)?)),
            ArtifactType::Transcript => self.fetch_transcript(&info, request, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialSet, Freshness};
    use crate::extractors::{ClientIdentity, CredentialPolicy, StrategyKind};
    use crate::models::VideoId;
    use crate::process::{CommandOutput, MockCommandRunner};
    use crate::proxy::{ProxyConfig, ProxyProvider};
    use std::time::Duration;

    fn descriptor(client: &str) -> StrategyDescriptor {
        StrategyDescriptor {
            name: format!("tool-{}", client),
            kind: StrategyKind::ToolBased {
                client: client.to_string(),
            },
            identity: ClientIdentity {
                player_client: Some(client.to_string()),
                ..ClientIdentity::default()
            },
            credentials: CredentialPolicy::IfUsable,
            min_freshness: Freshness::Stale,
            use_proxy: true,
            timeout: Duration::from_secs(20),
        }
    }

    fn request(artifact: ArtifactType) -> ExtractionRequest {
        ExtractionRequest::new(VideoId::parse("dQw4w9WgXcQ").unwrap(), artifact)
    }

    fn json_output(value: serde_json::Value) -> CommandOutput {
        CommandOutput {
            stdout: format!("{}\n", value).into_bytes(),
            stderr: Vec::new(),
            exit_code: Some(0),
        }
    }

    #[test]
    fn test_build_args_includes_identity_cookies_and_proxy() {
        let strategy = ToolBasedStrategy::new(
            descriptor("android"),
            "python3".to_string(),
            vec!["-m".to_string(), "yt_dlp".to_string()],
            Arc::new(MockCommandRunner::new()),
        );
        let ctx = AttemptContext {
            credentials: None,
            proxy: ProxyProvider::new(ProxyConfig {
                enabled: true,
                host: "10.0.0.1".to_string(),
                port: 3128,
                ..ProxyConfig::default()
            }),
            timeout: Duration::from_secs(20),
        };

        let args = strategy.build_args(&request(ArtifactType::Metadata), &ctx, Some("/tmp/c.txt"));
        assert_eq!(&args[..2], &["-m".to_string(), "yt_dlp".to_string()]);
        assert!(args.windows(2).any(|w| w[0] == "--extractor-args" && w[1] == "youtube:player_client=android"));
        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "/tmp/c.txt"));
        assert!(args.windows(2).any(|w| w[0] == "--proxy" && w[1] == "http://10.0.0.1:3128"));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_build_args_without_proxy_has_no_proxy_flag() {
        let strategy = ToolBasedStrategy::new(
            descriptor("tv_embedded"),
            "yt-dlp".to_string(),
            Vec::new(),
            Arc::new(MockCommandRunner::new()),
        );
        let args = strategy.build_args(
            &request(ArtifactType::Metadata),
            &AttemptContext::bare(Duration::from_secs(15)),
            None,
        );
        assert!(!args.iter().any(|a| a == "--proxy"));
        assert!(!args.iter().any(|a| a == "--cookies"));
    }

    #[tokio::test]
    async fn test_metadata_from_tool_json() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| {
                program.to_string() == "yt-dlp" && args.iter().any(|a| a == "--dump-json")
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(json_output(serde_json::json!({
                    "id": "dQw4w9WgXcQ",
                    "title": "Never Gonna Give You Up",
                    "channel": "Rick Astley",
                    "duration": 212,
                    "upload_date": "20091025",
                    "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"
                })))
            });

        let strategy = ToolBasedStrategy::new(
            descriptor("android"),
            "yt-dlp".to_string(),
            Vec::new(),
            Arc::new(runner),
        );
        let extracted = strategy
            .extract(&request(ArtifactType::Metadata), &AttemptContext::bare(Duration::from_secs(5)))
            .await
            .unwrap();

        match extracted {
            Extracted::Metadata(meta) => {
                assert_eq!(meta.title, "Never Gonna Give You Up");
                assert_eq!(meta.channel_name, "Rick Astley");
                assert_eq!(meta.duration, Some(RawDuration::Seconds(212.0)));
                assert_eq!(meta.upload_date.as_deref(), Some("20091025"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stderr_is_classified() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: b"ERROR: [youtube] dQw4w9WgXcQ: Sign in to confirm you're not a bot\n".to_vec(),
                exit_code: Some(1),
            })
        });

        let strategy = ToolBasedStrategy::new(
            descriptor("web"),
            "yt-dlp".to_string(),
            Vec::new(),
            Arc::new(runner),
        );
        let err = strategy
            .extract(&request(ArtifactType::Transcript), &AttemptContext::bare(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BotDetected);
        assert!(err.message.contains("not a bot"));
    }

    #[tokio::test]
    async fn test_no_subtitles_is_definitive() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _| {
            Ok(json_output(serde_json::json!({
                "title": "Silent film",
                "subtitles": {},
                "automatic_captions": {}
            })))
        });

        let strategy = ToolBasedStrategy::new(
            descriptor("android"),
            "yt-dlp".to_string(),
            Vec::new(),
            Arc::new(runner),
        );
        let err = strategy
            .extract(&request(ArtifactType::Transcript), &AttemptContext::bare(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoCaptionsAvailable);
    }

    async fn transcript_error(info: serde_json::Value) -> StrategyError {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(move |_, _, _| Ok(json_output(info.clone())));
        let strategy = ToolBasedStrategy::new(
            descriptor("android"),
            "yt-dlp".to_string(),
            Vec::new(),
            Arc::new(runner),
        );
        strategy
            .extract(&request(ArtifactType::Transcript), &AttemptContext::bare(Duration::from_secs(5)))
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_missing_caption_maps_advance_the_chain() {
        let err = transcript_error(serde_json::json!({"title": "x"})).await;
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(!err.kind.is_definitive());
    }

    #[tokio::test]
    async fn test_tracks_without_json3_are_malformed() {
        let err = transcript_error(serde_json::json!({
            "title": "x",
            "subtitles": {"en": [{"ext": "vtt", "url": "https://x/vtt"}]},
            "automatic_captions": {"de": [{"ext": "srv1", "url": "https://x/de"}]}
        }))
        .await;
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.message.contains("json3"));
    }

    #[tokio::test]
    async fn test_only_live_chat_means_no_captions() {
        let err = transcript_error(serde_json::json!({
            "title": "x",
            "subtitles": {"live_chat": [{"ext": "json", "url": "https://x/chat"}]}
        }))
        .await;
        assert_eq!(err.kind, ErrorKind::NoCaptionsAvailable);
    }

    #[tokio::test]
    async fn test_cookie_snapshot_is_passed_to_tool() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| {
                args.windows(2).any(|w| {
                    w[0] == "--cookies"
                        && std::fs::read_to_string(&w[1])
                            .map(|text| text.contains("SID\tsecret"))
                            .unwrap_or(false)
                })
            })
            .returning(|_, _, _| Ok(json_output(serde_json::json!({"title": "t", "uploader": "u"}))));

        let creds = CredentialSet::parse(".youtube.com\tTRUE\t/\tTRUE\t0\tSID\tsecret\n", Utc::now());
        let ctx = AttemptContext {
            credentials: Some(Arc::new(creds)),
            ..AttemptContext::bare(Duration::from_secs(5))
        };
        let strategy = ToolBasedStrategy::new(
            descriptor("web"),
            "yt-dlp".to_string(),
            Vec::new(),
            Arc::new(runner),
        );
        let extracted = strategy.extract(&request(ArtifactType::Metadata), &ctx).await.unwrap();
        assert!(matches!(extracted, Extracted::Metadata(m) if m.channel_name == "u"));
    }

    #[test]
    fn test_caption_tracks_prefer_json3() {
        let info = serde_json::json!({
            "subtitles": {
                "en": [{"ext": "vtt", "url": "https://x/vtt"}, {"ext": "json3", "url": "https://x/json3"}],
                "live_chat": [{"ext": "json3", "url": "https://x/chat"}]
            },
            "automatic_captions": {
                "de": [{"ext": "json3", "url": "https://x/de"}],
                "fr": [{"ext": "srv1", "url": "https://x/fr"}]
            }
        });
        let tracks = caption_tracks(&info).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].url.as_deref(), Some("https://x/json3"));
        assert!(!tracks[0].is_auto_generated);
        assert!(tracks[1].is_auto_generated);
    }
}
