use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

pub mod captions;
pub mod classify;
pub mod direct;
pub mod page;
pub mod tool;

use crate::config::{Config, StrategyType};
use crate::credentials::{CredentialSet, Freshness};
use crate::error::{ErrorKind, StrategyError};
use crate::models::{ExtractionRequest, TranscriptSegment, VideoId};
use crate::process::{CommandRunner, TokioCommandRunner};
use crate::proxy::ProxyProvider;
use crate::utils::RawDuration;

pub use direct::DirectApiStrategy;
pub use page::PageScrapeStrategy;
pub use tool::ToolBasedStrategy;

/// Desktop browser fingerprint used when a strategy declares none
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Canonical public page for a video
pub fn watch_url(video_id: &VideoId) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Which technique a strategy uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyKind {
    DirectApi,
    ToolBased { client: String },
    PageScrape,
}

/// How a strategy treats the stored cookie jar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialPolicy {
    /// Never sends cookies
    Never,
    /// Sends cookies when they are usable, runs without them otherwise
    #[default]
    IfUsable,
    /// Refuses to run without usable cookies
    Required,
}

impl fmt::Display for CredentialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialPolicy::Never => "never",
            CredentialPolicy::IfUsable => "if-usable",
            CredentialPolicy::Required => "required",
        };
        f.write_str(s)
    }
}

/// Fingerprint a strategy presents to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_agent: String,
    pub referer: Option<String>,
    /// Player client id understood by the media tool (android, tv_embedded, web, ...)
    pub player_client: Option<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
            player_client: None,
        }
    }
}

/// Static description of a configured strategy
#[derive(Debug, Clone)]
pub struct StrategyDescriptor {
    /// Stable name reported as the result `source`
    pub name: String,
    pub kind: StrategyKind,
    pub identity: ClientIdentity,
    pub credentials: CredentialPolicy,
    /// Least fresh credential class this strategy accepts
    pub min_freshness: Freshness,
    /// May route through the proxy when it is enabled
    pub use_proxy: bool,
    pub timeout: Duration,
}

/// Per-attempt inputs resolved by the orchestrator
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Cookies, already filtered by the strategy's credential policy
    pub credentials: Option<Arc<CredentialSet>>,
    /// Disabled unless both the proxy and the strategy allow it
    pub proxy: ProxyProvider,
    pub timeout: Duration,
}

impl AttemptContext {
    pub fn bare(timeout: Duration) -> Self {
        Self {
            credentials: None,
            proxy: ProxyProvider::disabled(),
            timeout,
        }
    }

    pub fn routes_through_proxy(&self) -> bool {
        self.proxy.is_enabled()
    }
}

/// Transcript text before it is tagged with its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionText {
    pub text: String,
    pub language_code: String,
    pub is_auto_generated: bool,
    pub segments: Vec<TranscriptSegment>,
}

/// Metadata as found by a strategy, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawMetadata {
    pub title: String,
    pub channel_name: String,
    pub duration: Option<RawDuration>,
    pub upload_date: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// What a strategy hands back on success
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Transcript(CaptionText),
    Metadata(RawMetadata),
}

/// Result of one attempt; exactly one of success or error kind
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub strategy: String,
    pub result: Result<Extracted, StrategyError>,
    pub latency: Duration,
}

impl StrategyOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(|e| e.kind)
    }
}

/// One extraction technique
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn descriptor(&self) -> &StrategyDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Perform a single extraction attempt
    async fn extract(
        &self,
        request: &ExtractionRequest,
        ctx: &AttemptContext,
    ) -> Result<Extracted, StrategyError>;

    /// Timed wrapper around [`extract`](Self::extract)
    async fn attempt(&self, request: &ExtractionRequest, ctx: &AttemptContext) -> StrategyOutcome {
        let started = Instant::now();
        let result = self.extract(request, ctx).await;
        StrategyOutcome {
            strategy: self.name().to_string(),
            result,
            latency: started.elapsed(),
        }
    }
}

/// Build the configured strategy list, in configuration order
pub fn build_strategies(config: &Config) -> Vec<Arc<dyn ExtractionStrategy>> {
    build_strategies_with_runner(config, Arc::new(TokioCommandRunner::new()))
}

pub fn build_strategies_with_runner(
    config: &Config,
    runner: Arc<dyn CommandRunner>,
) -> Vec<Arc<dyn ExtractionStrategy>> {
    config
        .strategies
        .iter()
        .map(|spec| -> Arc<dyn ExtractionStrategy> {
            let descriptor = spec.descriptor(&config.engine);
            match spec.kind {
                StrategyType::DirectApi => Arc::new(DirectApiStrategy::new(
                    descriptor,
                    config.http.timedtext_url.clone(),
                    config.http.oembed_url.clone(),
                    config.http.watch_url.clone(),
                )),
                StrategyType::Tool => Arc::new(ToolBasedStrategy::new(
                    descriptor,
                    config.tool.program.clone(),
                    config.tool.base_args.clone(),
                    runner.clone(),
                )),
                StrategyType::PageScrape => Arc::new(PageScrapeStrategy::new(
                    descriptor,
                    config.http.watch_url.clone(),
                )),
            }
        })
        .collect()
}

/// HTTP client presenting `identity`, routed through the context's proxy
pub(crate) fn http_client(
    identity: &ClientIdentity,
    ctx: &AttemptContext,
) -> Result<Client, StrategyError> {
    let mut headers = HeaderMap::new();
    if let Some(referer) = &identity.referer {
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, value);
        }
    }
    headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));

    let mut builder = Client::builder()
        .user_agent(identity.user_agent.clone())
        .default_headers(headers)
        .timeout(ctx.timeout);

    let proxy = ctx
        .proxy
        .reqwest_proxy()
        .map_err(|e| StrategyError::new(ErrorKind::ProxyUnreachable, e.to_string()))?;
    builder = match proxy {
        Some(proxy) => builder.proxy(proxy),
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| StrategyError::new(ErrorKind::ProxyUnreachable, format!("HTTP client: {}", e)))
}

/// GET `url` and return the body, classifying transport and status failures
pub(crate) async fn fetch_text(
    client: &Client,
    url: &str,
    query: &[(&str, &str)],
    ctx: &AttemptContext,
) -> Result<String, StrategyError> {
    let mut request = client.get(url).query(query);

    if let (Some(creds), Ok(parsed)) = (&ctx.credentials, Url::parse(url)) {
        if let Some(cookie) = parsed
            .host_str()
            .and_then(|host| creds.cookie_header(host, Utc::now()))
        {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                request = request.header(COOKIE, value);
            }
        }
    }

    let response = request
        .send()
        .await
        .map_err(|e| classify::classify_reqwest(&e, ctx.routes_through_proxy()))?;

    let status = response.status();
    if let Some(kind) = classify::classify_status(status) {
        return Err(StrategyError::new(kind, format!("{} returned HTTP {}", url, status)));
    }

    response
        .text()
        .await
        .map_err(|e| classify::classify_reqwest(&e, ctx.routes_through_proxy()))
}
