use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheKey, ChainResult, Lookup, ResultCache};
use crate::config::{Config, EngineConfig};
use crate::credentials::{CredentialManager, CredentialSet};
use crate::error::{AttemptRecord, ErrorKind, ExtractionFailure, StrategyError};
use crate::extractors::{
    build_strategies, AttemptContext, CredentialPolicy, Extracted, ExtractionStrategy,
    StrategyDescriptor, StrategyOutcome,
};
use crate::models::{ArtifactType, ExtractionRequest, ExtractionResult, Transcript, VideoMetadata};
use crate::proxy::ProxyProvider;
use crate::utils::{normalize, normalize_upload_date};

/// Shared read-mostly state threaded through every orchestration
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub credentials: Arc<CredentialManager>,
    pub proxy: ProxyProvider,
}

impl EngineContext {
    pub fn new(credentials: CredentialManager, proxy: ProxyProvider) -> Self {
        Self {
            credentials: Arc::new(credentials),
            proxy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Wall-clock bound for one fallback chain
    pub global_budget: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(engine: &EngineConfig) -> Self {
        Self {
            global_budget: engine.global_budget(),
            cache_ttl: engine.cache_ttl(),
            cache_capacity: engine.cache_capacity,
        }
    }
}

/// Position of a fallback chain.
///
/// `Pending -> Attempting(i) -> Success(i) | Advance(i + 1) | EarlyStop | ExhaustedFailure`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    Attempting(usize),
    Advance(usize),
    Success(usize),
    ExhaustedFailure,
    /// Stopped before the list ran out: a definitive failure or the budget
    EarlyStop(ErrorKind),
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChainState::Success(_) | ChainState::ExhaustedFailure | ChainState::EarlyStop(_)
        )
    }

    /// Where the chain goes from a non-attempting state
    pub fn next(self, strategies: usize, budget_left: bool) -> ChainState {
        let index = match self {
            ChainState::Pending => 0,
            ChainState::Advance(index) => index,
            other => return other,
        };
        if index >= strategies {
            ChainState::ExhaustedFailure
        } else if !budget_left {
            ChainState::EarlyStop(ErrorKind::BudgetExceeded)
        } else {
            ChainState::Attempting(index)
        }
    }

    /// Where the chain goes once attempt `index` has finished
    pub fn after_attempt(index: usize, outcome: Result<(), ErrorKind>) -> ChainState {
        match outcome {
            Ok(()) => ChainState::Success(index),
            Err(kind) if kind.is_definitive() || kind == ErrorKind::BudgetExceeded => {
                ChainState::EarlyStop(kind)
            }
            Err(_) => ChainState::Advance(index + 1),
        }
    }
}

/// Entry point of the engine: cache, single-flight and the fallback chain.
///
/// Cloning is cheap; clones share strategies, context and cache.
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
    context: EngineContext,
    settings: EngineSettings,
    cache: Arc<ResultCache>,
}

impl RequestOrchestrator {
    pub fn new(
        strategies: Vec<Arc<dyn ExtractionStrategy>>,
        context: EngineContext,
        settings: EngineSettings,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(settings.cache_ttl, settings.cache_capacity));
        Self {
            inner: Arc::new(Inner {
                strategies,
                context,
                settings,
                cache,
            }),
        }
    }

    /// Build the production engine: strategies, cookie jar and proxy from `config`
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let credentials = CredentialManager::from_path(
            config.credentials.policy(),
            config.credentials.cookie_file.as_deref(),
        )?;
        let context = EngineContext::new(credentials, ProxyProvider::new(config.proxy.clone()));
        Ok(Self::new(
            build_strategies(config),
            context,
            EngineSettings::from(&config.engine),
        ))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.inner.strategies.iter().map(|s| s.descriptor())
    }

    pub fn context(&self) -> &EngineContext {
        &self.inner.context
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// Extract one artifact.
    ///
    /// Returns a live cached result unless `forceRefresh` is set; otherwise
    /// joins the chain already running for the same key or starts one.
    /// Dropping the returned future withdraws this caller; the chain is
    /// cancelled once no caller is left.
    pub async fn extract(&self, request: ExtractionRequest) -> ChainResult {
        let key = CacheKey::for_request(&request);
        let bypass = request.options.force_refresh;
        let inner = Arc::clone(&self.inner);

        let lookup = self
            .inner
            .cache
            .lookup_or_start(key, bypass, move || inner.run_chain(request).boxed());

        match lookup {
            Lookup::Hit(result) => {
                tracing::debug!("Cache hit for {} ({})", result.source(), result.artifact_type());
                Ok(result)
            }
            Lookup::Chain { chain, joined } => {
                if joined {
                    tracing::debug!("Joining in-flight extraction");
                }
                chain.await
            }
        }
    }

    /// Like [`extract`](Self::extract), giving up when `cancel` resolves first
    pub async fn extract_until<C>(&self, request: ExtractionRequest, cancel: C) -> Option<ChainResult>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.extract(request) => Some(result),
            _ = cancel => {
                tracing::info!("Extraction cancelled by caller");
                None
            }
        }
    }
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field(
                "strategies",
                &self.descriptors().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            )
            .field("settings", &self.inner.settings)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

impl Inner {
    async fn run_chain(self: Arc<Self>, request: ExtractionRequest) -> ChainResult {
        let span = tracing::info_span!(
            "extract",
            request_id = %Uuid::new_v4(),
            video = %request.video_id,
            artifact = %request.artifact_type,
        );
        self.walk_chain(&request).instrument(span).await
    }

    async fn walk_chain(&self, request: &ExtractionRequest) -> ChainResult {
        let started = Instant::now();
        let budget = self.settings.global_budget;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut success: Option<ExtractionResult> = None;
        let mut stop_error: Option<StrategyError> = None;
        let mut state = ChainState::Pending;

        while !state.is_terminal() {
            state = match state {
                ChainState::Attempting(index) => {
                    let strategy = &self.strategies[index];
                    let remaining = budget.saturating_sub(started.elapsed());
                    let (outcome, cut_by_budget) = self.attempt(strategy.as_ref(), request, remaining).await;

                    let finished = outcome
                        .result
                        .and_then(|extracted| finalize(extracted, &outcome.strategy, request.artifact_type));

                    match finished {
                        Ok(result) => {
                            tracing::info!("{} succeeded in {:?}", outcome.strategy, outcome.latency);
                            success = Some(result);
                            ChainState::after_attempt(index, Ok(()))
                        }
                        Err(error) => {
                            tracing::warn!("{} failed with {}: {}", outcome.strategy, error.kind, error.message);
                            attempts.push(AttemptRecord::new(&outcome.strategy, &error, outcome.latency));
                            let kind = if cut_by_budget {
                                ErrorKind::BudgetExceeded
                            } else {
                                error.kind
                            };
                            stop_error = Some(error);
                            ChainState::after_attempt(index, Err(kind))
                        }
                    }
                }
                other => other.next(self.strategies.len(), started.elapsed() < budget),
            };
            tracing::debug!(?state, "Chain state");
        }

        match (state, success, stop_error) {
            (ChainState::Success(_), Some(result), _) => Ok(result),
            (ChainState::EarlyStop(ErrorKind::BudgetExceeded), _, _) => {
                tracing::warn!("Budget of {:?} exhausted", budget);
                Err(ExtractionFailure::budget_exceeded(budget, attempts))
            }
            (ChainState::EarlyStop(_), _, Some(error)) => {
                tracing::info!("Stopping early: {}", error.kind);
                Err(ExtractionFailure::definitive(&error, attempts))
            }
            _ => Err(ExtractionFailure::exhausted(attempts)),
        }
    }

    /// Run one strategy under `min(strategy timeout, remaining budget)`.
    ///
    /// The flag is set when the remaining budget, not the strategy's own
    /// timeout, cut the attempt short.
    async fn attempt(
        &self,
        strategy: &dyn ExtractionStrategy,
        request: &ExtractionRequest,
        remaining: Duration,
    ) -> (StrategyOutcome, bool) {
        let descriptor = strategy.descriptor();
        let name = descriptor.name.clone();

        let credentials = match self.credentials_for(descriptor) {
            Ok(credentials) => credentials,
            Err(error) => {
                let outcome = StrategyOutcome {
                    strategy: name,
                    result: Err(error),
                    latency: Duration::ZERO,
                };
                return (outcome, false);
            }
        };

        let timeout = descriptor.timeout.min(remaining);
        let ctx = AttemptContext {
            credentials,
            proxy: if descriptor.use_proxy {
                self.context.proxy.clone()
            } else {
                ProxyProvider::disabled()
            },
            timeout,
        };

        tracing::debug!(
            "Attempting {} (timeout {:?}, proxy: {}, cookies: {})",
            name,
            timeout,
            ctx.routes_through_proxy(),
            ctx.credentials.is_some()
        );

        match tokio::time::timeout(timeout, strategy.attempt(request, &ctx)).await {
            Ok(outcome) => (outcome, false),
            Err(_) => {
                let outcome = StrategyOutcome {
                    strategy: name,
                    result: Err(StrategyError::new(
                        ErrorKind::NetworkTimeout,
                        format!("no result within {:?}", timeout),
                    )),
                    latency: timeout,
                };
                (outcome, timeout < descriptor.timeout)
            }
        }
    }

    /// Apply the strategy's credential policy to the current jar
    fn credentials_for(
        &self,
        descriptor: &StrategyDescriptor,
    ) -> Result<Option<Arc<CredentialSet>>, StrategyError> {
        match descriptor.credentials {
            CredentialPolicy::Never => Ok(None),
            CredentialPolicy::IfUsable => Ok(self
                .context
                .credentials
                .usable_snapshot(descriptor.min_freshness)
                .1),
            CredentialPolicy::Required => {
                match self.context.credentials.usable_snapshot(descriptor.min_freshness) {
                    (_, Some(set)) => Ok(Some(set)),
                    (class, None) => Err(StrategyError::new(
                        ErrorKind::CredentialExpired,
                        format!(
                            "credentials are {}, {} needs {} or fresher",
                            class, descriptor.name, descriptor.min_freshness
                        ),
                    )),
                }
            }
        }
    }
}

/// Tag a strategy's output with its source and normalize metadata fields
fn finalize(
    extracted: Extracted,
    source: &str,
    expected: ArtifactType,
) -> Result<ExtractionResult, StrategyError> {
    match (expected, extracted) {
        (ArtifactType::Transcript, Extracted::Transcript(captions)) => {
            Ok(ExtractionResult::Transcript(Transcript {
                text: captions.text,
                language_code: captions.language_code,
                is_auto_generated: captions.is_auto_generated,
                segments: captions.segments,
                source: source.to_string(),
            }))
        }
        (ArtifactType::Metadata, Extracted::Metadata(raw)) => {
            Ok(ExtractionResult::Metadata(VideoMetadata {
                title: raw.title,
                channel_name: raw.channel_name,
                duration_seconds: raw.duration.and_then(normalize),
                upload_date: raw.upload_date.as_deref().and_then(normalize_upload_date),
                thumbnail_url: raw.thumbnail_url,
                source: source.to_string(),
            }))
        }
        (expected, _) => Err(StrategyError::malformed(format!(
            "{} returned the wrong artifact for a {} request",
            source, expected
        ))),
    }
}
