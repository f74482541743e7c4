//! Resilient Transcriptor - transcript and metadata extraction for videos hosted
//! behind aggressive anti-automation defences.
//!
//! The library exposes a [`RequestOrchestrator`] that walks an ordered chain of
//! extraction strategies (a captions API, an external media tool presenting
//! different client identities, and a last-resort page scrape), caches
//! successful results and deduplicates concurrent requests for the same video.

pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod extractors;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod process;
pub mod proxy;
pub mod utils;

pub use cache::{CacheKey, ResultCache};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use credentials::{CredentialManager, CredentialSet, Freshness};
pub use error::{AttemptRecord, ErrorKind, ExtractionFailure, StrategyError};
pub use extractors::{ExtractionStrategy, StrategyOutcome};
pub use models::{ArtifactType, ExtractionRequest, ExtractionResult, VideoId};
pub use orchestrator::{EngineContext, EngineSettings, RequestOrchestrator};
pub use proxy::{ProxyConfig, ProxyProvider};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the transcriptor
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptorError {
    #[error("Invalid video identifier: {0}")]
    InvalidVideoId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
