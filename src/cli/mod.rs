use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "transcriptor",
    about = "Resilient Transcriptor - Extract transcripts and metadata from videos behind bot defences",
    version,
    long_about = "Walks an ordered chain of extraction strategies (captions API, an external media tool presenting different client identities, and a page scrape) until one succeeds, with a global time budget, result caching and cookie/proxy support."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml, then the user config directory)
    #[arg(short, long, global = true, value_name = "FILE", env = "TRANSCRIPTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Route strategies through the configured proxy
    #[arg(long, global = true, conflicts_with = "no_proxy", env = "TRANSCRIPTOR_PROXY")]
    pub proxy: bool,

    /// Never use the configured proxy
    #[arg(long, global = true)]
    pub no_proxy: bool,

    /// Global time budget per extraction, in seconds
    #[arg(long, global = true, value_name = "SECS", env = "TRANSCRIPTOR_BUDGET")]
    pub budget: Option<u64>,

    /// Cache time-to-live, in seconds
    #[arg(long, global = true, value_name = "SECS", env = "TRANSCRIPTOR_CACHE_TTL")]
    pub cache_ttl: Option<u64>,

    /// Netscape-format cookie jar
    #[arg(long, global = true, value_name = "FILE", env = "TRANSCRIPTOR_COOKIES")]
    pub cookies: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract a transcript (or metadata) for one video
    Extract {
        /// Video id or URL (youtube.com, youtu.be)
        #[arg(value_name = "VIDEO")]
        video: String,

        /// Fetch metadata instead of the transcript
        #[arg(short, long)]
        metadata: bool,

        /// Preferred caption language
        #[arg(short, long, value_name = "LANG")]
        lang: Option<String>,

        /// Ignore any cached result
        #[arg(long)]
        force_refresh: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Read JSON request envelopes from stdin, one per line
    Batch {
        /// Maximum extractions running at once
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },

    /// List the configured strategies in attempt order
    Strategies,

    /// Inspect the cookie jar
    Credentials,

    /// Show or write configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the effective configuration to this file
        #[arg(long, value_name = "FILE")]
        init: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Response envelope as JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if self.proxy {
            config.proxy.enabled = true;
        }
        if self.no_proxy {
            config.proxy.enabled = false;
        }
        if let Some(budget) = self.budget {
            config.engine.global_budget_secs = budget;
        }
        if let Some(ttl) = self.cache_ttl {
            config.engine.cache_ttl_secs = ttl;
        }
        if let Some(cookies) = &self.cookies {
            config.credentials.cookie_file = Some(cookies.clone());
        }
    }
}
