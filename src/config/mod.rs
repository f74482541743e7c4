use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::{Freshness, FreshnessPolicy};
use crate::extractors::{ClientIdentity, CredentialPolicy, StrategyDescriptor, StrategyKind};
use crate::proxy::ProxyConfig;
use crate::TranscriptorError;

const APP_DIR: &str = "resilient-transcriptor";

/// Upper bound for credential age thresholds (ten years)
const MAX_THRESHOLD_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Orchestration limits and cache sizing
    pub engine: EngineConfig,

    /// Optional upstream proxy
    pub proxy: ProxyConfig,

    /// Cookie jar location and freshness thresholds
    pub credentials: CredentialsConfig,

    /// External media tool invocation
    pub tool: ToolConfig,

    /// Endpoints used by the HTTP strategies
    pub http: HttpConfig,

    /// Attempt order; the first strategy is tried first
    pub strategies: Vec<StrategySpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock bound for a whole fallback chain
    pub global_budget_secs: u64,

    /// Per-strategy timeout when a strategy sets none
    pub default_timeout_secs: u64,

    pub cache_ttl_secs: u64,

    pub cache_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Netscape-format cookie jar exported from a browser
    pub cookie_file: Option<PathBuf>,
    pub fresh_hours: i64,
    pub aging_hours: i64,
    pub stale_hours: i64,
    pub max_expired_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable, e.g. `yt-dlp` or `python3`
    pub program: String,

    /// Arguments placed before everything else, e.g. `["-m", "yt_dlp"]`
    pub base_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timedtext_url: String,
    pub oembed_url: String,
    pub watch_url: String,
}

/// Technique behind a configured strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyType {
    DirectApi,
    Tool,
    PageScrape,
}

/// One entry of the attempt order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub kind: StrategyType,

    /// Player client presented by tool strategies (android, tv_embedded, web, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub use_proxy: bool,

    #[serde(default)]
    pub credentials: CredentialPolicy,

    #[serde(default = "default_min_freshness")]
    pub min_freshness: Freshness,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_min_freshness() -> Freshness {
    Freshness::Stale
}

impl StrategySpec {
    pub fn new(kind: StrategyType) -> Self {
        Self {
            kind,
            client: None,
            timeout_secs: None,
            use_proxy: true,
            credentials: CredentialPolicy::default(),
            min_freshness: default_min_freshness(),
            user_agent: None,
            referer: None,
        }
    }

    pub fn tool(client: &str) -> Self {
        Self {
            client: Some(client.to_string()),
            ..Self::new(StrategyType::Tool)
        }
    }

    fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn with_credentials(mut self, policy: CredentialPolicy) -> Self {
        self.credentials = policy;
        self
    }

    /// Stable name reported as the result source
    pub fn name(&self) -> String {
        match self.kind {
            StrategyType::DirectApi => "direct-api".to_string(),
            StrategyType::Tool => format!("tool-{}", self.client.as_deref().unwrap_or("default")),
            StrategyType::PageScrape => "page-scrape".to_string(),
        }
    }

    pub fn descriptor(&self, engine: &EngineConfig) -> StrategyDescriptor {
        let kind = match self.kind {
            StrategyType::DirectApi => StrategyKind::DirectApi,
            StrategyType::Tool => StrategyKind::ToolBased {
                client: self.client.clone().unwrap_or_default(),
            },
            StrategyType::PageScrape => StrategyKind::PageScrape,
        };

        let mut identity = ClientIdentity::default();
        if let Some(agent) = &self.user_agent {
            identity.user_agent = agent.clone();
        }
        identity.referer = self.referer.clone();
        identity.player_client = self.client.clone();

        StrategyDescriptor {
            name: self.name(),
            kind,
            identity,
            credentials: self.credentials,
            min_freshness: self.min_freshness,
            use_proxy: self.use_proxy,
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(engine.default_timeout_secs)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_budget_secs: 90,
            default_timeout_secs: 25,
            cache_ttl_secs: 24 * 60 * 60,
            cache_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn global_budget(&self) -> Duration {
        Duration::from_secs(self.global_budget_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let policy = FreshnessPolicy::default();
        Self {
            cookie_file: None,
            fresh_hours: policy.fresh_within.num_hours(),
            aging_hours: policy.aging_within.num_hours(),
            stale_hours: policy.stale_within.num_hours(),
            max_expired_fraction: policy.max_expired_fraction,
        }
    }
}

impl CredentialsConfig {
    pub fn policy(&self) -> FreshnessPolicy {
        FreshnessPolicy {
            fresh_within: threshold(self.fresh_hours),
            aging_within: threshold(self.aging_hours),
            stale_within: threshold(self.stale_hours),
            max_expired_fraction: self.max_expired_fraction,
        }
    }
}

/// `chrono::Duration::hours` panics out of range
fn threshold(hours: i64) -> chrono::Duration {
    chrono::Duration::hours(hours.clamp(0, MAX_THRESHOLD_HOURS))
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            base_args: Vec::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timedtext_url: "https://www.youtube.com/api/timedtext".to_string(),
            oembed_url: "https://www.youtube.com/oembed".to_string(),
            watch_url: "https://www.youtube.com/watch".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            proxy: ProxyConfig::default(),
            credentials: CredentialsConfig::default(),
            tool: ToolConfig::default(),
            http: HttpConfig::default(),
            strategies: vec![
                StrategySpec::new(StrategyType::DirectApi)
                    .with_timeout(15)
                    .with_credentials(CredentialPolicy::Never),
                StrategySpec::tool("android"),
                StrategySpec::tool("tv_embedded"),
                StrategySpec::tool("web").with_credentials(CredentialPolicy::Required),
                StrategySpec::new(StrategyType::PageScrape).with_timeout(20),
            ],
        }
    }
}

impl Config {
    /// Load configuration from `path`, the usual locations, or defaults.
    ///
    /// Not validated here; callers validate after applying command-line overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_path(),
        };

        let config = match config_path {
            Some(config_path) => {
                tracing::debug!("Loading configuration from {}", config_path.display());
                let content = fs_err::read_to_string(&config_path)
                    .context("Failed to read config file")?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs_err::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// First existing config file, if any
    fn config_path() -> Option<PathBuf> {
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.yaml"))
            .filter(|path| path.exists())
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), TranscriptorError> {
        let invalid = |msg: &str| Err(TranscriptorError::Config(msg.to_string()));

        if self.strategies.is_empty() {
            return invalid("at least one strategy must be configured");
        }
        if self.engine.global_budget_secs == 0 {
            return invalid("engine.global_budget_secs must be positive");
        }
        if self.engine.default_timeout_secs == 0 {
            return invalid("engine.default_timeout_secs must be positive");
        }
        if self.engine.cache_capacity == 0 {
            return invalid("engine.cache_capacity must be positive");
        }
        if self.strategies.iter().any(|s| s.timeout_secs == Some(0)) {
            return invalid("strategy timeouts must be positive");
        }
        if self
            .strategies
            .iter()
            .any(|s| s.kind == StrategyType::Tool && s.client.as_deref().unwrap_or("").is_empty())
        {
            return invalid("tool strategies need a player client");
        }
        if self.proxy.enabled && (self.proxy.host.trim().is_empty() || self.proxy.port == 0) {
            return invalid("an enabled proxy needs a host and a non-zero port");
        }
        let creds = &self.credentials;
        if creds.fresh_hours <= 0
            || creds.fresh_hours >= creds.aging_hours
            || creds.aging_hours >= creds.stale_hours
        {
            return invalid(
                "credentials thresholds must satisfy 0 < fresh_hours < aging_hours < stale_hours",
            );
        }
        if creds.stale_hours > MAX_THRESHOLD_HOURS {
            return invalid("credentials.stale_hours is out of range");
        }
        if !(0.0..=1.0).contains(&self.credentials.max_expired_fraction) {
            return invalid("credentials.max_expired_fraction must be within 0..=1");
        }
        if self.tool.program.trim().is_empty() {
            return invalid("tool.program must not be empty");
        }
        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Global budget: {}s", self.engine.global_budget_secs);
        println!("  Default strategy timeout: {}s", self.engine.default_timeout_secs);
        println!(
            "  Cache: {} entries, TTL {}s",
            self.engine.cache_capacity, self.engine.cache_ttl_secs
        );
        match crate::proxy::ProxyProvider::new(self.proxy.clone()).redacted_url() {
            Some(url) => println!("  Proxy: {}", url),
            None => println!("  Proxy: disabled"),
        }
        match &self.credentials.cookie_file {
            Some(path) => println!("  Cookie file: {}", path.display()),
            None => println!("  Cookie file: none"),
        }
        println!(
            "  Tool: {} {}",
            self.tool.program,
            self.tool.base_args.join(" ")
        );
        println!("  Strategies:");
        for (i, spec) in self.strategies.iter().enumerate() {
            println!("    {}. {}", i + 1, spec.name());
        }
    }
}
