//! # Gateway Configuration
//!
//! Configuration management for the gateway.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SKYGATE_SERVICE_URL=https://pds.example.com                        │
//! │     SKYGATE_PLATFORM=web                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/skygate/gateway.toml (Linux)                             │
//! │     ~/Library/Application Support/social.skygate.skygate/... (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     bsky.social, 3 attempts, 30s fresh / 5min retain                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # gateway.toml
//! [service]
//! authenticated_url = "https://bsky.social"
//! public_url = "https://public.api.bsky.app"
//! platform = "native"  # native | web
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//!
//! [cache]
//! fresh_secs = 30
//! retain_secs = 300
//!
//! [feeds]
//! public_sources = ["at://did:plc:z72i7hdynmk6r22z27h6tvur/app.bsky.feed.generator/whats-hot"]
//! fallback_accounts = ["bsky.app"]
//! ```

use serde::{Deserialize, Serialize};
use skygate_core::HostPlatform;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// Service Settings
// =============================================================================

/// Remote service endpoints and host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service used while a session is active.
    #[serde(default = "default_authenticated_url")]
    pub authenticated_url: String,

    /// Read-only service used without a session (web hosts only).
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Host platform. Decides whether logged-out reads are possible.
    #[serde(default)]
    pub platform: HostPlatform,

    /// Per-request timeout (seconds). A stall surfaces as a retryable error.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_authenticated_url() -> String {
    "https://bsky.social".to_string()
}

fn default_public_url() -> String {
    "https://public.api.bsky.app".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            authenticated_url: default_authenticated_url(),
            public_url: default_public_url(),
            platform: HostPlatform::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Retry executor settings.
///
/// ## Delay Schedule (defaults)
/// ```text
/// attempt 1 fails → wait 500ms  + jitter(0..=250ms)
/// attempt 2 fails → wait 1000ms + jitter(0..=250ms)
/// attempt 3 fails → give up, return the last error unmodified
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempt ceiling, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for the exponential part of the delay (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Upper bound of the uniform jitter added to each delay (milliseconds).
    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_max_jitter() -> u64 {
    250
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_jitter_ms: default_max_jitter(),
        }
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Query cache timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entries younger than this are served without refetching.
    #[serde(default = "default_fresh")]
    pub fresh_secs: u64,

    /// Entries older than this are evicted by the GC sweep.
    #[serde(default = "default_retain")]
    pub retain_secs: u64,

    /// Interval between GC sweeps.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

fn default_fresh() -> u64 {
    30
}

fn default_retain() -> u64 {
    300
}

fn default_gc_interval() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            fresh_secs: default_fresh(),
            retain_secs: default_retain(),
            gc_interval_secs: default_gc_interval(),
        }
    }
}

impl CacheSettings {
    pub fn fresh(&self) -> Duration {
        Duration::from_secs(self.fresh_secs)
    }

    pub fn retain(&self) -> Duration {
        Duration::from_secs(self.retain_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

// =============================================================================
// Feed Settings
// =============================================================================

/// Sources used by the default feed's fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    /// Known-good public feed generators, tried in order.
    #[serde(default = "default_public_sources")]
    pub public_sources: Vec<String>,

    /// Well-known accounts whose posts are aggregated as the last resort.
    #[serde(default = "default_fallback_accounts")]
    pub fallback_accounts: Vec<String>,

    /// Posts requested from each fallback account.
    #[serde(default = "default_per_account_limit")]
    pub per_account_limit: u32,

    /// Page size when the caller gives none.
    #[serde(default = "default_limit")]
    pub default_limit: u32,
}

fn default_public_sources() -> Vec<String> {
    vec![
        "at://did:plc:z72i7hdynmk6r22z27h6tvur/app.bsky.feed.generator/whats-hot".to_string(),
        "at://did:plc:z72i7hdynmk6r22z27h6tvur/app.bsky.feed.generator/hot-classic".to_string(),
        "at://did:plc:z72i7hdynmk6r22z27h6tvur/app.bsky.feed.generator/bsky-team".to_string(),
    ]
}

fn default_fallback_accounts() -> Vec<String> {
    vec![
        "bsky.app".to_string(),
        "atproto.com".to_string(),
        "jay.bsky.team".to_string(),
        "pfrazee.com".to_string(),
    ]
}

fn default_per_account_limit() -> u32 {
    10
}

fn default_limit() -> u32 {
    30
}

impl Default for FeedSettings {
    fn default() -> Self {
        FeedSettings {
            public_sources: default_public_sources(),
            fallback_accounts: default_fallback_accounts(),
            per_account_limit: default_per_account_limit(),
            default_limit: default_limit(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Where the file-backed session store lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory for session records. Defaults to the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Gateway Configuration
// =============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub feeds: FeedSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl GatewayConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (gateway.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> GatewayResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading gateway config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load gateway config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> GatewayResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| GatewayError::ConfigFile("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Gateway config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> GatewayResult<()> {
        for url in [&self.service.authenticated_url, &self.service.public_url] {
            let parsed = url::Url::parse(url)?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(GatewayError::InvalidUrl(format!(
                    "Service URL must start with http:// or https://, got: {}",
                    url
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(GatewayError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.cache.fresh_secs > self.cache.retain_secs {
            return Err(GatewayError::InvalidConfig(
                "fresh_secs must not exceed retain_secs".into(),
            ));
        }

        if self.feeds.public_sources.is_empty() && self.feeds.fallback_accounts.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "at least one public source or fallback account is required".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SKYGATE_SERVICE_URL") {
            debug!(url = %url, "Overriding service URL from environment");
            self.service.authenticated_url = url;
        }

        if let Ok(url) = std::env::var("SKYGATE_PUBLIC_URL") {
            debug!(url = %url, "Overriding public URL from environment");
            self.service.public_url = url;
        }

        if let Ok(platform) = std::env::var("SKYGATE_PLATFORM") {
            match platform.parse() {
                Ok(parsed) => self.service.platform = parsed,
                Err(_) => warn!(platform = %platform, "Unknown platform in environment"),
            }
        }

        if let Ok(attempts) = std::env::var("SKYGATE_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                debug!(max_attempts = n, "Overriding retry ceiling from environment");
                self.retry.max_attempts = n;
            }
        }

        if let Ok(path) = std::env::var("SKYGATE_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("social", "skygate", "skygate")
            .map(|dirs| dirs.config_dir().join("gateway.toml"))
    }

    /// Directory for the file-backed session store.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store.path.clone().or_else(|| {
            directories::ProjectDirs::from("social", "skygate", "skygate")
                .map(|dirs| dirs.data_dir().join("session"))
        })
    }

    pub fn platform(&self) -> HostPlatform {
        self.service.platform
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_secs)
    }
}
