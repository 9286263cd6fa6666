//! Sync configuration
//!
//! Source descriptors and engine settings are read once at startup, from a
//! TOML file when one is given and from built-in defaults otherwise. A
//! configuration that fails validation is fatal: no cycle runs with it.

use crate::fetch::rate_limit::RateLimitBudget;
use crate::fetch::retry::RetryPolicy;
use mtg_common::SourceId;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default minimum time between two successful syncs of one source
const DEFAULT_MIN_INTERVAL_SECS: u64 = 6 * 3600;

/// Startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid source '{source_id}': {reason}")]
    InvalidSource { source_id: SourceId, reason: String },

    #[error("source '{0}' is configured more than once")]
    DuplicateSource(SourceId),

    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Immutable description of one upstream source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceDescriptor {
    pub id: SourceId,
    /// Absolute URL of the bulk resource
    pub url: String,
    /// Cache key for the payload; defaults to the last URL path segment
    #[serde(default)]
    pub resource: Option<String>,
    /// Media type sent in the `Accept` header
    #[serde(default = "default_accept")]
    pub accept: String,
    #[serde(default)]
    pub rate_limit: RateLimitBudget,
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

fn default_accept() -> String {
    "application/json".to_string()
}

fn default_min_interval_secs() -> u64 {
    DEFAULT_MIN_INTERVAL_SECS
}

impl SourceDescriptor {
    pub fn new(id: SourceId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            resource: None,
            accept: default_accept(),
            rate_limit: RateLimitBudget::default(),
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
        }
    }

    pub fn with_rate_limit(mut self, requests: u32, per_secs: u64) -> Self {
        self.rate_limit = RateLimitBudget { requests, per_secs };
        self
    }

    pub fn with_min_interval(mut self, secs: u64) -> Self {
        self.min_interval_secs = secs;
        self
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    /// Name under which this source's payload is cached
    pub fn resource_key(&self) -> String {
        if let Some(resource) = &self.resource {
            return resource.clone();
        }
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| "payload".to_string())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSource {
            source_id: self.id,
            reason,
        };

        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| invalid(format!("url '{}' is not valid: {}", self.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(format!("unsupported url scheme '{}'", url.scheme())));
        }
        if self.rate_limit.requests == 0 || self.rate_limit.per_secs == 0 {
            return Err(invalid("rate limit must allow at least one request per interval".into()));
        }
        let resource = self.resource_key();
        if resource.contains('/') || resource.contains('\\') || resource.starts_with('.') {
            return Err(invalid(format!("resource name '{}' is not a plain file name", resource)));
        }
        if self.accept.trim().is_empty() {
            return Err(invalid("accept media type is empty".into()));
        }
        Ok(())
    }
}

/// Built-in descriptors for the three known upstreams
pub fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        // Scryfall asks for 50-100ms between requests
        SourceDescriptor::new(SourceId::Scryfall, "https://api.scryfall.com/sets")
            .with_rate_limit(10, 1),
        SourceDescriptor::new(SourceId::Mtgjson, "https://mtgjson.com/api/v5/SetList.json")
            .with_rate_limit(20, 1),
        // Unauthenticated GitHub traffic: 60 requests per hour
        SourceDescriptor::new(
            SourceId::Vectors,
            "https://raw.githubusercontent.com/Investigamer/mtg-vectors/main/manifest.json",
        )
        .with_rate_limit(60, 3600),
    ]
}

/// Returns the default data directory: ~/.local/share/catalog_sync
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog_sync")
}

/// Returns the default payload cache directory: ~/.cache/catalog_sync
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog_sync")
}

/// Engine-wide settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite database file
    pub database: PathBuf,
    /// Directory for cached raw payloads
    pub cache_dir: PathBuf,
    /// Ceiling on concurrently syncing sources
    pub max_workers: usize,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Serve payloads from the cache instead of the network
    pub offline: bool,
    pub retry: RetryPolicy,
    pub sources: Vec<SourceDescriptor>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: default_data_dir().join("catalog.db"),
            cache_dir: default_cache_dir(),
            max_workers: 4,
            user_agent: format!("catalog_sync/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 60,
            offline: false,
            retry: RetryPolicy::default(),
            sources: default_sources(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::InvalidSetting {
                field: "sources",
                reason: "at least one source must be configured".into(),
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "retry.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidSetting {
                field: "retry.base_delay_ms",
                reason: "must not exceed retry.max_delay_ms".into(),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                field: "user_agent",
                reason: "must not be empty".into(),
            });
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id) {
                return Err(ConfigError::DuplicateSource(source.id));
            }
            source.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(
            config.source(SourceId::Mtgjson).unwrap().resource_key(),
            "SetList.json"
        );
        assert_eq!(config.source(SourceId::Scryfall).unwrap().resource_key(), "sets");
    }

    #[test]
    fn parses_full_config() {
        let config = SyncConfig::from_toml(
            r#"
            database = "/tmp/catalog.db"
            cache_dir = "/tmp/catalog-cache"
            max_workers = 2
            offline = true

            [retry]
            max_attempts = 6
            base_delay_ms = 100
            max_delay_ms = 2000

            [[sources]]
            id = "scryfall"
            url = "https://api.scryfall.com/sets"
            min_interval_secs = 60
            rate_limit = { requests = 5, per_secs = 1 }

            [[sources]]
            id = "vectors"
            url = "https://example.com/manifest.json"
            resource = "vectors-manifest.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_workers, 2);
        assert!(config.offline);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.sources.len(), 2);

        let scryfall = config.source(SourceId::Scryfall).unwrap();
        assert_eq!(scryfall.min_interval(), Duration::from_secs(60));
        assert_eq!(scryfall.rate_limit.requests, 5);
        assert_eq!(scryfall.accept, "application/json");

        let vectors = config.source(SourceId::Vectors).unwrap();
        assert_eq!(vectors.resource_key(), "vectors-manifest.json");
        assert_eq!(vectors.min_interval_secs, DEFAULT_MIN_INTERVAL_SECS);
    }

    #[test]
    fn rejects_duplicate_sources() {
        let err = SyncConfig::from_toml(
            r#"
            [[sources]]
            id = "mtgjson"
            url = "https://mtgjson.com/api/v5/SetList.json"

            [[sources]]
            id = "mtgjson"
            url = "https://mtgjson.com/api/v5/SetList.json"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSource(SourceId::Mtgjson)));
    }

    #[test]
    fn rejects_malformed_descriptor() {
        let err = SyncConfig::from_toml(
            r#"
            [[sources]]
            id = "scryfall"
            url = "ftp://api.scryfall.com/sets"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSource { source_id: SourceId::Scryfall, .. }
        ));

        let err = SyncConfig::from_toml(
            r#"
            [[sources]]
            id = "scryfall"
            url = "https://api.scryfall.com/sets"
            rate_limit = { requests = 0, per_secs = 1 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSource { .. }));
    }

    #[test]
    fn rejects_unknown_source_id() {
        let err = SyncConfig::from_toml(
            r#"
            [[sources]]
            id = "gatherer"
            url = "https://gatherer.wizards.com"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = SyncConfig::from_toml("max_workers = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting { field: "max_workers", .. }
        ));
    }
}
