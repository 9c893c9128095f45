//! Engine configuration
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! base_url = "https://dashboard.example.com/api"
//! aggregate_concurrency = 8
//! store_path = "/var/cache/roster"
//! ```

use crate::error::ConfigError;
use roster_store::DEFAULT_STORAGE_KEY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest batch the backend accepts
pub const MAX_BATCH_SIZE: usize = 100;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Identifiers per batch call (1..=100)
    pub batch_size: usize,
    /// Largest failed set still retried one by one
    pub max_individual_retries: usize,
    /// Workers per aggregate query
    pub aggregate_concurrency: usize,
    /// Workers for one-by-one resolution
    pub resolve_concurrency: usize,
    /// Whether the backend exposes the batch resolve endpoint
    pub use_batch_endpoint: bool,
    /// Freshness window of cached records, in seconds
    pub cache_ttl_secs: u64,
    /// Directory for the durable store; in-memory when absent
    pub store_path: Option<PathBuf>,
    /// Key the store blob lives under
    pub storage_key: String,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With backend base URL
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With individual retry threshold
    #[inline]
    #[must_use]
    pub fn with_max_individual_retries(mut self, max: usize) -> Self {
        self.max_individual_retries = max;
        self
    }

    /// With aggregate worker count
    #[inline]
    #[must_use]
    pub fn with_aggregate_concurrency(mut self, concurrency: usize) -> Self {
        self.aggregate_concurrency = concurrency;
        self
    }

    /// With one-by-one resolution worker count
    #[inline]
    #[must_use]
    pub fn with_resolve_concurrency(mut self, concurrency: usize) -> Self {
        self.resolve_concurrency = concurrency;
        self
    }

    /// Enable or disable the batch endpoint
    #[inline]
    #[must_use]
    pub fn with_batch_endpoint(mut self, enabled: bool) -> Self {
        self.use_batch_endpoint = enabled;
        self
    }

    /// With cache freshness window
    #[inline]
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// With durable store directory
    #[inline]
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Cache freshness window
    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Per-request timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "base_url",
                format!("'{}' is not an http(s) URL", self.base_url),
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "batch_size",
                format!("{} not in 1..={MAX_BATCH_SIZE}", self.batch_size),
            ));
        }
        if self.aggregate_concurrency == 0 {
            return Err(ConfigError::invalid("aggregate_concurrency", "must be at least 1"));
        }
        if self.resolve_concurrency == 0 {
            return Err(ConfigError::invalid("resolve_concurrency", "must be at least 1"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("request_timeout_ms", "must be positive"));
        }
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::invalid("storage_key", "must not be empty"));
        }
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed TOML
    /// - `ConfigError::Invalid` for out-of-range values
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - otherwise as [`EngineConfig::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_ms: 10_000,
            batch_size: MAX_BATCH_SIZE,
            max_individual_retries: 10,
            aggregate_concurrency: 5,
            resolve_concurrency: 5,
            use_batch_endpoint: true,
            cache_ttl_secs: 7 * 24 * 60 * 60,
            store_path: None,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_individual_retries, 10);
        assert_eq!(config.aggregate_concurrency, 5);
        assert_eq!(config.cache_ttl(), Duration::from_secs(604_800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            base_url = "https://dash.example.com/api"
            aggregate_concurrency = 8
            store_path = "/tmp/roster"
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://dash.example.com/api");
        assert_eq!(config.aggregate_concurrency, 8);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/roster")));
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn oversized_batch_rejected() {
        let err = EngineConfig::new().with_batch_size(101).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "batch_size", .. }));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = EngineConfig::new()
            .with_aggregate_concurrency(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "aggregate_concurrency",
                ..
            }
        ));
    }

    #[test]
    fn non_http_base_url_rejected() {
        let err = EngineConfig::new().with_base_url("ftp://x").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "base_url", .. }));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("batch_size = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = EngineConfig::from_file("/nonexistent/roster.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
