//! Error types for the Roster engine
//!
//! Provides error handling for:
//! - Transient backend failures (recovered locally, never surfaced)
//! - Identifier-listing failures (the one hard failure)
//! - Cancelled sessions
//! - Configuration problems

use roster_model::Metric;
use std::path::PathBuf;

/// Main engine error type
///
/// Per-identifier problems never show up here; they degrade to stale
/// records, synthetic records or zero counts instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The set of entities could not be established
    #[error("failed to list {metric} entities: {source}")]
    Listing {
        /// Metric whose entity list was requested
        metric: Metric,
        /// Underlying backend failure
        #[source]
        source: FetchError,
    },

    /// Session was cancelled; the result was discarded
    #[error("session cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backend client could not be built
    #[error("backend setup failed: {0}")]
    BackendSetup(String),
}

impl EngineError {
    /// Check if error is a cancellation rather than a failure
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Listing { source, .. } => source.is_retryable(),
            Self::Cancelled | Self::Config(_) | Self::BackendSetup(_) => false,
        }
    }
}

/// Single backend call failure (single or batch)
///
/// `Clone` so a coalesced result can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection, DNS or TLS failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Non-success HTTP status
    #[error("unexpected status {status} from {endpoint}")]
    Status {
        /// Endpoint path
        endpoint: String,
        /// HTTP status code
        status: u16,
    },

    /// Body did not match the expected shape
    #[error("malformed response from {endpoint}: {message}")]
    Decode {
        /// Endpoint path
        endpoint: String,
        /// Decoder message
        message: String,
    },

    /// The task running the call panicked or was cancelled
    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Create status error
    #[inline]
    pub fn status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
        }
    }

    /// Create decode error
    #[inline]
    pub fn decode(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create aborted-task error
    #[inline]
    pub fn aborted(err: &tokio::task::JoinError) -> Self {
        Self::Aborted(err.to_string())
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Aborted(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode { .. } => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value out of range or inconsistent
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Config file unreadable
    #[error("io error reading {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Create invalid-field error
    #[inline]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let err = EngineError::Listing {
            metric: Metric::Given,
            source: FetchError::status("/entities", 502),
        };
        let text = err.to_string();
        assert!(text.contains("given"));
        assert!(text.contains("502"));
    }

    #[test]
    fn engine_error_is_cancelled() {
        assert!(EngineError::Cancelled.is_cancelled());
        assert!(!EngineError::BackendSetup("x".to_string()).is_cancelled());
    }

    #[test]
    fn fetch_error_is_retryable() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Transport("reset".to_string()).is_retryable());
        assert!(FetchError::status("/resolve", 503).is_retryable());
        assert!(FetchError::status("/resolve", 429).is_retryable());
        assert!(!FetchError::status("/resolve", 400).is_retryable());
        assert!(!FetchError::decode("/resolve", "eof").is_retryable());
        assert!(FetchError::Aborted("panicked".to_string()).is_retryable());
    }

    #[test]
    fn listing_error_retryable_follows_source() {
        let err = EngineError::Listing {
            metric: Metric::Received,
            source: FetchError::Timeout,
        };
        assert!(err.is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
    }
}
