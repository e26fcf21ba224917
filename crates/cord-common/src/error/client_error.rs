//! Client error types
//!
//! Unified error taxonomy shared by the REST client, sessions, and the shard coordinator.

use std::time::Duration;

/// Client-wide error type
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection could not be opened or dropped unexpectedly; retried with backoff
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Remote rate limit hit and retries exhausted
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        global: bool,
    },

    /// Malformed or unexpected frame; forces a reconnect
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Session rejected by the remote; must re-identify
    #[error("Invalid session")]
    InvalidSession,

    /// Token rejected; never retried
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Bad shard count, intents or API version; no connection attempted
    #[error("Fatal configuration error: {0}")]
    FatalConfiguration(String),

    /// Unexpected HTTP status from the REST API
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl ClientError {
    /// Whether the operation that produced this error may be retried
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientNetwork(_)
            | Self::RateLimited { .. }
            | Self::ProtocolViolation(_)
            | Self::InvalidSession => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Authentication(_)
            | Self::FatalConfiguration(_)
            | Self::Decode(_)
            | Self::Config(_)
            | Self::Internal(_) => false,
        }
    }

    /// Whether this error must stop every shard, not just the one that hit it
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::FatalConfiguration(_) | Self::Config(_)
        )
    }

    /// Stable error code for logs and status reports
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "TRANSIENT_NETWORK",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Self::InvalidSession => "INVALID_SESSION",
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::FatalConfiguration(_) => "FATAL_CONFIGURATION",
            Self::Http { .. } => "HTTP_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Create a transient network error
    #[must_use]
    pub fn network(msg: impl std::fmt::Display) -> Self {
        Self::TransientNetwork(msg.to_string())
    }

    /// Create a protocol violation error
    #[must_use]
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::ProtocolViolation(msg.to_string())
    }

    /// Create a fatal configuration error
    #[must_use]
    pub fn configuration(msg: impl std::fmt::Display) -> Self {
        Self::FatalConfiguration(msg.to_string())
    }

    /// Create an internal error from any error
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
