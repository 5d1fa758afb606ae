//! Error types for the orchestrator core.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing and executing requests against
/// backend language-model servers.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend unreachable or the transport protocol misbehaved.
    #[error("transport failure on backend {backend}: {message}")]
    TransportFailure { backend: String, message: String },

    /// Deadline exceeded waiting on a backend.
    #[error("timed out after {duration_ms}ms waiting on backend {backend}")]
    Timeout { backend: String, duration_ms: u64 },

    /// Input exceeds every available backend's context window.
    #[error("input of {input_chars} chars exceeds the largest available backend ({largest_backend}, {backend_limit_chars} chars): split or reject")]
    CapacityOverflow {
        input_chars: usize,
        largest_backend: String,
        backend_limit_chars: usize,
    },

    /// The chosen backend's circuit breaker is open and no fallback remains.
    #[error("circuit breaker open for backend {backend}, fallback chain exhausted")]
    BreakerOpen { backend: String },

    /// A forced backend was unknown or explicitly forbidden.
    #[error("policy rejection: backend {backend} is unknown or forbidden")]
    PolicyRejection { backend: String },

    /// A background analysis pass failed; never surfaced to the foreground caller.
    #[error("background analysis failed: {0}")]
    AnalysisFailure(String),

    /// Playbook or queue persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (invalid builder state).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transport failure error.
    pub fn transport(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportFailure {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(backend: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            backend: backend.into(),
            duration_ms,
        }
    }

    /// Create a capacity overflow error.
    pub fn capacity_overflow(
        input_chars: usize,
        largest_backend: impl Into<String>,
        backend_limit_chars: usize,
    ) -> Self {
        Self::CapacityOverflow {
            input_chars,
            largest_backend: largest_backend.into(),
            backend_limit_chars,
        }
    }

    /// Create a breaker-open error.
    pub fn breaker_open(backend: impl Into<String>) -> Self {
        Self::BreakerOpen {
            backend: backend.into(),
        }
    }

    /// Create a policy rejection error.
    pub fn policy_rejection(backend: impl Into<String>) -> Self {
        Self::PolicyRejection {
            backend: backend.into(),
        }
    }

    /// Create an analysis failure error (background queue only).
    pub fn analysis_failure(message: impl Into<String>) -> Self {
        Self::AnalysisFailure(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal invariant-violation error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True if this error is one the Execution Loop recovers locally via
    /// retry or fallback rather than surfacing to the caller.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. } | Self::Timeout { .. } | Self::BreakerOpen { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
