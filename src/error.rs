//! Crate-wide error taxonomy and its mapping onto the Intent API's stable
//! error codes.

use thiserror::Error;

use crate::cache::CacheError;
use crate::kv::KvError;
use crate::ledger::LedgerError;
use crate::provider::ProviderError;
use crate::queue::QueueError;

/// Configuration errors, surfaced as fail-fast panics at boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable '{key}': {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Top-level application error. Every component error taxonomy converts
/// into this via `From`; handlers never match on error *messages*.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("instance '{id}' is not startable from status {current_status}: {reason}")]
    InstanceNotStartable {
        id: String,
        current_status: String,
        reason: String,
    },

    #[error("instance '{id}' is not deletable: {reason}")]
    InstanceNotDeletable { id: String, reason: String },

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("kv store error: {0}")]
    Kv(#[from] KvError),

    #[error("operation ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("feature disabled: {0}")]
    FeatureDisabled(String),

    #[error("request timed out")]
    RequestTimeout,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable machine-readable error code, independent of the human message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    InstanceNotFound,
    InstanceNotDeletable,
    InstanceNotStartable,
    ProviderError,
    RateLimitExceeded,
    CircuitBreakerOpen,
    RequestTimeout,
    InternalServerError,
    FeatureDisabled,
    CacheError,
    LedgerError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InstanceNotFound => "INSTANCE_NOT_FOUND",
            Self::InstanceNotDeletable => "INSTANCE_NOT_DELETABLE",
            Self::InstanceNotStartable => "INSTANCE_NOT_STARTABLE",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::FeatureDisabled => "FEATURE_DISABLED",
            Self::CacheError => "CACHE_ERROR",
            Self::LedgerError => "LEDGER_ERROR",
        }
    }

    /// HTTP status this code maps to at the (out-of-scope) HTTP boundary.
    pub fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::InstanceNotFound => 404,
            Self::InstanceNotDeletable | Self::InstanceNotStartable => 409,
            Self::RateLimitExceeded => 429,
            Self::CircuitBreakerOpen => 503,
            Self::RequestTimeout => 504,
            Self::FeatureDisabled => 403,
            Self::ProviderError | Self::CacheError | Self::LedgerError | Self::InternalServerError => 500,
        }
    }
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::InstanceNotFound(_) => ErrorCode::InstanceNotFound,
            Self::InstanceNotStartable { .. } => ErrorCode::InstanceNotStartable,
            Self::InstanceNotDeletable { .. } => ErrorCode::InstanceNotDeletable,
            Self::Provider(ProviderError::RateLimited) => ErrorCode::RateLimitExceeded,
            Self::Provider(ProviderError::Unavailable) => ErrorCode::CircuitBreakerOpen,
            Self::Provider(ProviderError::Timeout) => ErrorCode::RequestTimeout,
            Self::Provider(_) => ErrorCode::ProviderError,
            Self::Cache(_) | Self::Kv(_) => ErrorCode::CacheError,
            Self::Queue(_) => ErrorCode::InternalServerError,
            Self::Ledger(_) => ErrorCode::LedgerError,
            Self::FeatureDisabled(_) => ErrorCode::FeatureDisabled,
            Self::RequestTimeout => ErrorCode::RequestTimeout,
            Self::Internal(_) => ErrorCode::InternalServerError,
        }
    }
}
