use thiserror::Error;

/// Failure modes surfaced by the Provider Client.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,
    #[error("circuit breaker open")]
    Unavailable,
    #[error("request timed out")]
    Timeout,
    #[error("resource not found")]
    NotFound,
    #[error("conflicting state")]
    Conflict,
    #[error("unauthorized")]
    Unauthorized,
    #[error("provider error {status}: {code} - {message}")]
    ProviderError {
        status: u16,
        code: String,
        message: String,
    },
}

impl ProviderError {
    /// Whether the Provider Client's own retry loop should retry this
    /// failure (network errors, `5xx`, `429`) or surface it immediately
    /// (all other `4xx`).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited => true,
            Self::ProviderError { status, .. } => *status >= 500,
            Self::Unavailable | Self::NotFound | Self::Conflict | Self::Unauthorized => false,
        }
    }
}
