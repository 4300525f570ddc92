use thiserror::Error;

use crate::cache::CacheError;
use crate::ledger::LedgerError;
use crate::provider::ProviderError;
use crate::queue::QueueError;

/// Errors surfaced by the Lifecycle Controller's state machine. Distinct
/// from [`crate::error::AppError`] because these errors need to reach the
/// Worker Pool's recoverable/unrecoverable classification, not the HTTP
/// error-code table.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("no product found matching name '{0}'")]
    NoMatchingProduct(String),
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: i64 },
    #[error("instance reported terminal provider status '{0}'")]
    Terminal(String),
}

impl LifecycleError {
    /// Whether the Worker Pool should retry the job that raised this error
    /// (transient Provider/cache/queue trouble) or fail it outright
    /// (a terminal state was correctly observed, not a fluke).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::Cache(_) | Self::Queue(_) | Self::Ledger(_) => true,
            Self::NoMatchingProduct(_) | Self::Timeout { .. } | Self::Terminal(_) => false,
        }
    }
}
