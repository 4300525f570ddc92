use thiserror::Error;

/// A handler's own classification of a failure, independent of the
/// component error taxonomies it wraps: recoverable
/// failures go back through the queue's backoff retry, permanent ones
/// skip straight to `failed` so retrying doesn't just repeat the same
/// programmer/data error.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Recoverable(String),
    #[error("{0}")]
    Permanent(String),
}

impl From<crate::lifecycle::LifecycleError> for HandlerError {
    fn from(e: crate::lifecycle::LifecycleError) -> Self {
        if e.is_retryable() {
            Self::Recoverable(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

impl From<crate::queue::QueueError> for HandlerError {
    fn from(e: crate::queue::QueueError) -> Self {
        Self::Recoverable(e.to_string())
    }
}

impl From<crate::cache::CacheError> for HandlerError {
    fn from(e: crate::cache::CacheError) -> Self {
        Self::Recoverable(e.to_string())
    }
}

impl From<crate::ledger::LedgerError> for HandlerError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        Self::Recoverable(e.to_string())
    }
}

impl From<crate::provider::ProviderError> for HandlerError {
    fn from(e: crate::provider::ProviderError) -> Self {
        if e.is_retryable() {
            Self::Recoverable(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}
