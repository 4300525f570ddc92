use thiserror::Error;

use crate::kv::KvError;

#[derive(Debug, Error, Clone)]
pub enum QueueError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("failed to (de)serialize job '{id}': {message}")]
    Codec { id: String, message: String },
    #[error("job '{0}' not found")]
    NotFound(String),
}
