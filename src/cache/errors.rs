use thiserror::Error;

use crate::kv::KvError;

#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("failed to (de)serialize cache value for key '{key}': {message}")]
    Codec { key: String, message: String },
}
