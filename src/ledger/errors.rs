use thiserror::Error;

use crate::kv::KvError;

#[derive(Debug, Error, Clone)]
pub enum LedgerError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("failed to (de)serialize operation for instance '{instance_id}': {message}")]
    Codec { instance_id: String, message: String },
    #[error("timed out acquiring operation lock for instance '{instance_id}' kind '{kind}'")]
    LockContention { instance_id: String, kind: &'static str },
}
