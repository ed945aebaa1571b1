use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or malformed request field. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// Internal state could not be read; the caller retries the whole call.
    #[error("internal read failed: {0}")]
    TransientRead(String),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { kind, id }
    }
}
