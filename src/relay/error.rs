use thiserror::Error;

/// Errors raised by the messaging client boundary.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("RPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC call {method} failed ({code}): {message}")]
    Remote {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Event stream closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(u32),
}

pub type Result<T> = std::result::Result<T, RelayError>;
