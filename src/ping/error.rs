use crate::cancel::CancelReason;
use crate::relay::RelayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PingError {
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account error: {0}")]
    Account(String),

    #[error("Statistics error: {0}")]
    Statistics(String),

    #[error("Emitter error: {0}")]
    Emitter(String),

    #[error("Cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("Event stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, PingError>;
