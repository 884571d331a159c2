//! Session error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    #[error("A session is already active")]
    AlreadyActive,

    #[error("Unknown trade: {0}")]
    UnknownTrade(String),

    #[error("Duplicate trade: {0}")]
    DuplicateTrade(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
