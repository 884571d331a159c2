//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid tick for {symbol}: {reason}")]
    InvalidTick { symbol: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] tickflow_core::CoreError),
}

pub type FeedResult<T> = Result<T, FeedError>;
