//! WebSocket error types.

use crate::connection::ConnectionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Caller tried to send while the connection was not `Connected`.
    #[error("Invalid state for send: {state}")]
    InvalidState { state: ConnectionState },

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Outbound channel closed")]
    ChannelClosed,

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("Heartbeat timeout after {missed} missed replies")]
    HeartbeatTimeout { missed: u32 },

    #[error("Connect timeout after {0}ms")]
    ConnectTimeout(u64),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;
