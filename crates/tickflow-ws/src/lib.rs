//! WebSocket client for the tickflow market-data venue.
//!
//! Provides one long-lived connection with:
//! - Automatic reconnection with exponential backoff and jitter
//! - Subscription registry with replay after every reconnect
//! - Heartbeat monitoring (30s ping, missed pong detection)
//! - Typed frame decoding with a tolerant `Malformed` path
//! - Event queue for the single dispatch loop

pub mod connection;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod message;
pub mod subscription;
pub mod ws_write_handle;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use event::ConnectionEvent;
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use message::{
    decode_frame, ApiError, BalancePayload, BuyParameters, BuyPayload, ContractPayload,
    ContractStatus, InboundFrame, TickPayload, WsRequest,
};
pub use subscription::{
    RemoteBinding, Subscription, SubscriptionId, SubscriptionKind, SubscriptionRegistry,
};
pub use ws_write_handle::{WsOutbound, WsWriteHandle};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
