//! Events posted by the connection task to the dispatch queue.

use crate::connection::ConnectionState;
use crate::message::InboundFrame;

/// Notification from the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// Connected and the active subscriptions were re-requested.
    Connected { replayed: usize },
    /// A decoded frame for the application.
    FrameReceived(InboundFrame),
    /// The venue closed the connection (or the stream ended).
    Closed(String),
    /// Transport fault (connect failure, read/write error, heartbeat expiry).
    TransportError(String),
    /// Waiting `delay_ms` before reconnect attempt `attempt`.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// A queued placement was discarded unsent because the connection dropped.
    RequestDropped { req_id: u64 },
    /// A finite reconnect limit was exhausted; no further attempts.
    GaveUp { attempts: u32 },
    /// Shutdown completed.
    Stopped,
}
