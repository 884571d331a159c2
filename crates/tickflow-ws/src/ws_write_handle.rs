//! WebSocket write handle for sending messages.
//!
//! All outbound traffic goes through one bounded queue drained by the
//! connection loop. Sends are non-blocking and fail fast: callers learn
//! synchronously that the connection is not usable instead of having the
//! request buffered across a reconnect.

use crate::connection::ConnectionState;
use crate::error::{WsError, WsResult};
use crate::message::WsRequest;
use crate::subscription::{SubscriptionId, SubscriptionKind, SubscriptionRegistry};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tickflow_core::ContractRequest;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Outbound message to be sent via WebSocket.
#[derive(Debug)]
pub enum WsOutbound {
    /// Plain text message (subscribe, forget, etc.).
    Text(String),
    /// Contract placement, tracked so it can be reported if never sent.
    Buy {
        /// Request id for response correlation.
        req_id: u64,
        /// JSON payload to send.
        payload: String,
    },
}

/// Write handle for sending messages to WebSocket.
#[derive(Clone)]
pub struct WsWriteHandle {
    tx: mpsc::Sender<WsOutbound>,
    state: Arc<RwLock<ConnectionState>>,
    registry: Arc<SubscriptionRegistry>,
    req_ids: Arc<AtomicU64>,
}

impl WsWriteHandle {
    /// Create a new write handle.
    pub fn new(
        tx: mpsc::Sender<WsOutbound>,
        state: Arc<RwLock<ConnectionState>>,
        registry: Arc<SubscriptionRegistry>,
        req_ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tx,
            state,
            registry,
            req_ids,
        }
    }

    /// Register interest in a stream.
    ///
    /// While connected the subscribe request is queued immediately;
    /// otherwise the subscription is only recorded and goes out with the
    /// replay on the next connect. Subscribing to an already active kind
    /// returns the existing id and sends nothing.
    pub fn subscribe(&self, kind: SubscriptionKind) -> WsResult<SubscriptionId> {
        self.registry.subscribe_with(kind, |sub| {
            // Registry lock is held: the state cannot flip to Connected
            // (and replay) between this check and the enqueue.
            if !self.is_connected() {
                debug!(id = %sub.id, "Not connected, subscription deferred to replay");
                return Ok(());
            }
            let request = WsRequest::subscribe(&sub.kind, self.next_req_id());
            self.try_queue(WsOutbound::Text(request.to_text()?))
        })
    }

    /// Drop interest in a stream.
    ///
    /// Queues a `forget` for the venue stream if one is bound and the
    /// connection is up; otherwise only records the change.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> WsResult<()> {
        self.registry.unsubscribe_with(id, |remote_id| {
            if !self.is_connected() {
                return Ok(());
            }
            self.try_queue(WsOutbound::Text(WsRequest::forget(remote_id).to_text()?))
        })
    }

    /// Queue a contract placement.
    ///
    /// Returns the request id the venue will echo on the receipt or error.
    ///
    /// # Errors
    ///
    /// - `WsError::InvalidState`: connection is not `Connected`
    /// - `WsError::QueueFull`: outbound queue is full
    /// - `WsError::ChannelClosed`: connection manager is gone
    pub fn buy(&self, request: &ContractRequest) -> WsResult<u64> {
        self.ensure_connected()?;
        let req_id = self.next_req_id();
        let payload = WsRequest::buy(request, req_id).to_text()?;
        self.try_queue(WsOutbound::Buy { req_id, payload })?;
        debug!(req_id, symbol = %request.symbol, stake = %request.stake, "Buy queued");
        Ok(req_id)
    }

    /// Queue an arbitrary request.
    pub fn send(&self, request: &WsRequest) -> WsResult<()> {
        self.ensure_connected()?;
        self.try_queue(WsOutbound::Text(request.to_text()?))
    }

    /// Check if connected and the queue is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && !self.tx.is_closed()
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Subscription registry behind this handle.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn ensure_connected(&self) -> WsResult<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(WsError::InvalidState { state });
        }
        if self.tx.is_closed() {
            return Err(WsError::ChannelClosed);
        }
        Ok(())
    }

    fn try_queue(&self, msg: WsOutbound) -> WsResult<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => WsError::QueueFull,
            TrySendError::Closed(_) => WsError::ChannelClosed,
        })
    }

    fn next_req_id(&self) -> u64 {
        self.req_ids.fetch_add(1, Ordering::Relaxed)
    }
}
