//! Subscription registry for streams multiplexed over the single connection.
//!
//! Tracks which logical streams the application wants, in the order it asked
//! for them, and which venue stream id currently serves each one. Venue ids
//! only live as long as a connection; the registry forgets them on every
//! disconnect and the connection manager replays the active set afterwards.

use crate::error::{WsError, WsResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Logical stream a subscription asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Tick stream of one symbol.
    Ticks(String),
    /// Account balance updates.
    Balance,
    /// Open-contract updates, including settlements.
    Portfolio,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticks(symbol) => write!(f, "ticks:{symbol}"),
            Self::Balance => write!(f, "balance"),
            Self::Portfolio => write!(f, "portfolio"),
        }
    }
}

/// Local, opaque subscription identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One registered interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    pub active: bool,
    /// Venue stream id on the current connection, once known.
    pub remote_id: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Result of binding a venue stream id to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBinding {
    /// First frame of the stream on this connection.
    Bound,
    /// Stream id was already known.
    AlreadyBound,
    /// The subscription is no longer active; the stream should be forgotten.
    Stale(String),
    /// No subscription was ever registered for this kind.
    Unknown,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_kind: HashMap<SubscriptionKind, SubscriptionId>,
    /// Active ids in registration order.
    order: Vec<SubscriptionId>,
    next_id: u64,
}

impl RegistryInner {
    /// Register or reactivate `kind`. Returns the id and whether the
    /// subscription became active by this call.
    fn register(&mut self, kind: SubscriptionKind) -> (SubscriptionId, bool) {
        if let Some(id) = self.by_kind.get(&kind).cloned() {
            let Some(sub) = self.by_id.get_mut(&id) else {
                return (id, false);
            };
            if sub.active {
                return (id, false);
            }
            sub.active = true;
            sub.remote_id = None;
            sub.registered_at = Utc::now();
            self.order.push(id.clone());
            return (id, true);
        }

        self.next_id += 1;
        let id = SubscriptionId(format!("sub-{}", self.next_id));
        self.by_id.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                kind: kind.clone(),
                active: true,
                remote_id: None,
                registered_at: Utc::now(),
            },
        );
        self.by_kind.insert(kind, id.clone());
        self.order.push(id.clone());
        (id, true)
    }

    fn deactivate(&mut self, id: &SubscriptionId) -> Option<Option<String>> {
        let sub = self.by_id.get_mut(id)?;
        if !sub.active {
            return Some(None);
        }
        sub.active = false;
        let remote = sub.remote_id.take();
        self.order.retain(|o| o != id);
        Some(remote)
    }

    fn active_in_order(&self) -> Vec<Subscription> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }
}

/// Registry of logical subscriptions.
///
/// Shared between the connection task (replay, stream binding) and write
/// handles (subscribe/unsubscribe). All methods take `&self`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `kind`.
    ///
    /// Idempotent: an active subscription of the same kind returns its
    /// existing id.
    pub fn subscribe(&self, kind: SubscriptionKind) -> SubscriptionId {
        let (id, _) = self.inner.write().register(kind);
        id
    }

    /// Register interest and, if the subscription became active by this call,
    /// run `dispatch` while the registry is still locked.
    ///
    /// If `dispatch` fails the registration is rolled back and the error is
    /// returned.
    pub fn subscribe_with<F>(&self, kind: SubscriptionKind, dispatch: F) -> WsResult<SubscriptionId>
    where
        F: FnOnce(&Subscription) -> WsResult<()>,
    {
        let mut inner = self.inner.write();
        let (id, activated) = inner.register(kind);
        if !activated {
            debug!(%id, "Subscription already active");
            return Ok(id);
        }

        let Some(sub) = inner.by_id.get(&id).cloned() else {
            return Ok(id);
        };
        if let Err(e) = dispatch(&sub) {
            inner.deactivate(&id);
            return Err(e);
        }
        info!(%id, kind = %sub.kind, "Subscription registered");
        Ok(id)
    }

    /// Mark a subscription inactive.
    ///
    /// Returns the venue stream id that should be forgotten, if one was bound.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> WsResult<Option<String>> {
        self.inner
            .write()
            .deactivate(id)
            .ok_or_else(|| WsError::UnknownSubscription(id.to_string()))
    }

    /// Mark a subscription inactive and run `dispatch` with its bound venue
    /// stream id while the registry is still locked.
    ///
    /// The subscription stays inactive even if `dispatch` fails; a later
    /// frame from that stream reports [`RemoteBinding::Stale`].
    pub fn unsubscribe_with<F>(&self, id: &SubscriptionId, dispatch: F) -> WsResult<()>
    where
        F: FnOnce(&str) -> WsResult<()>,
    {
        let mut inner = self.inner.write();
        let remote = inner
            .deactivate(id)
            .ok_or_else(|| WsError::UnknownSubscription(id.to_string()))?;
        info!(%id, "Subscription removed");
        match remote {
            Some(remote_id) => dispatch(&remote_id),
            None => Ok(()),
        }
    }

    /// Look up a subscription by id.
    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Look up the id registered for a kind (active or not).
    pub fn id_for(&self, kind: &SubscriptionKind) -> Option<SubscriptionId> {
        self.inner.read().by_kind.get(kind).cloned()
    }

    /// Active subscriptions in registration order.
    pub fn active_in_order(&self) -> Vec<Subscription> {
        self.inner.read().active_in_order()
    }

    /// Number of active subscriptions.
    pub fn active_count(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Snapshot the active set for replay.
    ///
    /// `on_locked` runs while the registry is write-locked, so no
    /// subscription can be added between the snapshot and whatever
    /// `on_locked` does (the connection manager flips its state to
    /// `Connected` there).
    pub fn begin_replay<F: FnOnce()>(&self, on_locked: F) -> Vec<Subscription> {
        let inner = self.inner.write();
        on_locked();
        inner.active_in_order()
    }

    /// Record the venue stream id serving `kind`.
    pub fn bind_remote(&self, kind: &SubscriptionKind, remote_id: &str) -> RemoteBinding {
        let mut inner = self.inner.write();
        let Some(id) = inner.by_kind.get(kind).cloned() else {
            return RemoteBinding::Unknown;
        };
        let Some(sub) = inner.by_id.get_mut(&id) else {
            return RemoteBinding::Unknown;
        };

        if !sub.active {
            return RemoteBinding::Stale(remote_id.to_string());
        }
        match &sub.remote_id {
            Some(existing) if existing == remote_id => RemoteBinding::AlreadyBound,
            _ => {
                debug!(%id, remote_id, "Bound venue stream");
                sub.remote_id = Some(remote_id.to_string());
                RemoteBinding::Bound
            }
        }
    }

    /// Forget all venue stream ids (called on disconnect).
    pub fn clear_remote_ids(&self) {
        let mut inner = self.inner.write();
        for sub in inner.by_id.values_mut() {
            sub.remote_id = None;
        }
    }

    /// Mark every subscription inactive (called on stop/logout).
    ///
    /// Returns how many were active.
    pub fn deactivate_all(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.order.len();
        for sub in inner.by_id.values_mut() {
            sub.active = false;
            sub.remote_id = None;
        }
        inner.order.clear();
        if count > 0 {
            info!(count, "All subscriptions deactivated");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(symbol: &str) -> SubscriptionKind {
        SubscriptionKind::Ticks(symbol.to_string())
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe(ticks("R_100"));
        let b = registry.subscribe(ticks("R_100"));

        assert_eq!(a, b);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_subscribe_with_dispatches_once() {
        let registry = SubscriptionRegistry::new();
        let mut dispatched = 0;

        registry
            .subscribe_with(ticks("R_100"), |_| {
                dispatched += 1;
                Ok(())
            })
            .unwrap();
        registry
            .subscribe_with(ticks("R_100"), |_| {
                dispatched += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(dispatched, 1);
    }

    #[test]
    fn test_subscribe_with_rolls_back_on_dispatch_failure() {
        let registry = SubscriptionRegistry::new();
        let result = registry.subscribe_with(SubscriptionKind::Balance, |_| Err(WsError::QueueFull));

        assert!(matches!(result, Err(WsError::QueueFull)));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_active_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(ticks("R_100"));
        registry.subscribe(SubscriptionKind::Balance);
        registry.subscribe(ticks("R_50"));
        registry.subscribe(SubscriptionKind::Portfolio);

        let kinds: Vec<_> = registry
            .active_in_order()
            .into_iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ticks("R_100"),
                SubscriptionKind::Balance,
                ticks("R_50"),
                SubscriptionKind::Portfolio,
            ]
        );
    }

    #[test]
    fn test_unsubscribe_marks_inactive_and_returns_remote() {
        let registry = SubscriptionRegistry::new();
        let id = registry.subscribe(ticks("R_100"));
        assert_eq!(
            registry.bind_remote(&ticks("R_100"), "stream-1"),
            RemoteBinding::Bound
        );

        let remote = registry.unsubscribe(&id).unwrap();
        assert_eq!(remote.as_deref(), Some("stream-1"));

        let sub = registry.get(&id).unwrap();
        assert!(!sub.active);
        assert!(registry.active_in_order().is_empty());
    }

    #[test]
    fn test_unsubscribe_without_remote_is_recorded_only() {
        let registry = SubscriptionRegistry::new();
        let id = registry.subscribe(SubscriptionKind::Balance);
        let mut forgot = false;

        registry
            .unsubscribe_with(&id, |_| {
                forgot = true;
                Ok(())
            })
            .unwrap();

        assert!(!forgot);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_id() {
        let registry = SubscriptionRegistry::new();
        let other = SubscriptionRegistry::new().subscribe(SubscriptionKind::Balance);
        assert!(matches!(
            registry.unsubscribe(&other),
            Err(WsError::UnknownSubscription(_))
        ));
    }

    #[test]
    fn test_resubscribe_reuses_id_and_moves_to_end() {
        let registry = SubscriptionRegistry::new();
        let first = registry.subscribe(ticks("R_100"));
        registry.subscribe(ticks("R_50"));
        registry.unsubscribe(&first).unwrap();

        let again = registry.subscribe(ticks("R_100"));
        assert_eq!(first, again);

        let order: Vec<_> = registry
            .active_in_order()
            .into_iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(order, vec![ticks("R_50"), ticks("R_100")]);
    }

    #[test]
    fn test_bind_remote_states() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(
            registry.bind_remote(&SubscriptionKind::Balance, "b1"),
            RemoteBinding::Unknown
        );

        let id = registry.subscribe(SubscriptionKind::Balance);
        assert_eq!(
            registry.bind_remote(&SubscriptionKind::Balance, "b1"),
            RemoteBinding::Bound
        );
        assert_eq!(
            registry.bind_remote(&SubscriptionKind::Balance, "b1"),
            RemoteBinding::AlreadyBound
        );

        registry.unsubscribe(&id).unwrap();
        assert_eq!(
            registry.bind_remote(&SubscriptionKind::Balance, "b1"),
            RemoteBinding::Stale("b1".to_string())
        );
    }

    #[test]
    fn test_replay_set_matches_pre_disconnect_set() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(ticks("R_100"));
        let dropped = registry.subscribe(ticks("R_25"));
        registry.subscribe(SubscriptionKind::Portfolio);
        registry.unsubscribe(&dropped).unwrap();
        registry.bind_remote(&ticks("R_100"), "t1");

        let before = registry.active_in_order();

        // Disconnect
        registry.clear_remote_ids();

        let mut locked_ran = false;
        let replay = registry.begin_replay(|| locked_ran = true);

        assert!(locked_ran);
        let ids_before: Vec<_> = before.iter().map(|s| s.id.clone()).collect();
        let ids_replay: Vec<_> = replay.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids_before, ids_replay);
        assert!(replay.iter().all(|s| s.remote_id.is_none()));
    }

    #[test]
    fn test_deactivate_all() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(ticks("R_100"));
        registry.subscribe(SubscriptionKind::Balance);

        assert_eq!(registry.deactivate_all(), 2);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.begin_replay(|| {}).is_empty());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ticks("R_100").to_string(), "ticks:R_100");
        assert_eq!(SubscriptionKind::Portfolio.to_string(), "portfolio");
    }
}
