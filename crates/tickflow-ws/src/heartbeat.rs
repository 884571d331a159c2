//! Heartbeat monitoring for the WebSocket connection.
//!
//! The monitor is owned by the connection loop and driven from its `select!`
//! with explicit timestamps, so it needs no locks and is testable without
//! sleeping.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What the connection loop should do after a heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send `{ping: 1}` now.
    SendPing,
    /// Nothing to do yet.
    Wait,
    /// Too many consecutive pings went unanswered; reconnect.
    Expired { missed: u32 },
}

/// Ping/pong bookkeeping for one connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    max_missed: u32,
    /// Last time anything was sent or a pong arrived.
    last_activity: Instant,
    /// Time of the outstanding ping, if any.
    pending_ping: Option<Instant>,
    missed: u32,
    last_rtt: Option<Duration>,
}

impl HeartbeatMonitor {
    /// Create a monitor for a connection established at `now`.
    pub fn new(interval_ms: u64, timeout_ms: u64, max_missed: u32, now: Instant) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            max_missed: max_missed.max(1),
            last_activity: now,
            pending_ping: None,
            missed: 0,
            last_rtt: None,
        }
    }

    /// How often the connection loop should call [`Self::on_tick`].
    pub fn check_period(&self) -> Duration {
        (self.timeout.min(self.interval) / 2).max(Duration::from_millis(10))
    }

    /// Evaluate the heartbeat at `now`.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(sent) = self.pending_ping {
            if now.saturating_duration_since(sent) < self.timeout {
                return HeartbeatAction::Wait;
            }
            self.pending_ping = None;
            self.missed += 1;
            warn!(missed = self.missed, max = self.max_missed, "Heartbeat reply missed");
            if self.missed >= self.max_missed {
                return HeartbeatAction::Expired {
                    missed: self.missed,
                };
            }
            // Retry right away instead of waiting for another interval
            return HeartbeatAction::SendPing;
        }

        if now.saturating_duration_since(self.last_activity) >= self.interval {
            HeartbeatAction::SendPing
        } else {
            HeartbeatAction::Wait
        }
    }

    /// Record that a ping was written at `now`.
    pub fn record_ping(&mut self, now: Instant) {
        self.pending_ping = Some(now);
        self.last_activity = now;
    }

    /// Record a pong received at `now`.
    pub fn record_pong(&mut self, now: Instant) {
        if let Some(sent) = self.pending_ping.take() {
            let rtt = now.saturating_duration_since(sent);
            self.last_rtt = Some(rtt);
            debug!(rtt_ms = rtt.as_millis() as u64, "Received pong");
        }
        self.missed = 0;
        self.last_activity = now;
    }

    /// Consecutive unanswered pings.
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Round-trip time of the last answered ping.
    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// Whether a ping is awaiting its reply.
    pub fn awaiting_pong(&self) -> bool {
        self.pending_ping.is_some()
    }
}
