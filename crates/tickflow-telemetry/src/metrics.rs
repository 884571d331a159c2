//! Prometheus metrics for tickflow.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a fatal programming error that should crash
//! at startup. These panics only occur during static initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};

/// WebSocket connection state (1 = connected, 0 = otherwise).
pub static WS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tickflow_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// WebSocket state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting)
pub static WS_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tickflow_ws_state",
        "WebSocket state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickflow_ws_reconnect_total",
        "Total WebSocket reconnection attempts"
    )
    .unwrap()
});

/// Frames delivered to the dispatch loop, by kind.
pub static FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickflow_frames_total",
        "Inbound frames delivered to the dispatch loop",
        &["kind"]
    )
    .unwrap()
});

/// Venue error frames, by error code.
pub static API_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickflow_api_errors_total",
        "Error frames received from the venue",
        &["code"]
    )
    .unwrap()
});

/// Transport faults (read/write errors, heartbeat expiry, connect failures).
pub static TRANSPORT_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickflow_transport_errors_total",
        "WebSocket transport faults"
    )
    .unwrap()
});

/// Ticks rejected by the extractor.
pub static INVALID_TICKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tickflow_invalid_ticks_total", "Rejected tick payloads").unwrap()
});

/// Signals produced by the detector.
pub static SIGNALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickflow_signals_total",
        "Digit signals produced",
        &["contract_type"]
    )
    .unwrap()
});

/// Contract placements, by outcome of the send.
/// Labels: result (queued/rejected/dropped/failed)
pub static PLACEMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickflow_placements_total",
        "Contract placement attempts",
        &["result"]
    )
    .unwrap()
});

/// Settled trades, by result.
pub static TRADES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickflow_trades_total",
        "Settled trades",
        &["result"]
    )
    .unwrap()
});

/// Session running profit.
pub static SESSION_PROFIT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("tickflow_session_profit", "Session cumulative profit").unwrap()
});

/// Session next stake.
pub static SESSION_STAKE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("tickflow_session_stake", "Stake of the next contract").unwrap()
});

const WS_STATES: [&str; 4] = ["disconnected", "connecting", "connected", "reconnecting"];

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set WebSocket state machine state.
    /// Only the active state is 1, all others 0.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(i64::from(s == state));
        }
        WS_CONNECTED.set(i64::from(state == "connected"));
    }

    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    pub fn transport_error() {
        TRANSPORT_ERRORS_TOTAL.inc();
    }

    pub fn frame_received(kind: &str) {
        FRAMES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn api_error(code: &str) {
        API_ERRORS_TOTAL.with_label_values(&[code]).inc();
    }

    pub fn invalid_tick() {
        INVALID_TICKS_TOTAL.inc();
    }

    pub fn signal(contract_type: &str) {
        SIGNALS_TOTAL.with_label_values(&[contract_type]).inc();
    }

    pub fn placement(result: &str) {
        PLACEMENTS_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn trade_settled(result: &str) {
        TRADES_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn session_numbers(profit: f64, stake: f64) {
        SESSION_PROFIT.set(profit);
        SESSION_STAKE.set(stake);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
