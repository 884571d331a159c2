//! Notification sink.
//!
//! One-way outlet for value snapshots produced by the dispatch loop. The
//! loop never reads anything back from a sink.

use tickflow_core::Tick;
use tickflow_feed::DigitSnapshot;
use tickflow_session::{TradeLogEntry, TradingSession};
use tickflow_ws::ConnectionState;
use tracing::{debug, info};

/// Receives snapshots of the bot's state as it changes.
pub trait NotificationSink: Send {
    fn connection_state(&mut self, state: ConnectionState);

    /// A tick was aggregated; `snapshot` is its symbol's window after the push.
    fn tick(&mut self, tick: &Tick, snapshot: &DigitSnapshot);

    fn session(&mut self, session: &TradingSession);

    /// A trade log entry was created or settled.
    fn trade(&mut self, entry: &TradeLogEntry);
}

/// Sink that writes every snapshot to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn connection_state(&mut self, state: ConnectionState) {
        info!(%state, "Connection state");
    }

    fn tick(&mut self, tick: &Tick, snapshot: &DigitSnapshot) {
        debug!(
            symbol = %tick.symbol,
            price = %tick.price,
            digit = tick.digit,
            direction = ?tick.direction,
            window = snapshot.window_len,
            low_pct = snapshot.low_pct,
            even_pct = snapshot.even_pct,
            "Tick"
        );
    }

    fn session(&mut self, session: &TradingSession) {
        info!(
            status = %session.status,
            profit = %session.current_profit,
            stake = %session.stake,
            wins = session.wins,
            losses = session.losses,
            reason = ?session.stop_reason,
            "Session"
        );
    }

    fn trade(&mut self, entry: &TradeLogEntry) {
        info!(
            contract_id = %entry.id,
            symbol = %entry.symbol,
            contract_type = %entry.contract_type,
            prediction = entry.prediction,
            stake = %entry.stake,
            result = %entry.result,
            profit_loss = %entry.profit_loss,
            duration_ms = entry.duration.map(|d| d.num_milliseconds()),
            "Trade"
        );
    }
}
