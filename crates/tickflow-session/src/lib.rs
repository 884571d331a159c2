//! Trading session management for tickflow.
//!
//! The [`SessionController`] turns signals into contract requests, applies
//! settlements, enforces take-profit and stop-loss synchronously and keeps
//! the [`TradeLog`].

pub mod controller;
pub mod error;
pub mod progression;
pub mod trade_log;

pub use controller::{
    SessionConfig, SessionController, SessionStatus, SettlementDisposition, StopReason,
    TradingSession,
};
pub use error::{SessionError, SessionResult};
pub use progression::{FlatStake, Martingale, ProgressionConfig, StakeProgression};
pub use trade_log::{TradeLog, TradeLogEntry, TradeStats, TradeStatus};
