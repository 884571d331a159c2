//! tickflow bot library.
//!
//! Wires the connection manager, the digit feed and the session controller
//! into one dispatch loop.

pub mod app;
pub mod config;
pub mod error;
pub mod notify;

pub use app::Application;
pub use config::{AggregatorConfig, AppConfig, MarketConfig};
pub use error::{AppError, AppResult};
pub use notify::{LogSink, NotificationSink};
