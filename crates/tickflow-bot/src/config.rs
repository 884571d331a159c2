//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tickflow_feed::{SignalConfig, StaticCatalogue};
use tickflow_session::SessionConfig;
use tickflow_ws::ConnectionConfig;

/// One traded instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Venue symbol (e.g., "R_100").
    pub symbol: String,
    /// Display precision, used when tick frames omit `pip_size`.
    #[serde(default)]
    pub pip_size: Option<u32>,
}

/// Digit window settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Ticks kept per symbol. Default: 100.
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_window() -> usize {
    100
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Venue WebSocket URL.
    pub ws_url: String,
    /// Watch the feed without placing contracts.
    #[serde(default)]
    pub observe_only: bool,
    #[serde(default)]
    pub websocket: ConnectionConfig,
    pub markets: Vec<MarketConfig>,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject settings the bot cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "ws_url must be a ws:// or wss:// URL, got {:?}",
                self.ws_url
            )));
        }
        if self.markets.is_empty() {
            return Err(AppError::Config("at least one market is required".into()));
        }
        let mut seen = HashSet::new();
        for market in &self.markets {
            if market.symbol.is_empty() {
                return Err(AppError::Config("market symbol is empty".into()));
            }
            if !seen.insert(market.symbol.as_str()) {
                return Err(AppError::Config(format!(
                    "market {} configured twice",
                    market.symbol
                )));
            }
        }
        if self.aggregator.window == 0 {
            return Err(AppError::Config("aggregator window must be > 0".into()));
        }
        if self.websocket.outbound_queue_capacity == 0 {
            return Err(AppError::Config(
                "websocket outbound_queue_capacity must be > 0".into(),
            ));
        }

        self.signal.validate()?;
        if self.signal.min_ticks > self.aggregator.window {
            return Err(AppError::Config(format!(
                "signal min_ticks {} exceeds aggregator window {}",
                self.signal.min_ticks, self.aggregator.window
            )));
        }
        self.session.validate()?;
        Ok(())
    }

    /// Connection settings with the configured URL.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            ..self.websocket.clone()
        }
    }

    /// Symbol precisions known from configuration.
    pub fn catalogue(&self) -> StaticCatalogue {
        self.markets
            .iter()
            .filter_map(|m| m.pip_size.map(|p| (m.symbol.clone(), p)))
            .collect()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.markets.iter().map(|m| m.symbol.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tickflow_feed::{SignalMode, SymbolCatalogue};
    use tickflow_session::ProgressionConfig;

    const SAMPLE: &str = r#"
ws_url = "wss://venue.example/websockets/v3?app_id=1"

[websocket]
heartbeat_interval_ms = 15000
max_reconnect_attempts = 5

[[markets]]
symbol = "R_100"
pip_size = 2

[[markets]]
symbol = "R_50"

[signal]
mode = "even_odd"
threshold_pct = 65.0
min_ticks = 30

[session]
initial_stake = 1
target_profit = 10
stop_loss = 20

[session.progression]
kind = "martingale"
factor = 2
max_stake = 16
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert!(!config.observe_only);
        assert_eq!(config.markets.len(), 2);
        assert_eq!(config.aggregator.window, 100);
        assert_eq!(config.signal.mode, SignalMode::EvenOdd);
        assert_eq!(config.websocket.heartbeat_interval_ms, 15000);
        assert_eq!(config.websocket.heartbeat_timeout_ms, 10000);
        assert_eq!(config.session.initial_stake, dec!(1));
        assert_eq!(config.session.currency, "USD");
        assert_eq!(config.session.settlement_timeout_secs, 300);
        assert_eq!(
            config.session.progression,
            ProgressionConfig::Martingale {
                factor: dec!(2),
                max_stake: dec!(16)
            }
        );
    }

    #[test]
    fn test_connection_config_takes_url() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        let conn = config.connection_config();
        assert_eq!(conn.url, config.ws_url);
        assert_eq!(conn.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_catalogue_only_known_precisions() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        let catalogue = config.catalogue();
        assert_eq!(catalogue.precision("R_100"), Some(2));
        assert_eq!(catalogue.precision("R_50"), None);
        assert_eq!(config.symbols().collect::<Vec<_>>(), vec!["R_100", "R_50"]);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let base = AppConfig::parse(SAMPLE).unwrap();

        let mut bad_url = base.clone();
        bad_url.ws_url = "https://venue.example".into();
        assert!(matches!(bad_url.validate(), Err(AppError::Config(_))));

        let mut no_markets = base.clone();
        no_markets.markets.clear();
        assert!(no_markets.validate().is_err());

        let mut duplicate = base.clone();
        duplicate.markets.push(MarketConfig {
            symbol: "R_100".into(),
            pip_size: None,
        });
        assert!(duplicate.validate().is_err());

        let mut zero_window = base.clone();
        zero_window.aggregator.window = 0;
        assert!(zero_window.validate().is_err());

        let mut short_window = base.clone();
        short_window.aggregator.window = 10;
        assert!(short_window.validate().is_err());

        let mut bad_stake = base.clone();
        bad_stake.session.initial_stake = dec!(0);
        assert!(matches!(bad_stake.validate(), Err(AppError::Session(_))));

        let mut bad_threshold = base;
        bad_threshold.signal.threshold_pct = 40.0;
        assert!(matches!(bad_threshold.validate(), Err(AppError::Feed(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::from_file("/nonexistent/tickflow.toml");
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
