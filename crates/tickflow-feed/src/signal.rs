//! Digit signal detection.
//!
//! Mechanical rules over a [`DigitSnapshot`]: when one half of the digit
//! space dominates the window, signal a contract on the other half.

use crate::aggregator::DigitSnapshot;
use crate::error::{FeedError, FeedResult};
use serde::{Deserialize, Serialize};
use tickflow_core::{ContractType, Signal};
use tracing::debug;

/// Which split of the digit space the detector watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Low (0-4) vs high (5-9).
    #[default]
    OverUnder,
    /// Even vs odd.
    EvenOdd,
}

/// Detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub mode: SignalMode,
    /// Share (percent) one half must reach to trigger.
    pub threshold_pct: f64,
    /// Ticks required in the window before any signal.
    pub min_ticks: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            mode: SignalMode::OverUnder,
            threshold_pct: 60.0,
            min_ticks: 20,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> FeedResult<()> {
        if !(self.threshold_pct > 50.0 && self.threshold_pct <= 100.0) {
            return Err(FeedError::InvalidConfig(format!(
                "threshold_pct must be in (50, 100], got {}",
                self.threshold_pct
            )));
        }
        if self.min_ticks == 0 {
            return Err(FeedError::InvalidConfig("min_ticks must be > 0".into()));
        }
        Ok(())
    }
}

/// Derives signals from digit snapshots.
#[derive(Debug, Clone)]
pub struct DigitSignalDetector {
    config: SignalConfig,
}

impl DigitSignalDetector {
    pub fn new(config: SignalConfig) -> FeedResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Evaluate a snapshot of `symbol`'s window.
    pub fn evaluate(&self, symbol: &str, snapshot: &DigitSnapshot) -> Option<Signal> {
        if snapshot.window_len < self.config.min_ticks {
            return None;
        }
        let threshold = self.config.threshold_pct;

        let (contract_type, barrier) = match self.config.mode {
            SignalMode::OverUnder if snapshot.low_pct >= threshold => {
                (ContractType::DigitOver, Some(4))
            }
            SignalMode::OverUnder if snapshot.high_pct >= threshold => {
                (ContractType::DigitUnder, Some(5))
            }
            SignalMode::EvenOdd if snapshot.even_pct >= threshold => (ContractType::DigitOdd, None),
            SignalMode::EvenOdd if snapshot.odd_pct >= threshold => (ContractType::DigitEven, None),
            _ => return None,
        };

        debug!(
            symbol,
            %contract_type,
            low_pct = snapshot.low_pct,
            even_pct = snapshot.even_pct,
            window = snapshot.window_len,
            "Digit signal"
        );
        Some(Signal {
            symbol: symbol.to_string(),
            contract_type,
            barrier,
        })
    }
}
