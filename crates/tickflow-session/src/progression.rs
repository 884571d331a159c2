//! Stake progression policies.

use crate::error::{SessionError, SessionResult};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use tickflow_core::TradeOutcome;

/// Stakes are quoted in currency units with cents.
const STAKE_DP: u32 = 2;

/// Maps the previous stake and the trade outcome to the next stake.
pub trait StakeProgression: Send + Sync + fmt::Debug {
    fn next_stake(&self, previous: Decimal, outcome: TradeOutcome) -> Decimal;
}

/// Same stake every trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatStake {
    pub stake: Decimal,
}

impl StakeProgression for FlatStake {
    fn next_stake(&self, _previous: Decimal, _outcome: TradeOutcome) -> Decimal {
        self.stake
    }
}

/// Multiply on loss, reset on win, never above `max_stake`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Martingale {
    pub initial: Decimal,
    pub factor: Decimal,
    pub max_stake: Decimal,
}

impl StakeProgression for Martingale {
    fn next_stake(&self, previous: Decimal, outcome: TradeOutcome) -> Decimal {
        match outcome {
            TradeOutcome::Win => self.initial,
            TradeOutcome::Loss => previous
                .checked_mul(self.factor)
                .unwrap_or(self.max_stake)
                .round_dp_with_strategy(STAKE_DP, RoundingStrategy::MidpointAwayFromZero)
                .min(self.max_stake),
        }
    }
}

/// Progression as configured.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressionConfig {
    #[default]
    Flat,
    Martingale { factor: Decimal, max_stake: Decimal },
}

impl ProgressionConfig {
    pub fn validate(&self, initial_stake: Decimal) -> SessionResult<()> {
        match self {
            Self::Flat => Ok(()),
            Self::Martingale { factor, max_stake } => {
                if *factor < Decimal::ONE {
                    return Err(SessionError::InvalidConfig(format!(
                        "martingale factor must be >= 1, got {factor}"
                    )));
                }
                if *max_stake < initial_stake {
                    return Err(SessionError::InvalidConfig(format!(
                        "max_stake {max_stake} below initial stake {initial_stake}"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn build(&self, initial_stake: Decimal) -> Box<dyn StakeProgression> {
        match self {
            Self::Flat => Box::new(FlatStake {
                stake: initial_stake,
            }),
            Self::Martingale { factor, max_stake } => Box::new(Martingale {
                initial: initial_stake,
                factor: *factor,
                max_stake: *max_stake,
            }),
        }
    }
}
