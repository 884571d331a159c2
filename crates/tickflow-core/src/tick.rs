//! Structured tick model.
//!
//! A `Tick` is produced once per inbound quote and never mutated afterwards.

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Price movement relative to the previous tick of the same symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Classify a price delta.
    pub fn from_delta(delta: Decimal) -> Self {
        match delta.cmp(&Decimal::ZERO) {
            Ordering::Greater => Self::Up,
            Ordering::Less => Self::Down,
            Ordering::Equal => Self::Flat,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// One timestamped price update for a traded instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Price,
    /// Last decimal digit at the symbol's display precision (0-9).
    pub digit: u8,
    pub direction: Direction,
    /// `price - previous price`; zero for the first tick of a symbol.
    pub delta: Decimal,
}

impl Tick {
    /// Build a tick from a raw quote.
    ///
    /// `epoch` is in seconds. `previous` is the prior price of the same
    /// symbol, if any.
    pub fn from_quote(
        symbol: impl Into<String>,
        epoch: i64,
        price: Price,
        precision: u32,
        previous: Option<Price>,
    ) -> Result<Self> {
        if price.inner().is_sign_negative() {
            return Err(CoreError::InvalidPrice(price.to_string()));
        }
        let timestamp = Utc
            .timestamp_opt(epoch, 0)
            .single()
            .ok_or(CoreError::InvalidTimestamp(epoch))?;

        let delta = previous
            .map(|prev| (price - prev).inner())
            .unwrap_or(Decimal::ZERO);

        Ok(Self {
            symbol: symbol.into(),
            timestamp,
            price,
            digit: price.last_digit(precision),
            direction: Direction::from_delta(delta),
            delta,
        })
    }

    /// Check if the digit falls in the low range (0-4).
    #[inline]
    pub fn is_low(&self) -> bool {
        self.digit < 5
    }

    /// Check if the digit is even.
    #[inline]
    pub fn is_even(&self) -> bool {
        self.digit % 2 == 0
    }
}
