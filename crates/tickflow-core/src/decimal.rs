//! Precision-safe price type.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Quotes arrive as JSON
//! numbers, so trailing zeros are lost on the wire; the display precision
//! (`pip_size`) of the symbol restores them before the last digit is read.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Largest scale `rust_decimal` can represent.
pub const MAX_PRECISION: u32 = 28;

/// Quote price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Price rounded and padded to exactly `precision` decimal places.
    ///
    /// `1234.5` at precision 2 becomes `1234.50`.
    pub fn at_precision(&self, precision: u32) -> Decimal {
        let precision = precision.min(MAX_PRECISION);
        let mut scaled = self
            .0
            .round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
        scaled.rescale(precision);
        scaled
    }

    /// Last decimal digit of the price at the given display precision.
    #[inline]
    pub fn last_digit(&self, precision: u32) -> u8 {
        (self.at_precision(precision).mantissa().unsigned_abs() % 10) as u8
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_last_digit_exact_precision() {
        let price = Price::new(dec!(1234.56));
        assert_eq!(price.last_digit(2), 6);
    }

    #[test]
    fn test_last_digit_restores_trailing_zero() {
        // 1234.50 arrives on the wire as 1234.5
        let price = Price::new(dec!(1234.5));
        assert_eq!(price.last_digit(2), 0);
        assert_eq!(price.at_precision(2).to_string(), "1234.50");
    }

    #[test]
    fn test_last_digit_rounds_extra_places() {
        let price = Price::new(dec!(1234.567));
        assert_eq!(price.last_digit(2), 7);

        let price = Price::new(dec!(1234.565));
        assert_eq!(price.last_digit(2), 7);
    }

    #[test]
    fn test_last_digit_integer_precision() {
        let price = Price::new(dec!(98763));
        assert_eq!(price.last_digit(0), 3);
    }

    #[test]
    fn test_last_digit_precision_clamped() {
        let price = Price::new(dec!(1.5));
        // Must not panic on absurd precision
        assert_eq!(price.last_digit(40), 0);
    }

    #[test]
    fn test_price_arithmetic() {
        let a = Price::new(dec!(100.25));
        let b = Price::new(dec!(100.10));
        assert_eq!((a - b).inner(), dec!(0.15));
        assert_eq!((a + b).inner(), dec!(200.35));
    }
}
