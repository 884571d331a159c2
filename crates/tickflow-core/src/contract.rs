//! Contract, signal and settlement types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Contract types offered by the venue for tick-duration trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractType {
    #[serde(rename = "DIGITOVER")]
    DigitOver,
    #[serde(rename = "DIGITUNDER")]
    DigitUnder,
    #[serde(rename = "DIGITEVEN")]
    DigitEven,
    #[serde(rename = "DIGITODD")]
    DigitOdd,
    #[serde(rename = "DIGITMATCH")]
    DigitMatch,
    #[serde(rename = "DIGITDIFF")]
    DigitDiff,
    /// Rise.
    #[serde(rename = "CALL")]
    Call,
    /// Fall.
    #[serde(rename = "PUT")]
    Put,
}

impl ContractType {
    /// Whether the contract needs a digit barrier (prediction).
    pub fn requires_barrier(&self) -> bool {
        matches!(
            self,
            Self::DigitOver | Self::DigitUnder | Self::DigitMatch | Self::DigitDiff
        )
    }

    /// Venue wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitOver => "DIGITOVER",
            Self::DigitUnder => "DIGITUNDER",
            Self::DigitEven => "DIGITEVEN",
            Self::DigitOdd => "DIGITODD",
            Self::DigitMatch => "DIGITMATCH",
            Self::DigitDiff => "DIGITDIFF",
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duration unit of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DurationUnit {
    #[default]
    #[serde(rename = "t")]
    Ticks,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
}

/// Venue-assigned contract identifier.
///
/// The venue sends numeric ids; they are kept as strings so they can be
/// used as map keys and log fields without conversions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ContractId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ContractId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Self(n.to_string()),
            Raw::Str(s) => Self(s),
        })
    }
}

/// Outcome of a settled contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Win => write!(f, "win"),
            Self::Loss => write!(f, "loss"),
        }
    }
}

/// Strategy decision handed to the session controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub contract_type: ContractType,
    /// Digit barrier for over/under/match/differ contracts.
    pub barrier: Option<u8>,
}

/// Contract placement the controller asks to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRequest {
    pub symbol: String,
    pub contract_type: ContractType,
    pub barrier: Option<u8>,
    pub stake: Decimal,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
}

/// Venue receipt for a placed contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyReceipt {
    pub contract_id: ContractId,
    pub buy_price: Decimal,
    pub start_time: Option<DateTime<Utc>>,
}

/// Final result of a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub contract_id: ContractId,
    /// Signed profit/loss of the contract.
    pub profit: Decimal,
    pub outcome: TradeOutcome,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub settled_at: DateTime<Utc>,
}
