//! Core domain types for the tickflow trading bot.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`: precision-safe quote with last-digit extraction
//! - `Tick`, `Direction`: one structured price update
//! - `ContractType`, `Signal`, `ContractRequest`, `Settlement`: trading vocabulary

pub mod contract;
pub mod decimal;
pub mod error;
pub mod tick;

pub use contract::{
    BuyReceipt, ContractId, ContractRequest, ContractType, DurationUnit, Settlement, Signal,
    TradeOutcome,
};
pub use decimal::{Price, MAX_PRECISION};
pub use error::{CoreError, Result};
pub use tick::{Direction, Tick};
