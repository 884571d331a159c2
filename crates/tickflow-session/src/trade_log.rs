//! Trade log.
//!
//! Insertion-ordered record of the session's contracts. Pending entries are
//! settled in place; aggregates are computed on read.

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tickflow_core::{ContractId, ContractType, Settlement, TradeOutcome};
use tracing::debug;

/// Result column of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Win,
    Loss,
    Pending,
}

impl From<TradeOutcome> for TradeStatus {
    fn from(outcome: TradeOutcome) -> Self {
        match outcome {
            TradeOutcome::Win => Self::Win,
            TradeOutcome::Loss => Self::Loss,
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Win => write!(f, "win"),
            Self::Loss => write!(f, "loss"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// One contract of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeLogEntry {
    pub id: ContractId,
    /// Placement time.
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub contract_type: ContractType,
    /// Barrier digit, for digit contracts that take one.
    pub prediction: Option<u8>,
    /// Quote the contract was placed on, replaced by the venue's entry spot
    /// once reported. `None` only when no quote was seen for the symbol.
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub stake: Decimal,
    pub result: TradeStatus,
    pub profit_loss: Decimal,
    /// Placement to settlement.
    pub duration: Option<Duration>,
}

impl TradeLogEntry {
    /// New pending entry.
    pub fn pending(
        id: ContractId,
        symbol: impl Into<String>,
        contract_type: ContractType,
        prediction: Option<u8>,
        stake: Decimal,
    ) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            symbol: symbol.into(),
            contract_type,
            prediction,
            entry_price: None,
            exit_price: None,
            stake,
            result: TradeStatus::Pending,
            profit_loss: Decimal::ZERO,
            duration: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result == TradeStatus::Pending
    }
}

/// Aggregates over the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeStats {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub pending: usize,
    /// Percent of settled trades that won; 0 when none settled.
    pub win_rate: f64,
    pub total_pnl: Decimal,
}

/// Insertion-ordered trade log.
#[derive(Debug, Default)]
pub struct TradeLog {
    entries: Vec<TradeLogEntry>,
    index: HashMap<ContractId, usize>,
}

impl TradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry.
    pub fn record(&mut self, entry: TradeLogEntry) -> SessionResult<()> {
        if self.index.contains_key(&entry.id) {
            return Err(SessionError::DuplicateTrade(entry.id.to_string()));
        }
        debug!(id = %entry.id, symbol = %entry.symbol, stake = %entry.stake, "Trade recorded");
        self.index.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Set the entry spot of a pending entry.
    pub fn set_entry_price(&mut self, id: &ContractId, price: Decimal) -> SessionResult<()> {
        let entry = self.entry_mut(id)?;
        if entry.is_pending() {
            entry.entry_price = Some(price);
        }
        Ok(())
    }

    /// Settle an entry in place.
    pub fn settle(
        &mut self,
        id: &ContractId,
        exit_price: Option<Decimal>,
        result: TradeOutcome,
        profit_loss: Decimal,
    ) -> SessionResult<&TradeLogEntry> {
        self.settle_at(id, exit_price, result, profit_loss, Utc::now())
    }

    /// Settle an entry from a venue settlement, keeping its entry spot and
    /// settlement time.
    pub fn apply_settlement(&mut self, settlement: &Settlement) -> SessionResult<&TradeLogEntry> {
        let entry = self.entry_mut(&settlement.contract_id)?;
        if settlement.entry_price.is_some() {
            entry.entry_price = settlement.entry_price;
        }
        self.settle_at(
            &settlement.contract_id,
            settlement.exit_price,
            settlement.outcome,
            settlement.profit,
            settlement.settled_at,
        )
    }

    fn settle_at(
        &mut self,
        id: &ContractId,
        exit_price: Option<Decimal>,
        result: TradeOutcome,
        profit_loss: Decimal,
        settled_at: DateTime<Utc>,
    ) -> SessionResult<&TradeLogEntry> {
        let entry = self.entry_mut(id)?;
        entry.exit_price = exit_price;
        entry.result = result.into();
        entry.profit_loss = profit_loss;
        entry.duration = Some(settled_at - entry.timestamp);
        debug!(%id, %result, %profit_loss, "Trade settled");
        Ok(entry)
    }

    fn entry_mut(&mut self, id: &ContractId) -> SessionResult<&mut TradeLogEntry> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| SessionError::UnknownTrade(id.to_string()))?;
        Ok(&mut self.entries[idx])
    }

    pub fn get(&self, id: &ContractId) -> Option<&TradeLogEntry> {
        self.index.get(id).map(|&idx| &self.entries[idx])
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[TradeLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> TradeStats {
        let mut wins = 0;
        let mut losses = 0;
        let mut total_pnl = Decimal::ZERO;
        for entry in &self.entries {
            match entry.result {
                TradeStatus::Win => wins += 1,
                TradeStatus::Loss => losses += 1,
                TradeStatus::Pending => continue,
            }
            total_pnl += entry.profit_loss;
        }
        let settled = wins + losses;

        TradeStats {
            total: self.entries.len(),
            wins,
            losses,
            pending: self.entries.len() - settled,
            win_rate: if settled == 0 {
                0.0
            } else {
                wins as f64 * 100.0 / settled as f64
            },
            total_pnl,
        }
    }
}
