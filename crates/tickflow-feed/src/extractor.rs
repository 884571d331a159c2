//! Digit extractor: raw tick payloads to structured ticks.

use crate::catalogue::SymbolCatalogue;
use crate::error::{FeedError, FeedResult};
use std::collections::HashMap;
use std::sync::Arc;
use tickflow_core::{Price, Tick};
use tickflow_ws::TickPayload;
use tracing::trace;

/// Precision used when neither the frame nor the catalogue knows the symbol.
pub const DEFAULT_PRECISION: u32 = 2;

/// Converts tick payloads into [`Tick`]s.
///
/// Remembers the last price of every symbol to compute direction and delta.
pub struct DigitExtractor {
    catalogue: Arc<dyn SymbolCatalogue>,
    last_price: HashMap<String, Price>,
}

impl DigitExtractor {
    pub fn new(catalogue: Arc<dyn SymbolCatalogue>) -> Self {
        Self {
            catalogue,
            last_price: HashMap::new(),
        }
    }

    /// Precision for a payload: frame `pip_size`, then catalogue, then default.
    pub fn precision_for(&self, payload: &TickPayload) -> u32 {
        payload
            .pip_size
            .or_else(|| self.catalogue.precision(&payload.symbol))
            .unwrap_or(DEFAULT_PRECISION)
    }

    /// Build the next tick for the payload's symbol.
    ///
    /// A rejected payload leaves the previous price untouched.
    pub fn extract(&mut self, payload: &TickPayload) -> FeedResult<Tick> {
        let precision = self.precision_for(payload);
        let price = Price::new(payload.quote);
        let previous = self.last_price.get(&payload.symbol).copied();

        let tick = Tick::from_quote(
            payload.symbol.clone(),
            payload.epoch,
            price,
            precision,
            previous,
        )
        .map_err(|e| FeedError::InvalidTick {
            symbol: payload.symbol.clone(),
            reason: e.to_string(),
        })?;

        self.last_price.insert(payload.symbol.clone(), price);
        trace!(symbol = %tick.symbol, price = %tick.price, digit = tick.digit, "Tick extracted");
        Ok(tick)
    }

    /// Forget the last price of every symbol.
    ///
    /// Called after a reconnect so the first tick is not compared against a
    /// quote from before the gap.
    pub fn reset(&mut self) {
        self.last_price.clear();
    }
}
