//! Symbol catalogue.
//!
//! Supplies the display precision of each tradable symbol for when a tick
//! frame does not carry its own `pip_size`.

use std::collections::BTreeMap;

/// Source of per-symbol display precision.
pub trait SymbolCatalogue: Send + Sync {
    /// Decimal places the venue displays for `symbol`.
    fn precision(&self, symbol: &str) -> Option<u32>;

    /// Known symbols, sorted.
    fn symbols(&self) -> Vec<String>;
}

/// Catalogue fixed at startup (from configuration).
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogue {
    markets: BTreeMap<String, u32>,
}

impl StaticCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a symbol.
    pub fn with_symbol(mut self, symbol: impl Into<String>, precision: u32) -> Self {
        self.insert(symbol, precision);
        self
    }

    pub fn insert(&mut self, symbol: impl Into<String>, precision: u32) {
        self.markets.insert(symbol.into(), precision);
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for StaticCatalogue {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        Self {
            markets: iter.into_iter().map(|(s, p)| (s.into(), p)).collect(),
        }
    }
}

impl SymbolCatalogue for StaticCatalogue {
    fn precision(&self, symbol: &str) -> Option<u32> {
        self.markets.get(symbol).copied()
    }

    fn symbols(&self) -> Vec<String> {
        self.markets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let catalogue = StaticCatalogue::new()
            .with_symbol("R_100", 2)
            .with_symbol("1HZ10V", 3);

        assert_eq!(catalogue.precision("1HZ10V"), Some(3));
        assert_eq!(catalogue.precision("R_10"), None);
        assert_eq!(catalogue.symbols(), vec!["1HZ10V", "R_100"]);
    }

    #[test]
    fn test_from_iter_last_wins() {
        let catalogue: StaticCatalogue = [("R_50", 4), ("R_50", 2)].into_iter().collect();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue.precision("R_50"), Some(2));
    }
}
