//! Tick feed processing for tickflow.
//!
//! Turns raw tick frames into structured [`Tick`](tickflow_core::Tick)s,
//! keeps a sliding window of last-digit statistics per symbol and derives
//! trading signals from it.

pub mod aggregator;
pub mod catalogue;
pub mod error;
pub mod extractor;
pub mod signal;

pub use aggregator::{DigitAggregator, DigitSnapshot};
pub use catalogue::{StaticCatalogue, SymbolCatalogue};
pub use error::{FeedError, FeedResult};
pub use extractor::{DigitExtractor, DEFAULT_PRECISION};
pub use signal::{DigitSignalDetector, SignalConfig, SignalMode};
