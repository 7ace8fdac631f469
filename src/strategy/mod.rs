// =============================================================================
// Strategy Module — four statistical strategies over pair price history
// =============================================================================
//
// Every strategy is a total function from a read-only evaluation context to a
// typed signal.  Insufficient data, misaligned series, and zero-variance
// windows all degrade to `Hold` with zero confidence; strategies never error
// and never panic.  The only mutable strategy state (the order-book-imbalance
// entry snapshots and kill switch) lives behind interior mutability keyed by
// pair, so one shared strategy set serves every configured pair.

pub mod correlation_rsi;
pub mod engle_granger;
pub mod manager;
pub mod mean_reversion;
pub mod orderbook_imbalance;
pub mod signal;

pub use manager::{AggregatedSignal, StrategyManager};
pub use signal::{SignalDiagnostics, StrategyKind, StrategySignal};

use crate::market_data::OrderBookSnapshot;
use crate::types::SpreadDirection;

/// Read-only inputs for one strategy evaluation.
///
/// Price series are `(timestamp_ms, price)` samples, oldest first, snapshotted
/// before evaluation starts; later market-data updates never mutate them.
pub struct StrategyContext<'a> {
    pub pair_id: &'a str,
    pub prices_a: &'a [(i64, f64)],
    pub prices_b: &'a [(i64, f64)],
    pub orderbook_a: Option<&'a OrderBookSnapshot>,
    pub orderbook_b: Option<&'a OrderBookSnapshot>,
    pub current_position: Option<SpreadDirection>,
}

impl<'a> StrategyContext<'a> {
    pub fn last_price_a(&self) -> Option<f64> {
        self.prices_a.last().map(|(_, p)| *p)
    }

    pub fn last_price_b(&self) -> Option<f64> {
        self.prices_b.last().map(|(_, p)| *p)
    }
}

/// The single seam all strategies implement.
pub trait SpreadStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn signal(&self, ctx: &StrategyContext<'_>) -> StrategySignal;
}
