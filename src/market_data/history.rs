// =============================================================================
// Price History — bounded per-symbol tick sequences
// =============================================================================
//
// Feeds the statistical strategies.  Each refresh samples the latest cached
// price for every symbol, throttled to at most one sample per second, and
// keeps the most recent 10 000 points.  Duplicate timestamps keep the later
// value.  The engine passes a single `now` per refresh so that samples align
// across symbols (the cointegration alignment intersects on timestamps).
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use super::MarketDataManager;

/// One timestamped price sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub ts_ms: i64,
    pub price: f64,
}

/// Minimum spacing between stored samples.
const SAMPLE_INTERVAL_MS: i64 = 1_000;
/// Points retained per symbol.
const MAX_POINTS: usize = 10_000;

/// Per-symbol time-indexed price sequences.
pub struct PriceHistory {
    series: RwLock<HashMap<String, VecDeque<PricePoint>>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Sample the latest price of every `symbol` from `market_data` at
    /// timestamp `now_ms`.  Symbols without a fresh price are skipped.
    pub fn refresh(&self, market_data: &MarketDataManager, symbols: &[String], now_ms: i64) {
        for symbol in symbols {
            if let Some(price) = market_data.price(symbol).filter(|p| *p > 0.0) {
                self.push(symbol, now_ms, price);
            }
        }
    }

    /// Append a sample, applying the 1-second throttle, the duplicate-
    /// timestamp keep-latest rule, and the retention cap.
    pub fn push(&self, symbol: &str, ts_ms: i64, price: f64) {
        let mut series = self.series.write();
        let points = series.entry(symbol.to_string()).or_default();

        match points.back_mut() {
            Some(last) if last.ts_ms == ts_ms => {
                last.price = price;
                return;
            }
            Some(last) if ts_ms - last.ts_ms < SAMPLE_INTERVAL_MS => {
                return;
            }
            _ => {}
        }

        points.push_back(PricePoint { ts_ms, price });
        while points.len() > MAX_POINTS {
            points.pop_front();
        }
    }

    /// Snapshot of a symbol's sample sequence, oldest first.
    pub fn series(&self, symbol: &str) -> Vec<PricePoint> {
        self.series
            .read()
            .get(symbol)
            .map(|points| points.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot as `(timestamp, price)` tuples for the stats helpers.
    pub fn series_pairs(&self, symbol: &str) -> Vec<(i64, f64)> {
        self.series
            .read()
            .get(symbol)
            .map(|points| points.iter().map(|p| (p.ts_ms, p.price)).collect())
            .unwrap_or_default()
    }

    /// Price values only, oldest first.
    pub fn prices(&self, symbol: &str) -> Vec<f64> {
        self.series
            .read()
            .get(symbol)
            .map(|points| points.iter().map(|p| p.price).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series.read().get(symbol).map_or(0, VecDeque::len)
    }
}

impl Default for PriceHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PriceHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceHistory")
            .field("symbols", &self.series.read().len())
            .finish()
    }
}
