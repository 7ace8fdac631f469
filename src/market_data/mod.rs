// =============================================================================
// Market Data Plane — symbol-keyed caches fed by the exchange WebSocket
// =============================================================================
//
// Single entry point for live market state.  One writer (the WebSocket
// dispatcher in `stream.rs`), many readers (strategies, orchestrator,
// executor).  Readers always get the latest snapshot and tolerate staleness;
// a missing tick merely means "no new sample this iteration".
//
// Caches per symbol:
//   - latest price   (mid of top-of-book; ticker lastPrice as fallback)
//   - orderbook      (top 50 levels, maintained from snapshot/delta messages)
//   - latest candle  plus a bounded ring of confirmed 1-minute candles
//   - funding rate
// =============================================================================

pub mod history;
pub mod stream;

pub use history::{PriceHistory, PricePoint};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Depth retained per side of the book.
const BOOK_DEPTH: usize = 50;
/// Confirmed candles retained per symbol.
const MAX_CANDLES: usize = 200;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single 1-minute OHLCV candle from the kline stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    /// `true` once the exchange has closed the bar.
    pub confirmed: bool,
}

/// Top-of-book snapshot for one symbol.
///
/// `bids` are ordered descending by price, `asks` ascending; both are capped
/// at [`BOOK_DEPTH`] levels. Entries are `(price, size)` in base units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }

    /// Mid price when both sides of the book are present.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

/// A parsed orderbook message: full snapshot or incremental delta.
#[derive(Debug, Clone)]
pub struct OrderBookUpdate {
    pub symbol: String,
    pub is_snapshot: bool,
    /// `(price, size)` rows; a zero size deletes the level.
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

// ---------------------------------------------------------------------------
// MarketDataManager
// ---------------------------------------------------------------------------

/// Thread-safe market state shared between the stream tasks and the engine.
pub struct MarketDataManager {
    prices: RwLock<HashMap<String, f64>>,
    books: RwLock<HashMap<String, OrderBookSnapshot>>,
    latest_candles: RwLock<HashMap<String, Candle>>,
    candle_rings: RwLock<HashMap<String, VecDeque<Candle>>>,
    funding_rates: RwLock<HashMap<String, f64>>,
    last_update: RwLock<HashMap<String, DateTime<Utc>>>,
    connected: AtomicBool,
}

impl MarketDataManager {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            books: RwLock::new(HashMap::new()),
            latest_candles: RwLock::new(HashMap::new()),
            candle_rings: RwLock::new(HashMap::new()),
            funding_rates: RwLock::new(HashMap::new()),
            last_update: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    // ── Writers (WebSocket dispatcher only) ─────────────────────────────

    /// Apply an orderbook snapshot or delta and refresh the mid price.
    pub(crate) fn apply_orderbook(&self, update: OrderBookUpdate) {
        let mut books = self.books.write();
        let book = books
            .entry(update.symbol.clone())
            .or_insert_with(|| OrderBookSnapshot {
                symbol: update.symbol.clone(),
                ..Default::default()
            });

        if update.is_snapshot {
            book.bids = update.bids;
            book.asks = update.asks;
        } else {
            apply_side(&mut book.bids, &update.bids);
            apply_side(&mut book.asks, &update.asks);
        }

        // Keep bids descending, asks ascending, both truncated to depth.
        book.bids
            .sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        book.asks
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        book.bids.truncate(BOOK_DEPTH);
        book.asks.truncate(BOOK_DEPTH);

        if let Some(mid) = book.mid_price() {
            drop(books);
            self.prices.write().insert(update.symbol.clone(), mid);
            self.last_update.write().insert(update.symbol, Utc::now());
        }
    }

    /// Apply a ticker update: funding rate and (as a fallback when the book
    /// is one-sided) the last traded price.
    pub(crate) fn apply_ticker(
        &self,
        symbol: &str,
        last_price: Option<f64>,
        funding_rate: Option<f64>,
    ) {
        if let Some(rate) = funding_rate {
            self.funding_rates.write().insert(symbol.to_string(), rate);
        }
        if let Some(price) = last_price.filter(|p| *p > 0.0) {
            self.prices.write().insert(symbol.to_string(), price);
            self.last_update.write().insert(symbol.to_string(), Utc::now());
        }
    }

    /// Overwrite the latest candle; confirmed candles enter the ring.
    ///
    /// The in-progress bar is replaced in place; once a bar with the same
    /// start time arrives confirmed it becomes permanent and the ring is
    /// trimmed to [`MAX_CANDLES`].
    pub(crate) fn apply_candle(&self, symbol: &str, candle: Candle) {
        self.latest_candles
            .write()
            .insert(symbol.to_string(), candle.clone());

        if !candle.confirmed {
            return;
        }

        let mut rings = self.candle_rings.write();
        let ring = rings
            .entry(symbol.to_string())
            .or_insert_with(|| VecDeque::with_capacity(MAX_CANDLES + 1));

        if let Some(last) = ring.back() {
            if last.start_ms == candle.start_ms {
                ring.pop_back();
            }
        }
        ring.push_back(candle);
        while ring.len() > MAX_CANDLES {
            ring.pop_front();
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    // ── Readers ─────────────────────────────────────────────────────────

    /// Latest price for a symbol, if any sample has arrived.
    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.read().get(symbol).copied()
    }

    /// Snapshot of the current orderbook.
    pub fn orderbook(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.books.read().get(symbol).cloned()
    }

    /// The most recent (possibly in-progress) candle.
    pub fn candle(&self, symbol: &str) -> Option<Candle> {
        self.latest_candles.read().get(symbol).cloned()
    }

    /// The most recent `count` confirmed candles, oldest first.
    pub fn confirmed_candles(&self, symbol: &str, count: usize) -> Vec<Candle> {
        let rings = self.candle_rings.read();
        match rings.get(symbol) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn funding_rate(&self, symbol: &str) -> Option<f64> {
        self.funding_rates.read().get(symbol).copied()
    }

    pub fn last_update(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_update.read().get(symbol).copied()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Default for MarketDataManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MarketDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataManager")
            .field("symbols", &self.prices.read().len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Merge delta rows into one side of the book: zero-size rows delete the
/// level, others upsert it.
fn apply_side(side: &mut Vec<(f64, f64)>, rows: &[(f64, f64)]) {
    for &(price, size) in rows {
        if size == 0.0 {
            side.retain(|(p, _)| *p != price);
        } else if let Some(level) = side.iter_mut().find(|(p, _)| *p == price) {
            level.1 = size;
        } else {
            side.push((price, size));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(symbol: &str, bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> OrderBookUpdate {
        OrderBookUpdate {
            symbol: symbol.to_string(),
            is_snapshot: true,
            bids,
            asks,
        }
    }

    #[test]
    fn snapshot_sets_mid_price() {
        let md = MarketDataManager::new();
        md.apply_orderbook(snapshot(
            "BTCUSDT",
            vec![(59_990.0, 1.0), (59_980.0, 2.0)],
            vec![(60_010.0, 1.5), (60_020.0, 1.0)],
        ));
        assert_eq!(md.price("BTCUSDT"), Some(60_000.0));
        let book = md.orderbook("BTCUSDT").unwrap();
        assert_eq!(book.best_bid(), Some(59_990.0));
        assert_eq!(book.best_ask(), Some(60_010.0));
    }

    #[test]
    fn delta_upserts_and_deletes_levels() {
        let md = MarketDataManager::new();
        md.apply_orderbook(snapshot(
            "ETHUSDT",
            vec![(3000.0, 1.0), (2999.0, 2.0)],
            vec![(3001.0, 1.0)],
        ));

        md.apply_orderbook(OrderBookUpdate {
            symbol: "ETHUSDT".into(),
            is_snapshot: false,
            bids: vec![(3000.0, 0.0), (2998.0, 5.0)], // delete best, add deeper
            asks: vec![(3001.0, 3.0)],                // resize
        });

        let book = md.orderbook("ETHUSDT").unwrap();
        assert_eq!(book.best_bid(), Some(2999.0));
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks, vec![(3001.0, 3.0)]);
    }

    #[test]
    fn one_sided_book_has_no_mid() {
        let md = MarketDataManager::new();
        md.apply_orderbook(snapshot("XRPUSDT", vec![(0.5, 100.0)], vec![]));
        assert_eq!(md.price("XRPUSDT"), None);
    }

    #[test]
    fn ticker_fallback_price_and_funding() {
        let md = MarketDataManager::new();
        md.apply_ticker("SOLUSDT", Some(150.0), Some(0.0001));
        assert_eq!(md.price("SOLUSDT"), Some(150.0));
        assert_eq!(md.funding_rate("SOLUSDT"), Some(0.0001));

        // Zero prices are ignored; funding still updates.
        md.apply_ticker("SOLUSDT", Some(0.0), Some(0.0002));
        assert_eq!(md.price("SOLUSDT"), Some(150.0));
        assert_eq!(md.funding_rate("SOLUSDT"), Some(0.0002));
    }

    fn candle(start_ms: i64, close: f64, confirmed: bool) -> Candle {
        Candle {
            start_ms,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            turnover: 1000.0,
            confirmed,
        }
    }

    #[test]
    fn in_progress_candle_is_latest_but_not_ringed() {
        let md = MarketDataManager::new();
        md.apply_candle("BTCUSDT", candle(0, 100.0, false));
        assert_eq!(md.candle("BTCUSDT").unwrap().close, 100.0);
        assert!(md.confirmed_candles("BTCUSDT", 10).is_empty());

        md.apply_candle("BTCUSDT", candle(0, 101.0, true));
        assert_eq!(md.confirmed_candles("BTCUSDT", 10).len(), 1);
    }

    #[test]
    fn duplicate_confirm_replaces_not_duplicates() {
        let md = MarketDataManager::new();
        md.apply_candle("BTCUSDT", candle(0, 100.0, true));
        md.apply_candle("BTCUSDT", candle(0, 100.5, true));
        md.apply_candle("BTCUSDT", candle(60_000, 101.0, true));
        let candles = md.confirmed_candles("BTCUSDT", 10);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 100.5);
    }

    #[test]
    fn candle_ring_is_bounded() {
        let md = MarketDataManager::new();
        for i in 0..(MAX_CANDLES + 50) {
            md.apply_candle("BTCUSDT", candle(i as i64 * 60_000, 100.0 + i as f64, true));
        }
        let candles = md.confirmed_candles("BTCUSDT", usize::MAX);
        assert_eq!(candles.len(), MAX_CANDLES);
    }
}
