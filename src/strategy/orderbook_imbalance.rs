// =============================================================================
// Order Book Imbalance (OBI) Strategy
// =============================================================================
//
// Microstructure scalper over the top 5 levels of leg A's book:
//
//   imbalance = (bid_notional - ask_notional) / (bid_notional + ask_notional)
//
// smoothed by a simple mean over the last 10 computed values.  Entries above
// |0.3|, scalping exits on +0.1% / -0.05% average leg pnl or 120 s in trade.
//
// Per-pair state (interior mutability): the sticky entry snapshot used by the
// exit math, the imbalance history, and the kill-switch loss ledger.  The
// kill switch pauses entries for 10 minutes after the pair loses 2% within a
// 5-minute window.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::market_data::OrderBookSnapshot;
use crate::types::{SpreadAction, SpreadDirection};

use super::signal::{SignalDiagnostics, StrategyKind, StrategySignal};
use super::{SpreadStrategy, StrategyContext};

const DEPTH_LEVELS: usize = 5;
const IMBALANCE_THRESHOLD: f64 = 0.3;
const PROFIT_TARGET_PCT: f64 = 0.001;
const STOP_LOSS_PCT: f64 = 0.0005;
const MAX_TRADE_DURATION_SECS: i64 = 120;
const KILL_SWITCH_LOSS_PCT: f64 = 0.02;
const KILL_SWITCH_WINDOW_MINS: i64 = 5;
const KILL_SWITCH_PAUSE_MINS: i64 = 10;
const SMOOTHING_WINDOW: usize = 10;
const LOSS_LEDGER_CAP: usize = 100;

/// Mutable per-pair tracking.
#[derive(Debug, Default)]
struct PairState {
    entry_time: Option<DateTime<Utc>>,
    entry_price_a: f64,
    entry_price_b: f64,
    imbalance_history: VecDeque<f64>,
    recent_losses: VecDeque<(DateTime<Utc>, f64)>,
    paused_until: Option<DateTime<Utc>>,
}

impl PairState {
    fn record_imbalance(&mut self, value: f64) -> f64 {
        self.imbalance_history.push_back(value);
        while self.imbalance_history.len() > SMOOTHING_WINDOW {
            self.imbalance_history.pop_front();
        }
        if self.imbalance_history.len() >= 3 {
            self.imbalance_history.iter().sum::<f64>() / self.imbalance_history.len() as f64
        } else {
            value
        }
    }

    fn record_loss(&mut self, at: DateTime<Utc>, pnl_pct: f64) {
        self.recent_losses.push_back((at, pnl_pct));
        while self.recent_losses.len() > LOSS_LEDGER_CAP {
            self.recent_losses.pop_front();
        }
    }

    fn clear_entry(&mut self) {
        self.entry_time = None;
        self.entry_price_a = 0.0;
        self.entry_price_b = 0.0;
    }

    /// Returns `true` while the kill switch keeps the pair paused; arms the
    /// switch when the trailing-window loss crosses the threshold.
    fn kill_switch_active(&mut self, pair_id: &str, now: DateTime<Utc>) -> bool {
        if let Some(until) = self.paused_until {
            if now < until {
                return true;
            }
            self.paused_until = None;
            info!(pair = pair_id, "kill switch pause ended, resuming OBI entries");
        }

        let cutoff = now - Duration::minutes(KILL_SWITCH_WINDOW_MINS);
        let window_loss: f64 = self
            .recent_losses
            .iter()
            .filter(|(at, _)| *at > cutoff)
            .map(|(_, loss)| loss)
            .sum();

        if window_loss < -KILL_SWITCH_LOSS_PCT {
            self.paused_until = Some(now + Duration::minutes(KILL_SWITCH_PAUSE_MINS));
            warn!(
                pair = pair_id,
                window_loss_pct = window_loss * 100.0,
                pause_mins = KILL_SWITCH_PAUSE_MINS,
                "kill switch activated"
            );
            return true;
        }
        false
    }
}

pub struct OrderBookImbalanceStrategy {
    states: Mutex<HashMap<String, PairState>>,
}

impl OrderBookImbalanceStrategy {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Notional imbalance over the top [`DEPTH_LEVELS`] of the book.
    ///
    /// Returns `(imbalance, bid_notional, ask_notional)`; an empty or
    /// zero-volume book yields all zeros.
    fn book_imbalance(book: &OrderBookSnapshot) -> (f64, f64, f64) {
        let bid_volume: f64 = book
            .bids
            .iter()
            .take(DEPTH_LEVELS)
            .map(|(price, size)| price * size)
            .sum();
        let ask_volume: f64 = book
            .asks
            .iter()
            .take(DEPTH_LEVELS)
            .map(|(price, size)| price * size)
            .sum();

        let total = bid_volume + ask_volume;
        if total <= 0.0 {
            return (0.0, 0.0, 0.0);
        }
        ((bid_volume - ask_volume) / total, bid_volume, ask_volume)
    }

    /// Average per-leg pnl of the sticky entry, signed by spread direction.
    fn position_pnl(
        state: &PairState,
        direction: SpreadDirection,
        price_a: f64,
        price_b: f64,
    ) -> Option<f64> {
        if state.entry_price_a <= 0.0 || state.entry_price_b <= 0.0 {
            return None;
        }
        let (pnl_a, pnl_b) = match direction {
            SpreadDirection::Long => (
                (price_a - state.entry_price_a) / state.entry_price_a,
                (state.entry_price_b - price_b) / state.entry_price_b,
            ),
            SpreadDirection::Short => (
                (state.entry_price_a - price_a) / state.entry_price_a,
                (price_b - state.entry_price_b) / state.entry_price_b,
            ),
        };
        Some((pnl_a + pnl_b) / 2.0)
    }

    fn evaluate(&self, ctx: &StrategyContext<'_>, now: DateTime<Utc>) -> StrategySignal {
        let mut states = self.states.lock();
        let state = states.entry(ctx.pair_id.to_string()).or_default();

        if state.kill_switch_active(ctx.pair_id, now) {
            return StrategySignal::hold("Kill switch activated");
        }

        // Exit management while holding.
        if let Some(direction) = ctx.current_position {
            let (Some(price_a), Some(price_b)) = (ctx.last_price_a(), ctx.last_price_b()) else {
                return StrategySignal::hold_with(0.5, "Holding position", SignalDiagnostics::default());
            };

            let Some(entry_time) = state.entry_time else {
                // Position opened by another strategy; nothing to manage.
                return StrategySignal::hold_with(0.5, "Holding position", SignalDiagnostics::default());
            };

            let Some(avg_pnl) = Self::position_pnl(state, direction, price_a, price_b) else {
                return StrategySignal::hold_with(0.5, "Holding position", SignalDiagnostics::default());
            };

            let time_in_trade = (now - entry_time).num_seconds();
            let exit_reason = if avg_pnl >= PROFIT_TARGET_PCT {
                Some(format!("Profit target hit: {:.3}%", avg_pnl * 100.0))
            } else if avg_pnl <= -STOP_LOSS_PCT {
                Some(format!("Stop loss hit: {:.3}%", avg_pnl * 100.0))
            } else if time_in_trade > MAX_TRADE_DURATION_SECS {
                Some(format!("Max duration hit: {time_in_trade}s"))
            } else {
                None
            };

            if let Some(reason) = exit_reason {
                if avg_pnl < 0.0 {
                    state.record_loss(now, avg_pnl);
                }
                state.clear_entry();
                return StrategySignal::new(
                    SpreadAction::Close,
                    0.95,
                    reason,
                    SignalDiagnostics::default(),
                );
            }

            return StrategySignal::hold_with(
                0.5,
                format!("Holding position (P&L {:.3}%)", avg_pnl * 100.0),
                SignalDiagnostics::default(),
            );
        }

        // Entries need book data on leg A.
        let Some(book) = ctx.orderbook_a else {
            return StrategySignal::hold("No order book data available");
        };

        let (raw, bid_volume, ask_volume) = Self::book_imbalance(book);
        let smoothed = state.record_imbalance(raw);

        let diagnostics = SignalDiagnostics {
            imbalance: Some(smoothed),
            bid_volume: Some(bid_volume),
            ask_volume: Some(ask_volume),
            ..Default::default()
        };

        let open_entry = |state: &mut PairState| {
            state.entry_time = Some(now);
            state.entry_price_a = ctx.last_price_a().unwrap_or(0.0);
            state.entry_price_b = ctx.last_price_b().unwrap_or(0.0);
        };

        if smoothed > IMBALANCE_THRESHOLD {
            open_entry(state);
            let confidence = (0.6 + 0.5 * smoothed.abs()).min(0.95);
            return StrategySignal::new(
                SpreadAction::LongSpread,
                confidence,
                format!(
                    "Strong buy pressure: imbalance {smoothed:.3} > {IMBALANCE_THRESHOLD}"
                ),
                diagnostics,
            );
        }
        if smoothed < -IMBALANCE_THRESHOLD {
            open_entry(state);
            let confidence = (0.6 + 0.5 * smoothed.abs()).min(0.95);
            return StrategySignal::new(
                SpreadAction::ShortSpread,
                confidence,
                format!(
                    "Strong sell pressure: imbalance {smoothed:.3} < -{IMBALANCE_THRESHOLD}"
                ),
                diagnostics,
            );
        }

        // Moderate tier at 70% of the threshold.
        let moderate = IMBALANCE_THRESHOLD * 0.7;
        if smoothed > moderate {
            open_entry(state);
            return StrategySignal::new(
                SpreadAction::LongSpread,
                0.65,
                format!("Moderate buy pressure: imbalance {smoothed:.3}"),
                diagnostics,
            );
        }
        if smoothed < -moderate {
            open_entry(state);
            return StrategySignal::new(
                SpreadAction::ShortSpread,
                0.65,
                format!("Moderate sell pressure: imbalance {smoothed:.3}"),
                diagnostics,
            );
        }

        StrategySignal::hold_with(
            0.5,
            format!("No clear imbalance: {smoothed:.3} within neutral range"),
            diagnostics,
        )
    }
}

impl Default for OrderBookImbalanceStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SpreadStrategy for OrderBookImbalanceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OrderbookImbalance
    }

    fn signal(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        self.evaluate(ctx, Utc::now())
    }
}
