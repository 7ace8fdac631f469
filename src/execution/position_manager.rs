// =============================================================================
// Position Manager — authoritative store of open positions and closed trades
// =============================================================================
//
// Life-cycle per pair: None -> Open -> Closed, never reversible in a run.
// One position per pair at most; duplicate adds are rejected.  Unrealized
// pnl is recomputed on every price update:
//
//   long leg:  (current - entry) * qty
//   short leg: (entry - current) * qty
//
// Closing subtracts the round-trip commission (exit notional of both legs
// x taker fee x 2) once, appends an immutable Trade, and rolls the realized
// pnl into the daily and session totals.  The engine starts flat:
// `clear_all_history` wipes everything at startup.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::types::{PositionSide, SpreadDirection};

/// Taker fee per side (0.06%).
pub const TAKER_FEE: f64 = 0.0006;

// ---------------------------------------------------------------------------
// Position / Trade models
// ---------------------------------------------------------------------------

/// An open two-leg market-neutral position.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub pair_id: String,
    pub symbol_a: String,
    pub symbol_b: String,
    pub side_a: PositionSide,
    pub side_b: PositionSide,
    /// Executed base-currency quantities.
    pub qty_a: f64,
    pub qty_b: f64,
    pub entry_price_a: f64,
    pub entry_price_b: f64,
    pub current_price_a: f64,
    pub current_price_b: f64,
    pub hedge_ratio: f64,
    pub entry_zscore: f64,
    pub current_zscore: f64,
    pub entry_time: DateTime<Utc>,
    pub unrealized_pnl: f64,
    /// Strategy that opened the position (OR mode attribution).
    pub opened_by: Option<String>,
    /// Peak profit percentage, tracked by the trailing stop.
    pub max_profit_pct: Option<f64>,
}

impl Position {
    pub fn direction(&self) -> SpreadDirection {
        match self.side_a {
            PositionSide::Long => SpreadDirection::Long,
            PositionSide::Short => SpreadDirection::Short,
        }
    }

    /// USD value of both legs at entry.
    pub fn entry_notional(&self) -> f64 {
        self.qty_a * self.entry_price_a + self.qty_b * self.entry_price_b
    }

    /// USD value of both legs at current prices.
    pub fn current_notional(&self) -> f64 {
        let price_a = if self.current_price_a > 0.0 {
            self.current_price_a
        } else {
            self.entry_price_a
        };
        let price_b = if self.current_price_b > 0.0 {
            self.current_price_b
        } else {
            self.entry_price_b
        };
        self.qty_a * price_a + self.qty_b * price_b
    }
}

/// Immutable record of a closed position.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub pair_id: String,
    pub symbol_a: String,
    pub symbol_b: String,
    pub side_a: PositionSide,
    pub side_b: PositionSide,
    pub qty_a: f64,
    pub qty_b: f64,
    pub entry_price_a: f64,
    pub entry_price_b: f64,
    pub exit_price_a: f64,
    pub exit_price_b: f64,
    pub hedge_ratio: f64,
    pub entry_zscore: f64,
    pub exit_zscore: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub duration_minutes: f64,
    /// Net of commission.
    pub pnl: f64,
    pub pnl_percent: f64,
    pub commission: f64,
    pub reason: String,
    pub strategy: Option<String>,
}

/// Parameters for opening a position.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub pair_id: String,
    pub symbol_a: String,
    pub symbol_b: String,
    pub side_a: PositionSide,
    pub side_b: PositionSide,
    pub qty_a: f64,
    pub qty_b: f64,
    pub entry_price_a: f64,
    pub entry_price_b: f64,
    pub hedge_ratio: f64,
    pub entry_zscore: f64,
    pub opened_by: Option<String>,
}

// ---------------------------------------------------------------------------
// PositionManager
// ---------------------------------------------------------------------------

struct Inner {
    open: HashMap<String, Position>,
    closed: Vec<Trade>,
    daily_pnl: f64,
    total_pnl: f64,
}

/// Thread-safe manager that owns open positions and the trade ledger.
pub struct PositionManager {
    inner: RwLock<Inner>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                open: HashMap::new(),
                closed: Vec::new(),
                daily_pnl: 0.0,
                total_pnl: 0.0,
            }),
        }
    }

    // ── Open ────────────────────────────────────────────────────────────

    /// Open a position for a pair. Rejects (with a warning) when the pair
    /// already has one, or when the legs are not market-neutral.
    pub fn add_position(&self, params: NewPosition) -> Option<Position> {
        if params.side_a == params.side_b {
            warn!(pair = %params.pair_id, "rejected position with equal leg sides");
            return None;
        }
        if params.qty_a <= 0.0 || params.qty_b <= 0.0 {
            warn!(pair = %params.pair_id, qty_a = params.qty_a, qty_b = params.qty_b, "rejected position with non-positive quantity");
            return None;
        }

        let mut inner = self.inner.write();
        if inner.open.contains_key(&params.pair_id) {
            warn!(pair = %params.pair_id, "position already open, rejecting duplicate add");
            return None;
        }

        let position = Position {
            pair_id: params.pair_id.clone(),
            symbol_a: params.symbol_a,
            symbol_b: params.symbol_b,
            side_a: params.side_a,
            side_b: params.side_b,
            qty_a: params.qty_a,
            qty_b: params.qty_b,
            entry_price_a: params.entry_price_a,
            entry_price_b: params.entry_price_b,
            current_price_a: params.entry_price_a,
            current_price_b: params.entry_price_b,
            hedge_ratio: params.hedge_ratio,
            entry_zscore: params.entry_zscore,
            current_zscore: params.entry_zscore,
            entry_time: Utc::now(),
            unrealized_pnl: 0.0,
            opened_by: params.opened_by,
            max_profit_pct: None,
        };

        info!(
            pair = %position.pair_id,
            side_a = %position.side_a,
            qty_a = position.qty_a,
            side_b = %position.side_b,
            qty_b = position.qty_b,
            entry_a = position.entry_price_a,
            entry_b = position.entry_price_b,
            "position opened"
        );

        inner.open.insert(params.pair_id, position.clone());
        Some(position)
    }

    // ── Update ──────────────────────────────────────────────────────────

    /// Refresh current prices, z-score, and unrealized pnl for a pair.
    /// Idempotent for identical inputs; non-positive prices are ignored.
    pub fn update_position(
        &self,
        pair_id: &str,
        current_price_a: f64,
        current_price_b: f64,
        current_zscore: f64,
    ) {
        if current_price_a <= 0.0 || current_price_b <= 0.0 {
            warn!(
                pair = pair_id,
                price_a = current_price_a,
                price_b = current_price_b,
                "ignoring position update with invalid prices"
            );
            return;
        }

        let mut inner = self.inner.write();
        let Some(position) = inner.open.get_mut(pair_id) else {
            return;
        };

        position.current_price_a = current_price_a;
        position.current_price_b = current_price_b;
        position.current_zscore = current_zscore;

        let pnl_a = leg_pnl(
            position.side_a,
            position.entry_price_a,
            current_price_a,
            position.qty_a,
        );
        let pnl_b = leg_pnl(
            position.side_b,
            position.entry_price_b,
            current_price_b,
            position.qty_b,
        );
        position.unrealized_pnl = pnl_a + pnl_b;
    }

    /// Run `f` against the open position for `pair_id`, if any.  Used by the
    /// risk agent's exit checks, which mutate the trailing-stop state.
    pub fn modify<R>(&self, pair_id: &str, f: impl FnOnce(&mut Position) -> R) -> Option<R> {
        let mut inner = self.inner.write();
        inner.open.get_mut(pair_id).map(f)
    }

    // ── Close ───────────────────────────────────────────────────────────

    /// Close a position, record the trade, and roll the realized pnl into
    /// the session totals. Returns `None` when no position is open.
    pub fn close_position(
        &self,
        pair_id: &str,
        exit_price_a: f64,
        exit_price_b: f64,
        exit_zscore: f64,
        reason: &str,
    ) -> Option<Trade> {
        let mut inner = self.inner.write();
        let Some(position) = inner.open.remove(pair_id) else {
            warn!(pair = pair_id, "attempted to close non-existent position");
            return None;
        };

        let pnl_a = leg_pnl(
            position.side_a,
            position.entry_price_a,
            exit_price_a,
            position.qty_a,
        );
        let pnl_b = leg_pnl(
            position.side_b,
            position.entry_price_b,
            exit_price_b,
            position.qty_b,
        );
        let gross_pnl = pnl_a + pnl_b;

        // Round-trip commission, applied once at close.
        let exit_notional = position.qty_a * exit_price_a + position.qty_b * exit_price_b;
        let commission = exit_notional * TAKER_FEE * 2.0;
        let net_pnl = gross_pnl - commission;

        let exit_time = Utc::now();
        let duration_minutes = (exit_time - position.entry_time).num_seconds() as f64 / 60.0;

        let initial_value = position.entry_notional();
        let pnl_percent = if initial_value > 0.0 {
            net_pnl / initial_value * 100.0
        } else {
            0.0
        };

        let trade = Trade {
            pair_id: position.pair_id.clone(),
            symbol_a: position.symbol_a.clone(),
            symbol_b: position.symbol_b.clone(),
            side_a: position.side_a,
            side_b: position.side_b,
            qty_a: position.qty_a,
            qty_b: position.qty_b,
            entry_price_a: position.entry_price_a,
            entry_price_b: position.entry_price_b,
            exit_price_a,
            exit_price_b,
            hedge_ratio: position.hedge_ratio,
            entry_zscore: position.entry_zscore,
            exit_zscore,
            entry_time: position.entry_time,
            exit_time,
            duration_minutes,
            pnl: net_pnl,
            pnl_percent,
            commission,
            reason: reason.to_string(),
            strategy: position.opened_by.clone(),
        };

        inner.closed.push(trade.clone());
        inner.daily_pnl += net_pnl;
        inner.total_pnl += net_pnl;

        info!(
            pair = pair_id,
            pnl = net_pnl,
            pnl_pct = pnl_percent,
            duration_min = duration_minutes,
            reason,
            "position closed"
        );

        Some(trade)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn position(&self, pair_id: &str) -> Option<Position> {
        self.inner.read().open.get(pair_id).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.inner.read().open.values().cloned().collect()
    }

    pub fn position_count(&self) -> usize {
        self.inner.read().open.len()
    }

    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        let inner = self.inner.read();
        let start = inner.closed.len().saturating_sub(limit);
        inner.closed[start..].to_vec()
    }

    pub fn trade_count(&self) -> usize {
        self.inner.read().closed.len()
    }

    pub fn daily_pnl(&self) -> f64 {
        self.inner.read().daily_pnl
    }

    pub fn total_pnl(&self) -> f64 {
        self.inner.read().total_pnl
    }

    // ── Resets ──────────────────────────────────────────────────────────

    /// Reset the daily pnl counter (start of a new trading day).
    pub fn reset_daily_pnl(&self) {
        self.inner.write().daily_pnl = 0.0;
        info!("daily pnl reset");
    }

    /// Wipe every position, trade, and pnl counter.  Called at startup so a
    /// restarted engine always begins flat.
    pub fn clear_all_history(&self) {
        let mut inner = self.inner.write();
        let trades = inner.closed.len();
        let positions = inner.open.len();
        inner.open.clear();
        inner.closed.clear();
        inner.daily_pnl = 0.0;
        inner.total_pnl = 0.0;
        info!(
            cleared_trades = trades,
            cleared_positions = positions,
            "position history cleared"
        );
    }

    // ── Statistics ──────────────────────────────────────────────────────

    pub fn statistics(&self) -> TradeStatistics {
        let inner = self.inner.read();
        if inner.closed.is_empty() {
            return TradeStatistics {
                total_trades: 0,
                winning_trades: 0,
                losing_trades: 0,
                win_rate: 0.0,
                average_pnl: 0.0,
                total_pnl: inner.total_pnl,
                daily_pnl: inner.daily_pnl,
                largest_winner: 0.0,
                largest_loser: 0.0,
            };
        }

        let winning = inner.closed.iter().filter(|t| t.pnl > 0.0).count();
        let total = inner.closed.len();
        let sum_pnl: f64 = inner.closed.iter().map(|t| t.pnl).sum();

        TradeStatistics {
            total_trades: total,
            winning_trades: winning,
            losing_trades: total - winning,
            win_rate: winning as f64 / total as f64,
            average_pnl: sum_pnl / total as f64,
            total_pnl: inner.total_pnl,
            daily_pnl: inner.daily_pnl,
            largest_winner: inner
                .closed
                .iter()
                .map(|t| t.pnl)
                .fold(f64::NEG_INFINITY, f64::max)
                .max(0.0),
            largest_loser: inner
                .closed
                .iter()
                .map(|t| t.pnl)
                .fold(f64::INFINITY, f64::min)
                .min(0.0),
        }
    }
}

/// Session-level trading statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TradeStatistics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub average_pnl: f64,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    pub largest_winner: f64,
    pub largest_loser: f64,
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PositionManager")
            .field("open_positions", &inner.open.len())
            .field("closed_trades", &inner.closed.len())
            .finish()
    }
}

fn leg_pnl(side: PositionSide, entry_price: f64, current_price: f64, qty: f64) -> f64 {
    match side {
        PositionSide::Long => (current_price - entry_price) * qty,
        PositionSide::Short => (entry_price - current_price) * qty,
    }
}
