// =============================================================================
// Risk Agent — position sizing, exposure limits, per-position exit rules
// =============================================================================
//
// Gatekeeper between the signal pipeline and the order manager:
//
//   - Sizing: base notional scaled by signal confidence, session win rate
//     (>= 5 trades), and an optional volatility damp; capped by the per-trade
//     risk budget and by 20% of the balance; floored at $500 so orders clear
//     exchange minimums.  Both legs get equal USD notional.
//   - Pre-trade limits: concurrent-position count, daily loss, 80% gross
//     exposure, 20% drawdown from tracked peak equity.
//   - Per-position exit ladder, checked once per iteration, in order:
//     emergency dollar stop (ignores min hold), 30 s minimum hold, quick
//     profit, break-even after 120 s, trailing stop, hard percentage stop,
//     z-score stop / mean-reversion exit, maximum holding time.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::execution::Position;
use crate::monitoring::SessionStats;
use crate::runtime_config::RuntimeConfig;
use crate::types::SpreadAction;

/// Gross exposure cap as a fraction of the balance.
const MAX_EXPOSURE_FRACTION: f64 = 0.8;
/// Drawdown limit from peak equity.
const MAX_DRAWDOWN: f64 = 0.20;
/// Sizing floor so orders clear exchange minimums.
const MIN_POSITION_SIZE_USD: f64 = 500.0;
/// Per-position cap as a fraction of the balance.
const MAX_BALANCE_FRACTION: f64 = 0.2;

/// Outcome of the pre-trade risk gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    Approve,
    /// Entry suppressed (e.g. position slots full); existing positions keep.
    Hold(String),
    /// Risk violation with no position on the evaluated pair.
    Pause(String),
    /// Risk violation while the evaluated pair holds a position.
    ForceClose(String),
}

/// Exit-ladder thresholds.  Defaults match the production ladder; tests
/// override individual rungs to reach the deeper rules.
#[derive(Debug, Clone)]
pub struct ExitRules {
    /// Always-on dollar stop; ignores the minimum holding time.
    pub emergency_stop_usd: f64,
    pub min_hold_secs: i64,
    /// Quick-profit take, percent of leg-A notional.
    pub quick_profit_pct: f64,
    /// Break-even exit once held this long.
    pub breakeven_secs: i64,
    pub trail_activation_pct: f64,
    pub trail_distance_pct: f64,
    pub hard_stop_pct: f64,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            emergency_stop_usd: -100.0,
            min_hold_secs: 30,
            quick_profit_pct: 0.2,
            breakeven_secs: 120,
            trail_activation_pct: 0.3,
            trail_distance_pct: 0.15,
            hard_stop_pct: -0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_position_size: f64,
    pub max_concurrent_pairs: usize,
    pub daily_loss_limit: f64,
    pub risk_per_trade: f64,
    pub zscore_exit_threshold: f64,
    pub zscore_stoploss_threshold: f64,
    pub max_holding_hours: f64,
    pub exit_rules: ExitRules,
}

impl RiskLimits {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            max_position_size: config.max_position_size,
            max_concurrent_pairs: config.max_concurrent_pairs,
            daily_loss_limit: config.daily_loss_limit,
            risk_per_trade: config.risk_per_trade,
            zscore_exit_threshold: config.zscore_exit_threshold,
            zscore_stoploss_threshold: config.zscore_stoploss_threshold,
            max_holding_hours: config.max_holding_hours,
            exit_rules: ExitRules::default(),
        }
    }
}

struct Inner {
    max_equity: f64,
    current_drawdown: f64,
}

pub struct RiskAgent {
    limits: RiskLimits,
    state: RwLock<Inner>,
}

impl RiskAgent {
    pub fn new(limits: RiskLimits) -> Self {
        info!(
            max_position_size = limits.max_position_size,
            max_concurrent_pairs = limits.max_concurrent_pairs,
            daily_loss_limit = limits.daily_loss_limit,
            risk_per_trade = limits.risk_per_trade,
            "RiskAgent initialised"
        );
        Self {
            limits,
            state: RwLock::new(Inner {
                max_equity: 0.0,
                current_drawdown: 0.0,
            }),
        }
    }

    // ── Position sizing ─────────────────────────────────────────────────

    /// USD notional for each leg of a new position.
    ///
    /// Monotonic non-decreasing in `confidence`, holding the other inputs
    /// fixed.
    pub fn calculate_position_size(
        &self,
        pair_id: &str,
        account_balance: f64,
        confidence: f64,
        session: Option<&SessionStats>,
        volatility: Option<f64>,
    ) -> (f64, f64) {
        let mut base = self.limits.max_position_size;

        // Performance feedback, gated on a minimum sample.
        if let Some(stats) = session {
            if stats.total_trades >= 5 {
                if stats.win_rate >= 0.60 {
                    base *= 2.0;
                    info!(pair = pair_id, win_rate = stats.win_rate, "hot streak, doubling base size");
                } else if stats.win_rate >= 0.55 {
                    base *= 1.5;
                    info!(pair = pair_id, win_rate = stats.win_rate, "good win rate, size +50%");
                }
            }
        }

        let confidence_multiplier = 0.5 + 0.5 * confidence.clamp(0.0, 1.0);

        let vol_multiplier = match volatility {
            Some(v) if v > 0.5 => (0.5 / v).min(1.0),
            _ => 1.0,
        };

        let risk_amount = account_balance * self.limits.risk_per_trade;

        let size = (base * confidence_multiplier * vol_multiplier)
            .min(risk_amount * 10.0)
            .min(account_balance * MAX_BALANCE_FRACTION)
            .max(MIN_POSITION_SIZE_USD);

        debug!(
            pair = pair_id,
            size,
            confidence,
            vol_multiplier,
            "position size calculated"
        );

        (size, size)
    }

    // ── Pre-trade limits ────────────────────────────────────────────────

    /// Check every portfolio-level limit.  Returns `(true, [])` when safe.
    pub fn check_risk_limits(
        &self,
        positions: &[Position],
        daily_pnl: f64,
        account_balance: f64,
    ) -> (bool, Vec<String>) {
        let mut violations = Vec::new();

        if positions.len() >= self.limits.max_concurrent_pairs {
            violations.push(format!(
                "Max concurrent positions reached: {}",
                positions.len()
            ));
        }

        if daily_pnl < -self.limits.daily_loss_limit {
            violations.push(format!("Daily loss limit exceeded: ${daily_pnl:.2}"));
        }

        let total_exposure: f64 = positions.iter().map(Position::current_notional).sum();
        let max_exposure = account_balance * MAX_EXPOSURE_FRACTION;
        if total_exposure > max_exposure {
            violations.push(format!(
                "Total exposure too high: ${total_exposure:.2} > ${max_exposure:.2}"
            ));
        }

        let drawdown = self.update_drawdown(account_balance);
        if drawdown > MAX_DRAWDOWN {
            violations.push(format!("High drawdown: {:.1}%", drawdown * 100.0));
        }

        let is_safe = violations.is_empty();
        if !is_safe {
            warn!(violations = ?violations, "risk limits violated");
        }
        (is_safe, violations)
    }

    /// Gate a proposed action for one pair.
    pub fn recommend(
        &self,
        action: SpreadAction,
        pair_has_position: bool,
        positions: &[Position],
        daily_pnl: f64,
        account_balance: f64,
    ) -> RiskVerdict {
        let (is_safe, violations) = self.check_risk_limits(positions, daily_pnl, account_balance);

        if !is_safe {
            if pair_has_position {
                return RiskVerdict::ForceClose(format!(
                    "Risk violations: {}",
                    violations.join("; ")
                ));
            }
            // A full position book alone only suppresses new entries; any
            // other violation pauses the pair outright.
            let slots_full_only = violations.len() == 1
                && positions.len() >= self.limits.max_concurrent_pairs;
            if slots_full_only && action.is_entry() {
                return RiskVerdict::Hold("Max positions reached".to_string());
            }
            return RiskVerdict::Pause(format!("Risk violations: {}", violations.join("; ")));
        }

        RiskVerdict::Approve
    }

    // ── Per-position exits ──────────────────────────────────────────────

    /// Walk the exit ladder for one open position.  Returns the close reason
    /// when any rung fires.  Mutates the trailing-stop peak on the position.
    pub fn should_close_position(
        &self,
        position: &mut Position,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let rules = &self.limits.exit_rules;
        let held_secs = (now - position.entry_time).num_seconds();

        // 1. Emergency dollar stop, active from the first tick.
        if position.unrealized_pnl < rules.emergency_stop_usd {
            return Some(format!(
                "Emergency stop loss: ${:.2}",
                position.unrealized_pnl
            ));
        }

        // 2. Minimum holding time for every other exit.
        if held_secs < rules.min_hold_secs {
            return None;
        }

        let leg_a_notional = position.qty_a * position.entry_price_a;
        let pnl_pct = if leg_a_notional > 0.0 {
            position.unrealized_pnl / leg_a_notional * 100.0
        } else {
            0.0
        };

        // 3. Quick profit.
        if pnl_pct >= rules.quick_profit_pct {
            return Some(format!("Quick profit: {pnl_pct:.2}% (held {held_secs}s)"));
        }

        // 4. Break-even after a stale hold.
        if pnl_pct >= 0.0 && held_secs >= rules.breakeven_secs {
            return Some(format!("Breakeven exit after {held_secs}s"));
        }

        // 5. Trailing stop once activated.
        if pnl_pct >= rules.trail_activation_pct {
            let peak = position.max_profit_pct.map_or(pnl_pct, |m| m.max(pnl_pct));
            position.max_profit_pct = Some(peak);
            if pnl_pct < peak - rules.trail_distance_pct {
                return Some(format!(
                    "Trailing stop: {pnl_pct:.2}% (peak {peak:.2}%)"
                ));
            }
        }

        // 6. Hard percentage stop.
        if pnl_pct <= rules.hard_stop_pct {
            return Some(format!("P&L stop-loss: {pnl_pct:.2}%"));
        }

        // 7. Z-score stop and mean-reversion exit.
        let z = position.current_zscore;
        if z.abs() > self.limits.zscore_stoploss_threshold {
            return Some(format!("Stop-loss: z-score {z:.2}"));
        }
        if z.abs() < self.limits.zscore_exit_threshold {
            return Some(format!("Mean reversion: z-score {z:.2}"));
        }

        // 8. Maximum holding time.
        let held_hours = held_secs as f64 / 3600.0;
        if held_hours > self.limits.max_holding_hours {
            return Some(format!(
                "Max holding period exceeded: {held_hours:.1} hours"
            ));
        }

        None
    }

    // ── Drawdown ────────────────────────────────────────────────────────

    /// Track peak equity and return the current drawdown fraction.
    fn update_drawdown(&self, current_equity: f64) -> f64 {
        let mut state = self.state.write();
        if current_equity > state.max_equity {
            state.max_equity = current_equity;
        }
        state.current_drawdown = if state.max_equity > 0.0 {
            (state.max_equity - current_equity) / state.max_equity
        } else {
            0.0
        };
        state.current_drawdown
    }

    pub fn current_drawdown(&self) -> f64 {
        self.state.read().current_drawdown
    }

    pub fn max_equity(&self) -> f64 {
        self.state.read().max_equity
    }
}

impl std::fmt::Debug for RiskAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskAgent")
            .field("limits", &self.limits)
            .field("current_drawdown", &self.current_drawdown())
            .finish()
    }
}
