// =============================================================================
// Strategy Manager — weighted voting across the four strategies
// =============================================================================
//
// Consensus mode reduces the per-strategy signals into one decision per pair.
// `Hold` votes are abstentions: a lone actionable signal is not drowned out
// by three strategies that simply have nothing to say.  Opposing entries
// with comparable weighted strength are a conflict and force `Hold`.
//
// OR mode skips the reducer entirely and forwards every actionable signal
// (non-Hold, confidence > 0.3) for independent execution.
//
// A volume + ATR breakout on either leg upgrades a consensus decision:
// confidence x1.2 (capped at 1.0) and the consensus label becomes Strong.
//
// Weights start at the static defaults and may adapt once a strategy has 10
// recorded trades: weight = 0.3 + 0.4 * win_rate, renormalized to sum 1.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::indicators::atr::calculate_atr;
use crate::market_data::Candle;
use crate::stats;
use crate::types::{ConsensusLevel, SpreadAction};

use super::correlation_rsi::CorrelationRsiStrategy;
use super::engle_granger::EngleGrangerStrategy;
use super::mean_reversion::MeanReversionStrategy;
use super::orderbook_imbalance::OrderBookImbalanceStrategy;
use super::signal::{StrategyKind, StrategySignal};
use super::{SpreadStrategy, StrategyContext};

/// Trades required before a strategy's weight adapts to its win rate.
const ADAPT_MIN_TRADES: u64 = 10;
/// Opposing entries within this strength ratio are a conflict.
const CONFLICT_RATIO: f64 = 0.8;

/// Volume surge factor for the breakout gate.
const BREAKOUT_VOLUME_FACTOR: f64 = 2.0;
/// Range expansion factor for the breakout gate.
const BREAKOUT_RANGE_FACTOR: f64 = 1.5;
const BREAKOUT_ATR_PERIOD: usize = 14;
const BREAKOUT_VOLUME_PERIOD: usize = 20;

/// Aggregated (consensus-mode) output for one pair.
#[derive(Debug)]
pub struct AggregatedSignal {
    pub action: SpreadAction,
    pub confidence: f64,
    pub consensus: ConsensusLevel,
    /// Strategies that voted the winning action.
    pub agreeing: Vec<StrategyKind>,
    /// Every strategy's raw signal, for diagnostics and OR mode.
    pub signals: Vec<(StrategyKind, StrategySignal)>,
}

#[derive(Debug, Clone, Copy, Default)]
struct PerfRecord {
    trades: u64,
    wins: u64,
    pnl: f64,
}

impl PerfRecord {
    fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }
}

pub struct StrategyManager {
    strategies: Vec<Box<dyn SpreadStrategy>>,
    weights: Mutex<HashMap<StrategyKind, f64>>,
    performance: Mutex<HashMap<StrategyKind, PerfRecord>>,
}

impl StrategyManager {
    pub fn new() -> Self {
        let strategies: Vec<Box<dyn SpreadStrategy>> = vec![
            Box::new(EngleGrangerStrategy::new()),
            Box::new(OrderBookImbalanceStrategy::new()),
            Box::new(CorrelationRsiStrategy::new()),
            Box::new(MeanReversionStrategy::new()),
        ];
        let weights = strategies
            .iter()
            .map(|s| (s.kind(), s.kind().default_weight()))
            .collect();
        Self {
            strategies,
            weights: Mutex::new(weights),
            performance: Mutex::new(HashMap::new()),
        }
    }

    /// Run every strategy against the context.
    pub fn evaluate_all(&self, ctx: &StrategyContext<'_>) -> Vec<(StrategyKind, StrategySignal)> {
        self.strategies
            .iter()
            .map(|s| (s.kind(), s.signal(ctx)))
            .collect()
    }

    pub fn weight_of(&self, kind: StrategyKind) -> f64 {
        self.weights
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_weight())
    }

    // ── Consensus mode ──────────────────────────────────────────────────

    /// Reduce all strategy signals into one aggregated decision, applying
    /// the breakout multiplier when kline data shows a volume + range surge.
    pub fn aggregate(
        &self,
        ctx: &StrategyContext<'_>,
        candles_a: &[Candle],
        candles_b: &[Candle],
    ) -> AggregatedSignal {
        let signals = self.evaluate_all(ctx);
        let mut aggregated = self.reduce(ctx.pair_id, signals);

        if aggregated.action != SpreadAction::Hold
            && (Self::check_breakout(candles_a) || Self::check_breakout(candles_b))
        {
            aggregated.confidence = (aggregated.confidence * 1.2).min(1.0);
            aggregated.consensus = ConsensusLevel::Strong;
            info!(
                pair = ctx.pair_id,
                confidence = aggregated.confidence,
                "breakout detected, consensus upgraded"
            );
        }

        aggregated
    }

    fn reduce(
        &self,
        pair_id: &str,
        signals: Vec<(StrategyKind, StrategySignal)>,
    ) -> AggregatedSignal {
        struct Bucket {
            count: usize,
            weighted_confidence: f64,
            strategies: Vec<StrategyKind>,
        }

        let weights = self.weights.lock().clone();
        let total_weight: f64 = weights.values().sum();

        // Hold votes abstain; everything else lands in its action bucket.
        let mut buckets: HashMap<SpreadAction, Bucket> = HashMap::new();
        for (kind, signal) in &signals {
            if signal.action == SpreadAction::Hold {
                continue;
            }
            let weight = weights.get(kind).copied().unwrap_or(0.0);
            let bucket = buckets.entry(signal.action).or_insert(Bucket {
                count: 0,
                weighted_confidence: 0.0,
                strategies: Vec::new(),
            });
            bucket.count += 1;
            bucket.weighted_confidence += weight * signal.confidence;
            bucket.strategies.push(*kind);
        }

        if buckets.is_empty() {
            return AggregatedSignal {
                action: SpreadAction::Hold,
                confidence: 0.0,
                consensus: ConsensusLevel::None,
                agreeing: Vec::new(),
                signals,
            };
        }

        // Opposing entries with comparable strength conflict and force Hold.
        if let (Some(long), Some(short)) = (
            buckets.get(&SpreadAction::LongSpread),
            buckets.get(&SpreadAction::ShortSpread),
        ) {
            let lo = long.weighted_confidence.min(short.weighted_confidence);
            let hi = long.weighted_confidence.max(short.weighted_confidence);
            if hi <= 0.0 || lo / hi >= CONFLICT_RATIO {
                debug!(pair = pair_id, "conflicting entry votes, forcing HOLD");
                return AggregatedSignal {
                    action: SpreadAction::Hold,
                    confidence: 0.0,
                    consensus: ConsensusLevel::Conflicting,
                    agreeing: Vec::new(),
                    signals,
                };
            }
        }

        let (action, bucket) = buckets
            .into_iter()
            .max_by(|(_, a), (_, b)| {
                (a.count, a.weighted_confidence)
                    .partial_cmp(&(b.count, b.weighted_confidence))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("buckets verified non-empty");

        let consensus = if bucket.count == self.strategies.len() {
            ConsensusLevel::Strong
        } else if bucket.count * 2 >= self.strategies.len() || bucket.weighted_confidence > 0.7 {
            ConsensusLevel::Moderate
        } else {
            ConsensusLevel::Weak
        };

        let confidence = if total_weight > 0.0 {
            bucket.weighted_confidence / total_weight
        } else {
            0.0
        };

        debug!(
            pair = pair_id,
            action = %action,
            confidence,
            consensus = %consensus,
            votes = bucket.count,
            "signals aggregated"
        );

        AggregatedSignal {
            action,
            confidence,
            consensus,
            agreeing: bucket.strategies,
            signals,
        }
    }

    // ── Breakout gate ───────────────────────────────────────────────────

    /// Volume surge plus range expansion on the most recent bar.
    fn check_breakout(candles: &[Candle]) -> bool {
        if candles.len() < BREAKOUT_VOLUME_PERIOD + 1 {
            return false;
        }
        let Some(atr) = calculate_atr(candles, BREAKOUT_ATR_PERIOD) else {
            return false;
        };
        let Some(last) = candles.last() else {
            return false;
        };

        let volumes: Vec<f64> = candles
            .iter()
            .rev()
            .take(BREAKOUT_VOLUME_PERIOD)
            .map(|c| c.volume)
            .collect();
        let Some(avg_volume) = stats::mean(&volumes) else {
            return false;
        };

        let volume_surge = last.volume > avg_volume * BREAKOUT_VOLUME_FACTOR;
        let range_expansion = (last.high - last.low) > atr * BREAKOUT_RANGE_FACTOR;
        volume_surge && range_expansion
    }

    // ── Performance feedback ────────────────────────────────────────────

    /// Record a closed trade attributed to `kind` and adapt weights.
    pub fn record_trade_result(&self, kind: StrategyKind, pnl: f64) {
        {
            let mut perf = self.performance.lock();
            let record = perf.entry(kind).or_default();
            record.trades += 1;
            record.pnl += pnl;
            if pnl > 0.0 {
                record.wins += 1;
            }
        }
        self.adapt_weights();
    }

    /// Remap weights of seasoned strategies into [0.3, 0.7] by win rate,
    /// then renormalize everything to sum 1.
    fn adapt_weights(&self) {
        let perf = self.performance.lock();
        let mut weights = self.weights.lock();

        for (kind, record) in perf.iter() {
            if record.trades >= ADAPT_MIN_TRADES {
                weights.insert(*kind, 0.3 + 0.4 * record.win_rate());
            }
        }

        let total: f64 = weights.values().sum();
        if total > 0.0 {
            for value in weights.values_mut() {
                *value /= total;
            }
        }
    }

}

impl Default for StrategyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StrategyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyManager")
            .field("strategies", &self.strategies.len())
            .field("weights", &*self.weights.lock())
            .finish()
    }
}
