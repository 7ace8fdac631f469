// =============================================================================
// Orchestrator — turns per-pair market state into executable decisions
// =============================================================================
//
// One evaluation per pair per iteration:
//
//   1. Snapshot price history, orderbooks, and candles (copy-on-read; later
//      market-data updates never mutate an evaluation in flight).
//   2. Run the strategies through the StrategyManager — consensus voting or
//      individual OR mode, per configuration.
//   3. Gate the candidate action through the risk agent; a portfolio-level
//      violation on a pair that holds a position becomes a forced Close.
//   4. Attach sizing (risk agent) and the Engle-Granger diagnostics
//      (z-score, ADF p-value, hedge ratio) to every emitted decision.
//
// Pairs are evaluated concurrently; an error or panic in one pair never
// affects the others.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::execution::Position;
use crate::market_data::{MarketDataManager, PriceHistory};
use crate::monitoring::PerformanceTracker;
use crate::risk::{RiskAgent, RiskVerdict};
use crate::runtime_config::SignalMode;
use crate::strategy::{SignalDiagnostics, StrategyContext, StrategyKind, StrategyManager};
use crate::types::{ConsensusLevel, PairConfig, SpreadAction};

/// Candles handed to the breakout gate per leg.
const BREAKOUT_CANDLE_COUNT: usize = 100;
/// Minimum confidence for a signal to become a decision in OR mode.
const OR_MODE_MIN_CONFIDENCE: f64 = 0.3;

/// Quantitative context attached to a decision for accounting and the
/// dashboard.
#[derive(Debug, Clone, Default)]
pub struct DecisionMetadata {
    pub zscore: f64,
    pub pvalue: f64,
    pub hedge_ratio: f64,
    pub cointegrated: bool,
}

/// An executable instruction for one pair.
#[derive(Debug, Clone)]
pub struct Decision {
    pub pair_id: String,
    pub symbol_a: String,
    pub symbol_b: String,
    pub action: SpreadAction,
    pub confidence: f64,
    pub reason: String,
    pub size_a_usd: f64,
    pub size_b_usd: f64,
    pub hedge_ratio: f64,
    /// Set in OR mode: the strategy that produced this decision.
    pub strategy_name: Option<String>,
    pub metadata: DecisionMetadata,
}

pub struct Orchestrator {
    strategy_manager: Arc<StrategyManager>,
    risk_agent: Arc<RiskAgent>,
    market_data: Arc<MarketDataManager>,
    history: Arc<PriceHistory>,
    performance: Arc<PerformanceTracker>,
    signal_mode: SignalMode,
    pvalue_threshold: f64,
}

impl Orchestrator {
    pub fn new(
        strategy_manager: Arc<StrategyManager>,
        risk_agent: Arc<RiskAgent>,
        market_data: Arc<MarketDataManager>,
        history: Arc<PriceHistory>,
        performance: Arc<PerformanceTracker>,
        signal_mode: SignalMode,
        pvalue_threshold: f64,
    ) -> Self {
        Self {
            strategy_manager,
            risk_agent,
            market_data,
            history,
            performance,
            signal_mode,
            pvalue_threshold,
        }
    }

    /// Evaluate every enabled pair concurrently.
    pub async fn decide_all(
        self: &Arc<Self>,
        pairs: &[PairConfig],
        positions: Vec<Position>,
        account_balance: f64,
        daily_pnl: f64,
    ) -> Vec<Decision> {
        let mut handles = Vec::new();
        for pair in pairs.iter().filter(|p| p.enabled) {
            let orchestrator = Arc::clone(self);
            let pair = pair.clone();
            let positions = positions.clone();
            handles.push(tokio::spawn(async move {
                orchestrator.decide_for_pair(&pair, &positions, account_balance, daily_pnl)
            }));
        }

        let mut decisions = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(pair_decisions) => decisions.extend(pair_decisions),
                Err(e) => error!(error = %e, "pair decision task failed"),
            }
        }
        decisions
    }

    /// Evaluate one pair.  Returns zero decisions (nothing to do), one
    /// (consensus), or several (OR mode).
    pub fn decide_for_pair(
        &self,
        pair: &PairConfig,
        positions: &[Position],
        account_balance: f64,
        daily_pnl: f64,
    ) -> Vec<Decision> {
        let pair_id = pair.pair_id();

        let current_position = positions.iter().find(|p| p.pair_id == pair_id);
        let direction = current_position.map(Position::direction);

        // Copy-on-read snapshots for the whole evaluation.
        let prices_a = self.history.series_pairs(&pair.symbol_a);
        let prices_b = self.history.series_pairs(&pair.symbol_b);
        let orderbook_a = self.market_data.orderbook(&pair.symbol_a);
        let orderbook_b = self.market_data.orderbook(&pair.symbol_b);

        let ctx = StrategyContext {
            pair_id: &pair_id,
            prices_a: &prices_a,
            prices_b: &prices_b,
            orderbook_a: orderbook_a.as_ref(),
            orderbook_b: orderbook_b.as_ref(),
            current_position: direction,
        };

        match self.signal_mode {
            SignalMode::Consensus => self.decide_consensus(
                pair,
                &pair_id,
                &ctx,
                current_position.is_some(),
                positions,
                account_balance,
                daily_pnl,
            ),
            SignalMode::IndividualOr => self.decide_individual(
                pair,
                &pair_id,
                &ctx,
                current_position.is_some(),
                positions,
                account_balance,
                daily_pnl,
            ),
        }
    }

    // ── Consensus mode ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn decide_consensus(
        &self,
        pair: &PairConfig,
        pair_id: &str,
        ctx: &StrategyContext<'_>,
        has_position: bool,
        positions: &[Position],
        account_balance: f64,
        daily_pnl: f64,
    ) -> Vec<Decision> {
        let candles_a = self
            .market_data
            .confirmed_candles(&pair.symbol_a, BREAKOUT_CANDLE_COUNT);
        let candles_b = self
            .market_data
            .confirmed_candles(&pair.symbol_b, BREAKOUT_CANDLE_COUNT);

        let aggregated = self.strategy_manager.aggregate(ctx, &candles_a, &candles_b);
        let metadata = self.extract_metadata(&aggregated.signals);

        // Only act on a Strong or Moderate consensus.
        let actionable = aggregated.action != SpreadAction::Hold
            && matches!(
                aggregated.consensus,
                ConsensusLevel::Strong | ConsensusLevel::Moderate
            );
        let candidate = if actionable {
            aggregated.action
        } else {
            SpreadAction::Hold
        };

        let verdict = self.risk_agent.recommend(
            candidate,
            has_position,
            positions,
            daily_pnl,
            account_balance,
        );

        match verdict {
            RiskVerdict::ForceClose(reason) => {
                return vec![self.close_decision(pair, pair_id, reason, 1.0, None, metadata)];
            }
            RiskVerdict::Pause(reason) | RiskVerdict::Hold(reason) => {
                info!(pair = pair_id, reason = %reason, "decision suppressed by risk agent");
                return Vec::new();
            }
            RiskVerdict::Approve => {}
        }

        if !actionable {
            debug!(
                pair = pair_id,
                action = %aggregated.action,
                consensus = %aggregated.consensus,
                "no actionable consensus"
            );
            return Vec::new();
        }

        let reason = format!(
            "{} consensus from {} strategies: {}",
            aggregated.consensus,
            aggregated.agreeing.len(),
            aggregated
                .agreeing
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        match candidate {
            SpreadAction::Close => {
                if !has_position {
                    return Vec::new();
                }
                vec![self.close_decision(pair, pair_id, reason, aggregated.confidence, None, metadata)]
            }
            action if action.is_entry() => {
                if has_position {
                    debug!(pair = pair_id, "entry suppressed: position already open");
                    return Vec::new();
                }
                let (size_a, size_b) = self.size_entry(pair_id, account_balance, aggregated.confidence);
                info!(
                    pair = pair_id,
                    action = %action,
                    confidence = aggregated.confidence,
                    size_a,
                    size_b,
                    "consensus decision"
                );
                vec![Decision {
                    pair_id: pair_id.to_string(),
                    symbol_a: pair.symbol_a.clone(),
                    symbol_b: pair.symbol_b.clone(),
                    action,
                    confidence: aggregated.confidence,
                    reason,
                    size_a_usd: size_a,
                    size_b_usd: size_b,
                    hedge_ratio: metadata.hedge_ratio,
                    strategy_name: None,
                    metadata,
                }]
            }
            _ => Vec::new(),
        }
    }

    // ── OR mode ─────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn decide_individual(
        &self,
        pair: &PairConfig,
        pair_id: &str,
        ctx: &StrategyContext<'_>,
        has_position: bool,
        positions: &[Position],
        account_balance: f64,
        daily_pnl: f64,
    ) -> Vec<Decision> {
        let signals = self.strategy_manager.evaluate_all(ctx);
        let metadata = self.extract_metadata(&signals);

        let mut decisions = Vec::new();
        for (kind, signal) in signals {
            if signal.action == SpreadAction::Hold || signal.confidence <= OR_MODE_MIN_CONFIDENCE {
                continue;
            }

            let verdict = self.risk_agent.recommend(
                signal.action,
                has_position,
                positions,
                daily_pnl,
                account_balance,
            );

            match verdict {
                RiskVerdict::ForceClose(reason) => {
                    decisions.push(self.close_decision(
                        pair,
                        pair_id,
                        reason,
                        1.0,
                        Some(kind),
                        metadata.clone(),
                    ));
                    // One close per pair is enough.
                    break;
                }
                RiskVerdict::Pause(reason) | RiskVerdict::Hold(reason) => {
                    info!(pair = pair_id, strategy = %kind, reason = %reason, "signal blocked by risk agent");
                    continue;
                }
                RiskVerdict::Approve => {}
            }

            match signal.action {
                SpreadAction::Close => {
                    if has_position {
                        decisions.push(self.close_decision(
                            pair,
                            pair_id,
                            format!("{}: {}", kind.name(), signal.reason),
                            signal.confidence,
                            Some(kind),
                            metadata.clone(),
                        ));
                    }
                }
                action if action.is_entry() => {
                    if has_position {
                        continue;
                    }
                    let (size_a, size_b) =
                        self.size_entry(pair_id, account_balance, signal.confidence);
                    info!(
                        pair = pair_id,
                        strategy = %kind,
                        action = %action,
                        confidence = signal.confidence,
                        "individual strategy decision"
                    );
                    decisions.push(Decision {
                        pair_id: pair_id.to_string(),
                        symbol_a: pair.symbol_a.clone(),
                        symbol_b: pair.symbol_b.clone(),
                        action,
                        confidence: signal.confidence,
                        reason: format!("{}: {}", kind.name(), signal.reason),
                        size_a_usd: size_a,
                        size_b_usd: size_b,
                        hedge_ratio: metadata.hedge_ratio,
                        strategy_name: Some(kind.name().to_string()),
                        metadata: metadata.clone(),
                    });
                }
                _ => {}
            }
        }
        decisions
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn size_entry(&self, pair_id: &str, account_balance: f64, confidence: f64) -> (f64, f64) {
        let stats = self.performance.session_stats();
        self.risk_agent.calculate_position_size(
            pair_id,
            account_balance,
            confidence,
            Some(&stats),
            None,
        )
    }

    fn close_decision(
        &self,
        pair: &PairConfig,
        pair_id: &str,
        reason: String,
        confidence: f64,
        kind: Option<StrategyKind>,
        metadata: DecisionMetadata,
    ) -> Decision {
        Decision {
            pair_id: pair_id.to_string(),
            symbol_a: pair.symbol_a.clone(),
            symbol_b: pair.symbol_b.clone(),
            action: SpreadAction::Close,
            confidence,
            reason,
            size_a_usd: 0.0,
            size_b_usd: 0.0,
            hedge_ratio: metadata.hedge_ratio,
            strategy_name: kind.map(|k| k.name().to_string()),
            metadata,
        }
    }

    /// Pull the Engle-Granger diagnostics out of the evaluation round.
    fn extract_metadata(
        &self,
        signals: &[(StrategyKind, crate::strategy::StrategySignal)],
    ) -> DecisionMetadata {
        let diagnostics: Option<&SignalDiagnostics> = signals
            .iter()
            .find(|(kind, _)| *kind == StrategyKind::EngleGranger)
            .map(|(_, signal)| &signal.diagnostics);

        let Some(diag) = diagnostics else {
            return DecisionMetadata {
                pvalue: 1.0,
                hedge_ratio: 1.0,
                ..Default::default()
            };
        };

        let pvalue = diag.adf_pvalue.unwrap_or(1.0);
        DecisionMetadata {
            zscore: diag.zscore.unwrap_or(0.0),
            pvalue,
            hedge_ratio: diag.hedge_ratio.unwrap_or(1.0),
            cointegrated: pvalue < self.pvalue_threshold,
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("signal_mode", &self.signal_mode)
            .finish()
    }
}
