// =============================================================================
// Trading Engine — the 1-second main loop
// =============================================================================
//
// Each iteration:
//
//   1. Refresh the price history from the market-data caches.
//   2. Update every open position (prices, spread z-score, unrealized pnl)
//      and run the risk agent's exit ladder; fired exits execute immediately.
//   3. Read the account balance (exchange wallet when live, paper balance
//      plus session pnl otherwise).
//   4. Fan the enabled pairs out to the orchestrator and execute every
//      returned decision.
//   5. Export the dashboard snapshot and log session statistics.
//   6. Sleep for the remainder of the second.
//
// An error in one pair or one iteration never terminates the loop; it is
// logged and the engine retries after a back-off.  On shutdown the current
// iteration completes and (when configured) every open position is closed
// best-effort before the loop exits.  The engine always starts flat.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::execution::{Broker, NewPosition, OrderManager, OrderRateLimiter, PositionManager};
use crate::market_data::{MarketDataManager, PriceHistory};
use crate::monitoring::{DashboardSnapshot, PairSnapshot, PerformanceTracker, SnapshotWriter};
use crate::orchestrator::{Decision, Orchestrator};
use crate::risk::{RiskAgent, RiskLimits};
use crate::runtime_config::RuntimeConfig;
use crate::stats;
use crate::strategy::{StrategyKind, StrategyManager};
use crate::types::SpreadAction;

/// Target iteration period.
const ITERATION_PERIOD: tokio::time::Duration = tokio::time::Duration::from_secs(1);
/// Back-off after an iteration-level error.
const ERROR_BACKOFF: tokio::time::Duration = tokio::time::Duration::from_secs(10);

pub struct TradingEngine {
    config: RuntimeConfig,
    broker: Arc<dyn Broker>,
    market_data: Arc<MarketDataManager>,
    history: Arc<PriceHistory>,
    strategy_manager: Arc<StrategyManager>,
    risk_agent: Arc<RiskAgent>,
    position_manager: Arc<PositionManager>,
    order_manager: Arc<OrderManager>,
    orchestrator: Arc<Orchestrator>,
    performance: Arc<PerformanceTracker>,
    snapshot_writer: SnapshotWriter,
    shutdown: watch::Receiver<bool>,
    last_balance: f64,
    pair_snapshots: HashMap<String, PairSnapshot>,
    current_date: String,
}

impl TradingEngine {
    pub fn new(
        config: RuntimeConfig,
        broker: Arc<dyn Broker>,
        market_data: Arc<MarketDataManager>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let history = Arc::new(PriceHistory::new());
        let strategy_manager = Arc::new(StrategyManager::new());
        let risk_agent = Arc::new(RiskAgent::new(RiskLimits::from_config(&config)));
        let position_manager = Arc::new(PositionManager::new());
        let performance = Arc::new(PerformanceTracker::new(config.metrics_path.clone()));
        let rate_limiter = Arc::new(OrderRateLimiter::new());

        let order_manager = Arc::new(OrderManager::new(
            broker.clone(),
            market_data.clone(),
            rate_limiter,
            config.trading_enabled,
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            strategy_manager.clone(),
            risk_agent.clone(),
            market_data.clone(),
            history.clone(),
            performance.clone(),
            config.signal_mode,
            config.cointegration_pvalue_threshold,
        ));

        let snapshot_writer = SnapshotWriter::new(config.snapshot_path.clone());
        let last_balance = config.paper_balance;

        Self {
            config,
            broker,
            market_data,
            history,
            strategy_manager,
            risk_agent,
            position_manager,
            order_manager,
            orchestrator,
            performance,
            snapshot_writer,
            shutdown,
            last_balance,
            pair_snapshots: HashMap::new(),
            current_date: Utc::now().format("%Y-%m-%d").to_string(),
        }
    }

    /// Run until the shutdown flag flips.
    pub async fn run(&mut self) {
        // The engine has no state from previous runs: start flat.
        self.position_manager.clear_all_history();
        info!(
            pairs = self.config.pairs.len(),
            trading_enabled = self.config.trading_enabled,
            signal_mode = %self.config.signal_mode,
            "trading engine starting flat"
        );

        let mut iteration: u64 = 0;
        while !*self.shutdown.borrow() {
            iteration += 1;
            let started = tokio::time::Instant::now();

            if let Err(e) = self.iterate().await {
                error!(iteration, error = %format!("{e:#}"), "iteration failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }

            let remaining = ITERATION_PERIOD.saturating_sub(started.elapsed());
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.changed() => {}
            }
        }

        if self.config.close_on_shutdown {
            info!("shutdown: closing all open positions");
            self.close_all_positions().await;
        }
        info!("trading engine stopped");
    }

    /// One engine iteration.
    async fn iterate(&mut self) -> Result<()> {
        self.maybe_roll_daily();

        let symbols = self.config.symbols();
        let now_ms = Utc::now().timestamp_millis();
        self.history.refresh(&self.market_data, &symbols, now_ms);

        self.update_positions();
        self.run_risk_exits().await;

        let account_balance = self.read_balance().await;
        let daily_pnl = self.position_manager.daily_pnl();

        let decisions = self
            .orchestrator
            .decide_all(
                &self.config.pairs,
                self.position_manager.positions(),
                account_balance,
                daily_pnl,
            )
            .await;

        let actionable = decisions
            .iter()
            .filter(|d| d.action != SpreadAction::Hold)
            .count();
        if actionable > 0 {
            info!(total = decisions.len(), actionable, "decisions received");
        }

        for decision in &decisions {
            self.record_pair_snapshot(decision);
            if let Err(e) = self.execute_decision(decision).await {
                error!(
                    pair = %decision.pair_id,
                    action = %decision.action,
                    error = %format!("{e:#}"),
                    "decision execution failed"
                );
            }
        }

        self.export_snapshot(account_balance);
        Ok(())
    }

    // ── Position upkeep ─────────────────────────────────────────────────

    /// Refresh prices and the spread z-score of every open position.
    fn update_positions(&self) {
        for position in self.position_manager.positions() {
            let Some(price_a) = self.market_data.price(&position.symbol_a) else {
                continue;
            };
            let Some(price_b) = self.market_data.price(&position.symbol_b) else {
                continue;
            };

            // Spread orientation follows the regression: a - beta * b.
            let zscore = self
                .current_zscore(&position.symbol_a, &position.symbol_b, position.hedge_ratio)
                .unwrap_or(position.current_zscore);

            self.position_manager
                .update_position(&position.pair_id, price_a, price_b, zscore);
        }
    }

    fn current_zscore(&self, symbol_a: &str, symbol_b: &str, hedge_ratio: f64) -> Option<f64> {
        let pairs_a = self.history.series_pairs(symbol_a);
        let pairs_b = self.history.series_pairs(symbol_b);
        let (aligned_a, aligned_b) = stats::align_series(&pairs_a, &pairs_b);
        stats::spread_zscore(
            &aligned_a,
            &aligned_b,
            hedge_ratio,
            self.config.cointegration_window,
        )
    }

    /// Ask the risk agent about every open position and close the ones it
    /// flags.
    async fn run_risk_exits(&self) {
        let now = Utc::now();
        let mut exits: Vec<(String, String)> = Vec::new();

        for position in self.position_manager.positions() {
            let fired = self
                .position_manager
                .modify(&position.pair_id, |p| {
                    self.risk_agent.should_close_position(p, now)
                })
                .flatten();
            if let Some(reason) = fired {
                exits.push((position.pair_id.clone(), reason));
            }
        }

        for (pair_id, reason) in exits {
            info!(pair = %pair_id, reason = %reason, "risk exit triggered");
            if let Err(e) = self.close_pair(&pair_id, &reason).await {
                error!(pair = %pair_id, error = %format!("{e:#}"), "risk exit failed");
            }
        }
    }

    /// Reset the daily pnl counter when the UTC date rolls over.
    fn maybe_roll_daily(&mut self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if today != self.current_date {
            info!(old_date = %self.current_date, new_date = %today, "date rolled, resetting daily pnl");
            self.position_manager.reset_daily_pnl();
            self.current_date = today;
        }
    }

    // ── Balance ─────────────────────────────────────────────────────────

    async fn read_balance(&mut self) -> f64 {
        if !self.config.trading_enabled {
            return self.config.paper_balance + self.position_manager.total_pnl();
        }

        match self.broker.wallet_balance().await {
            Ok(balance) => {
                self.last_balance = balance;
                balance
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "balance fetch failed, using last known");
                self.last_balance
            }
        }
    }

    // ── Decision execution ──────────────────────────────────────────────

    async fn execute_decision(&self, decision: &Decision) -> Result<()> {
        match decision.action {
            SpreadAction::Hold => Ok(()),
            SpreadAction::Close => self.close_pair(&decision.pair_id, &decision.reason).await,
            SpreadAction::LongSpread | SpreadAction::ShortSpread => {
                let fill = self
                    .order_manager
                    .execute_pair_entry(
                        &decision.pair_id,
                        &decision.symbol_a,
                        &decision.symbol_b,
                        decision.action,
                        decision.size_a_usd,
                        decision.size_b_usd,
                    )
                    .await?;

                self.position_manager.add_position(NewPosition {
                    pair_id: decision.pair_id.clone(),
                    symbol_a: decision.symbol_a.clone(),
                    symbol_b: decision.symbol_b.clone(),
                    side_a: fill.side_a,
                    side_b: fill.side_b,
                    qty_a: fill.qty_a,
                    qty_b: fill.qty_b,
                    entry_price_a: fill.entry_price_a,
                    entry_price_b: fill.entry_price_b,
                    hedge_ratio: decision.hedge_ratio,
                    entry_zscore: decision.metadata.zscore,
                    opened_by: decision.strategy_name.clone(),
                });
                Ok(())
            }
        }
    }

    /// Exit both legs of an open position and settle the accounting.
    async fn close_pair(&self, pair_id: &str, reason: &str) -> Result<()> {
        let Some(position) = self.position_manager.position(pair_id) else {
            return Ok(());
        };

        let fill = self
            .order_manager
            .execute_pair_exit(
                pair_id,
                &position.symbol_a,
                &position.symbol_b,
                position.side_a,
                position.side_b,
                position.qty_a,
                position.qty_b,
            )
            .await?;

        let Some(trade) = self.position_manager.close_position(
            pair_id,
            fill.exit_price_a,
            fill.exit_price_b,
            position.current_zscore,
            reason,
        ) else {
            return Ok(());
        };

        self.performance.log_trade(&trade);
        if let Some(kind) = trade.strategy.as_deref().and_then(StrategyKind::from_name) {
            self.strategy_manager.record_trade_result(kind, trade.pnl);
        }
        Ok(())
    }

    /// Best-effort close of everything (shutdown path).
    async fn close_all_positions(&self) {
        for position in self.position_manager.positions() {
            if let Err(e) = self.close_pair(&position.pair_id, "System shutdown").await {
                error!(
                    pair = %position.pair_id,
                    error = %format!("{e:#}"),
                    "failed to close position on shutdown"
                );
            }
        }
    }

    // ── Observability ───────────────────────────────────────────────────

    fn record_pair_snapshot(&mut self, decision: &Decision) {
        self.pair_snapshots.insert(
            decision.pair_id.clone(),
            PairSnapshot {
                zscore: decision.metadata.zscore,
                pvalue: decision.metadata.pvalue,
                hedge_ratio: decision.metadata.hedge_ratio,
                signal: decision.action.to_string(),
                confidence: decision.confidence,
                position_size_a: decision.size_a_usd,
                position_size_b: decision.size_b_usd,
                current_price_a: self.market_data.price(&decision.symbol_a).unwrap_or(0.0),
                current_price_b: self.market_data.price(&decision.symbol_b).unwrap_or(0.0),
                strategy: decision.strategy_name.clone(),
            },
        );
    }

    fn export_snapshot(&mut self, account_balance: f64) {
        // Refresh live prices on every tracked pair's snapshot.
        for pair in &self.config.pairs {
            let entry = self
                .pair_snapshots
                .entry(pair.pair_id())
                .or_default();
            entry.current_price_a = self.market_data.price(&pair.symbol_a).unwrap_or(0.0);
            entry.current_price_b = self.market_data.price(&pair.symbol_b).unwrap_or(0.0);
        }

        let stats = self.position_manager.statistics();
        let exposure: f64 = self
            .position_manager
            .positions()
            .iter()
            .map(|p| p.current_notional())
            .sum();

        let snapshot = DashboardSnapshot {
            account_balance,
            available_balance: (account_balance - exposure).max(0.0),
            total_pnl: stats.total_pnl,
            daily_pnl: stats.daily_pnl,
            win_rate: stats.win_rate,
            total_trades: stats.total_trades,
            pairs: self.pair_snapshots.clone(),
            updated_at: Utc::now().to_rfc3339(),
        };

        // Best effort: the dashboard keeps the last successful snapshot.
        if let Err(e) = self.snapshot_writer.write(&snapshot) {
            warn!(error = %format!("{e:#}"), "snapshot export failed");
        }

        info!(
            trades = stats.total_trades,
            win_rate = format!("{:.1}%", stats.win_rate * 100.0),
            total_pnl = stats.total_pnl,
            daily_pnl = stats.daily_pnl,
            open_positions = self.position_manager.position_count(),
            "session stats"
        );
    }
}

impl std::fmt::Debug for TradingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingEngine")
            .field("pairs", &self.config.pairs.len())
            .field("trading_enabled", &self.config.trading_enabled)
            .finish()
    }
}

// =============================================================================
// Tests — paper-mode end-to-end through one engine iteration
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::mock::MockBroker;
    use crate::market_data::OrderBookUpdate;
    use crate::runtime_config::SignalMode;
    use crate::types::PairConfig;
    use chrono::Duration;

    fn test_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.trading_enabled = false;
        config.signal_mode = SignalMode::IndividualOr;
        config.pairs = vec![PairConfig::new("BTCUSDT", "ETHUSDT")];
        config.snapshot_path = std::env::temp_dir()
            .join(format!("meridian-engine-snap-{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        config.metrics_path = std::env::temp_dir()
            .join(format!("meridian-engine-metrics-{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        config
    }

    fn engine_with(config: RuntimeConfig) -> (TradingEngine, Arc<MarketDataManager>) {
        let market_data = Arc::new(MarketDataManager::new());
        let (_tx, rx) = watch::channel(false);
        let engine = TradingEngine::new(
            config,
            Arc::new(MockBroker::new()),
            market_data.clone(),
            rx,
        );
        (engine, market_data)
    }

    fn prime_entry_conditions(market_data: &MarketDataManager) {
        market_data.apply_ticker("BTCUSDT", Some(60_000.0), None);
        market_data.apply_ticker("ETHUSDT", Some(3_000.0), None);
        // Heavy bid pressure drives the OBI strategy long; the mid stays at
        // 60 000.
        market_data.apply_orderbook(OrderBookUpdate {
            symbol: "BTCUSDT".into(),
            is_snapshot: true,
            bids: vec![(59_990.0, 50.0)],
            asks: vec![(60_010.0, 1.0)],
        });
    }

    #[tokio::test]
    async fn paper_iteration_opens_a_position_from_a_signal() {
        let (mut engine, market_data) = engine_with(test_config());
        prime_entry_conditions(&market_data);

        engine.iterate().await.unwrap();

        assert_eq!(engine.position_manager.position_count(), 1);
        let position = engine.position_manager.position("BTCUSDT_ETHUSDT").unwrap();
        assert_ne!(position.side_a, position.side_b);
        assert!(position.qty_a > 0.0 && position.qty_b > 0.0);
        assert_eq!(position.opened_by.as_deref(), Some("orderbook_imbalance"));

        // The snapshot file reflects the decision.
        let content = std::fs::read_to_string(&engine.config.snapshot_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["pairs"]["BTCUSDT_ETHUSDT"]["signal"], "LONG_SPREAD");

        let _ = std::fs::remove_file(&engine.config.snapshot_path);
    }

    #[tokio::test]
    async fn risk_exit_closes_an_aged_profitable_position() {
        let (mut engine, market_data) = engine_with(test_config());
        prime_entry_conditions(&market_data);
        engine.iterate().await.unwrap();
        assert_eq!(engine.position_manager.position_count(), 1);

        // Age the position past min-hold and push leg A up ~1%.
        engine.position_manager.modify("BTCUSDT_ETHUSDT", |p| {
            p.entry_time = Utc::now() - Duration::seconds(60);
        });
        market_data.apply_ticker("BTCUSDT", Some(60_600.0), None);

        engine.iterate().await.unwrap();

        // The quick-profit rung fired and the trade settled.
        let stats = engine.position_manager.statistics();
        assert!(stats.total_trades >= 1, "expected a closed trade");
        let trades = engine.position_manager.recent_trades(10);
        assert!(trades[0].reason.starts_with("Quick profit"));
        assert!(trades[0].pnl > 0.0);

        let _ = std::fs::remove_file(&engine.config.snapshot_path);
        let _ = std::fs::remove_file(&engine.config.metrics_path);
    }

    #[tokio::test]
    async fn close_all_positions_on_shutdown() {
        let (mut engine, market_data) = engine_with(test_config());
        prime_entry_conditions(&market_data);
        engine.iterate().await.unwrap();
        assert_eq!(engine.position_manager.position_count(), 1);

        engine.close_all_positions().await;
        assert_eq!(engine.position_manager.position_count(), 0);
        let trades = engine.position_manager.recent_trades(10);
        assert_eq!(trades[0].reason, "System shutdown");

        let _ = std::fs::remove_file(&engine.config.snapshot_path);
        let _ = std::fs::remove_file(&engine.config.metrics_path);
    }

    #[tokio::test]
    async fn iteration_survives_missing_market_data() {
        let (mut engine, _market_data) = engine_with(test_config());
        // No prices at all: the iteration must still succeed.
        engine.iterate().await.unwrap();
        assert_eq!(engine.position_manager.position_count(), 0);
        let _ = std::fs::remove_file(&engine.config.snapshot_path);
    }

    #[tokio::test]
    async fn paper_balance_tracks_session_pnl() {
        let (mut engine, market_data) = engine_with(test_config());
        prime_entry_conditions(&market_data);

        let balance = engine.read_balance().await;
        assert!((balance - 10_000.0).abs() < 1e-9);

        // A realized profit raises the paper balance.
        engine.iterate().await.unwrap();
        engine.position_manager.modify("BTCUSDT_ETHUSDT", |p| {
            p.entry_time = Utc::now() - Duration::seconds(60);
        });
        market_data.apply_ticker("BTCUSDT", Some(60_600.0), None);
        engine.iterate().await.unwrap();

        let balance = engine.read_balance().await;
        assert!(
            (balance - 10_000.0 - engine.position_manager.total_pnl()).abs() < 1e-9
        );

        let _ = std::fs::remove_file(&engine.config.snapshot_path);
        let _ = std::fs::remove_file(&engine.config.metrics_path);
    }
}
