// =============================================================================
// Performance Tracker — rolling per-trade metrics with strategy breakdown
// =============================================================================
//
// Every closed trade is appended to an in-memory ledger and the whole metrics
// document is rewritten to `performance_metrics.json` (atomic tmp + rename).
// The file format is consumed by external tooling:
//
//   { "session_start": "...", "trades": [...], "strategy_performance": {...} }
//
// Persistence is best-effort: a failed write logs an error and trading
// continues.  The session stats feed the risk agent's dynamic sizing.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::execution::Trade;

/// Label used when a trade was opened by the consensus vote rather than a
/// single strategy.
const CONSENSUS_LABEL: &str = "consensus";

#[derive(Debug, Clone, Serialize)]
struct TradeLogEntry {
    timestamp: String,
    pair_id: String,
    pnl: f64,
    pnl_percent: f64,
    duration_minutes: f64,
    strategy: String,
    entry_price_a: f64,
    exit_price_a: f64,
    commission: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
struct StrategyPerformance {
    total_trades: u64,
    wins: u64,
    losses: u64,
    total_pnl: f64,
    avg_pnl: f64,
    win_rate: f64,
}

#[derive(Debug, Serialize)]
struct Metrics {
    session_start: String,
    trades: Vec<TradeLogEntry>,
    strategy_performance: HashMap<String, StrategyPerformance>,
}

/// Aggregate statistics for the running session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
}

pub struct PerformanceTracker {
    path: PathBuf,
    metrics: Mutex<Metrics>,
}

impl PerformanceTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metrics: Mutex::new(Metrics {
                session_start: Utc::now().to_rfc3339(),
                trades: Vec::new(),
                strategy_performance: HashMap::new(),
            }),
        }
    }

    /// Record a closed trade and rewrite the metrics file.
    pub fn log_trade(&self, trade: &Trade) {
        let strategy = trade
            .strategy
            .clone()
            .unwrap_or_else(|| CONSENSUS_LABEL.to_string());

        {
            let mut metrics = self.metrics.lock();
            metrics.trades.push(TradeLogEntry {
                timestamp: Utc::now().to_rfc3339(),
                pair_id: trade.pair_id.clone(),
                pnl: trade.pnl,
                pnl_percent: trade.pnl_percent,
                duration_minutes: trade.duration_minutes,
                strategy: strategy.clone(),
                entry_price_a: trade.entry_price_a,
                exit_price_a: trade.exit_price_a,
                commission: trade.commission,
            });

            let perf = metrics
                .strategy_performance
                .entry(strategy)
                .or_default();
            perf.total_trades += 1;
            perf.total_pnl += trade.pnl;
            if trade.pnl > 0.0 {
                perf.wins += 1;
            } else {
                perf.losses += 1;
            }
            perf.avg_pnl = perf.total_pnl / perf.total_trades as f64;
            perf.win_rate = perf.wins as f64 / perf.total_trades as f64;
        }

        info!(
            pair = %trade.pair_id,
            pnl = trade.pnl,
            "trade logged to performance tracker"
        );
        self.save();
    }

    /// Aggregate session statistics from the trade ledger.
    pub fn session_stats(&self) -> SessionStats {
        let metrics = self.metrics.lock();
        let trades = &metrics.trades;
        if trades.is_empty() {
            return SessionStats::default();
        }

        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let wins: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p <= 0.0).collect();

        let win_rate = wins.len() as f64 / trades.len() as f64;
        let avg_pnl = total_pnl / trades.len() as f64;

        let sharpe_ratio = if trades.len() > 1 {
            let returns: Vec<f64> = trades.iter().map(|t| t.pnl_percent).collect();
            let mean = returns.iter().sum::<f64>() / returns.len() as f64;
            let variance =
                returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
            let std = variance.sqrt();
            if std > 0.0 {
                mean / std
            } else {
                0.0
            }
        } else {
            0.0
        };

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        };

        SessionStats {
            total_trades: trades.len(),
            win_rate,
            total_pnl,
            avg_pnl,
            sharpe_ratio,
            profit_factor,
            gross_profit,
            gross_loss,
        }
    }

    /// Best-effort atomic rewrite of the metrics file.
    fn save(&self) {
        let content = {
            let metrics = self.metrics.lock();
            match serde_json::to_string_pretty(&*metrics) {
                Ok(content) => content,
                Err(e) => {
                    error!(error = %e, "failed to serialise performance metrics");
                    return;
                }
            }
        };

        if let Err(e) = write_atomic(&self.path, &content) {
            error!(path = %self.path.display(), error = %e, "failed to write performance metrics");
        }
    }
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)
}

impl std::fmt::Debug for PerformanceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceTracker")
            .field("path", &self.path)
            .field("trades", &self.metrics.lock().trades.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;
    use chrono::Utc;

    fn tmp_metrics_path() -> PathBuf {
        std::env::temp_dir().join(format!("meridian-metrics-{}.json", uuid::Uuid::new_v4()))
    }

    fn trade(pnl: f64, pnl_percent: f64, strategy: Option<&str>) -> Trade {
        let now = Utc::now();
        Trade {
            pair_id: "BTCUSDT_ETHUSDT".into(),
            symbol_a: "BTCUSDT".into(),
            symbol_b: "ETHUSDT".into(),
            side_a: PositionSide::Long,
            side_b: PositionSide::Short,
            qty_a: 0.01,
            qty_b: 0.2,
            entry_price_a: 60_000.0,
            entry_price_b: 3_000.0,
            exit_price_a: 60_100.0,
            exit_price_b: 2_990.0,
            hedge_ratio: 2.0,
            entry_zscore: -2.1,
            exit_zscore: 0.1,
            entry_time: now,
            exit_time: now,
            duration_minutes: 3.5,
            pnl,
            pnl_percent,
            commission: 1.44,
            reason: "test".into(),
            strategy: strategy.map(str::to_string),
        }
    }

    #[test]
    fn empty_session_stats_are_zero() {
        let tracker = PerformanceTracker::new(tmp_metrics_path());
        let stats = tracker.session_stats();
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.total_pnl, 0.0);
    }

    #[test]
    fn session_stats_aggregate() {
        let path = tmp_metrics_path();
        let tracker = PerformanceTracker::new(path.clone());
        tracker.log_trade(&trade(10.0, 1.0, Some("engle_granger")));
        tracker.log_trade(&trade(-4.0, -0.4, Some("engle_granger")));
        tracker.log_trade(&trade(6.0, 0.6, None));

        let stats = tracker.session_stats();
        assert_eq!(stats.total_trades, 3);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.total_pnl - 12.0).abs() < 1e-9);
        assert!((stats.gross_profit - 16.0).abs() < 1e-9);
        assert!((stats.gross_loss - 4.0).abs() < 1e-9);
        assert!((stats.profit_factor - 4.0).abs() < 1e-9);
        assert!(stats.sharpe_ratio > 0.0);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn metrics_file_is_written_with_expected_shape() {
        let path = tmp_metrics_path();
        let tracker = PerformanceTracker::new(path.clone());
        tracker.log_trade(&trade(10.0, 1.0, Some("orderbook_imbalance")));
        tracker.log_trade(&trade(-2.0, -0.2, None));

        let content = std::fs::read_to_string(&path).expect("metrics file must exist");
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert!(parsed["session_start"].is_string());
        assert_eq!(parsed["trades"].as_array().unwrap().len(), 2);

        let perf = &parsed["strategy_performance"];
        assert_eq!(perf["orderbook_imbalance"]["total_trades"], 1);
        assert_eq!(perf["orderbook_imbalance"]["wins"], 1);
        assert_eq!(perf["consensus"]["losses"], 1);

        // No stale tmp file is left behind by the atomic write.
        assert!(!path.with_extension("json.tmp").exists());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn all_losses_have_zero_profit_factor() {
        let path = tmp_metrics_path();
        let tracker = PerformanceTracker::new(path.clone());
        tracker.log_trade(&trade(-5.0, -0.5, None));
        tracker.log_trade(&trade(-3.0, -0.3, None));
        let stats = tracker.session_stats();
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.gross_profit, 0.0);
        assert_eq!(stats.profit_factor, 0.0);
        let _ = std::fs::remove_file(path);
    }
}
