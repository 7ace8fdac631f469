// =============================================================================
// Dashboard Snapshot — best-effort JSON export for the observation UI
// =============================================================================
//
// Rewritten atomically (tmp + rename) on every engine iteration.  The field
// layout is a consumer contract with the external dashboard; changing it
// breaks the UI.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Per-pair diagnostics from the latest decision round.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PairSnapshot {
    pub zscore: f64,
    pub pvalue: f64,
    pub hedge_ratio: f64,
    pub signal: String,
    pub confidence: f64,
    pub position_size_a: f64,
    pub position_size_b: f64,
    pub current_price_a: f64,
    pub current_price_b: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Full snapshot document.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub account_balance: f64,
    pub available_balance: f64,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub pairs: HashMap<String, PairSnapshot>,
    pub updated_at: String,
}

/// Writes snapshots to a fixed path, atomically.
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write(&self, snapshot: &DashboardSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .context("failed to serialise dashboard snapshot")?;
        write_atomic(&self.path, &content)
            .with_context(|| format!("failed to write snapshot to {}", self.path.display()))
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

impl std::fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter").field("path", &self.path).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tmp_snapshot_path() -> PathBuf {
        std::env::temp_dir().join(format!("meridian-snapshot-{}.json", uuid::Uuid::new_v4()))
    }

    fn sample() -> DashboardSnapshot {
        let mut pairs = HashMap::new();
        pairs.insert(
            "BTCUSDT_ETHUSDT".to_string(),
            PairSnapshot {
                zscore: -2.3,
                pvalue: 0.04,
                hedge_ratio: 2.01,
                signal: "LONG_SPREAD".to_string(),
                confidence: 0.82,
                position_size_a: 500.0,
                position_size_b: 500.0,
                current_price_a: 60_000.0,
                current_price_b: 3_000.0,
                strategy: Some("engle_granger".to_string()),
            },
        );
        DashboardSnapshot {
            account_balance: 10_000.0,
            available_balance: 9_200.0,
            total_pnl: 120.5,
            daily_pnl: 20.5,
            win_rate: 0.58,
            total_trades: 31,
            pairs,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn snapshot_round_trips_through_the_file() {
        let path = tmp_snapshot_path();
        let writer = SnapshotWriter::new(path.clone());
        writer.write(&sample()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert_eq!(parsed["account_balance"], 10_000.0);
        assert_eq!(parsed["total_trades"], 31);
        let pair = &parsed["pairs"]["BTCUSDT_ETHUSDT"];
        assert_eq!(pair["signal"], "LONG_SPREAD");
        assert_eq!(pair["hedge_ratio"], 2.01);
        assert_eq!(pair["strategy"], "engle_granger");

        assert!(!path.with_extension("json.tmp").exists());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rewrite_replaces_previous_content() {
        let path = tmp_snapshot_path();
        let writer = SnapshotWriter::new(path.clone());
        writer.write(&sample()).unwrap();

        let mut second = sample();
        second.total_trades = 32;
        writer.write(&second).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["total_trades"], 32);
        let _ = std::fs::remove_file(path);
    }
}
