// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Meridian engine.  Every tunable parameter
// lives here so a deployment can be reconfigured by editing one JSON file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::PairConfig;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_testnet() -> bool {
    true
}

fn default_paper_balance() -> f64 {
    10_000.0
}

fn default_max_position_size() -> f64 {
    1000.0
}

fn default_max_concurrent_pairs() -> usize {
    5
}

fn default_daily_loss_limit() -> f64 {
    500.0
}

fn default_risk_per_trade() -> f64 {
    0.01
}

fn default_zscore_entry() -> f64 {
    2.0
}

fn default_zscore_exit() -> f64 {
    0.3
}

fn default_zscore_stoploss() -> f64 {
    4.0
}

fn default_max_holding_hours() -> f64 {
    24.0
}

fn default_cointegration_window() -> usize {
    120
}

fn default_cointegration_pvalue() -> f64 {
    0.05
}

fn default_pairs() -> Vec<PairConfig> {
    vec![
        PairConfig::new("BTCUSDT", "ETHUSDT"),
        PairConfig::new("SOLUSDT", "AVAXUSDT"),
    ]
}

fn default_true() -> bool {
    true
}

fn default_snapshot_path() -> String {
    "dashboard_state.json".to_string()
}

fn default_metrics_path() -> String {
    "logs/performance_metrics.json".to_string()
}

// =============================================================================
// Signal mode
// =============================================================================

/// How per-pair strategy signals become decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Weighted voting across all strategies; one decision per pair.
    Consensus,
    /// One decision per strategy whose signal is actionable (OR logic).
    IndividualOr,
}

impl Default for SignalMode {
    fn default() -> Self {
        Self::Consensus
    }
}

impl std::fmt::Display for SignalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Consensus => write!(f, "consensus"),
            Self::IndividualOr => write!(f, "individual_or"),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational switches ------------------------------------------------

    /// Master switch. When `false` every execution is simulated locally with
    /// a fixed 0.05% slippage assumption; nothing reaches the exchange.
    #[serde(default)]
    pub trading_enabled: bool,

    /// Route orders to the exchange testnet instead of production.
    #[serde(default = "default_testnet")]
    pub testnet: bool,

    /// Balance assumed when trading is disabled (paper mode).
    #[serde(default = "default_paper_balance")]
    pub paper_balance: f64,

    /// Attempt to close every open position on shutdown.
    #[serde(default = "default_true")]
    pub close_on_shutdown: bool,

    // --- Risk limits ---------------------------------------------------------

    /// Base USD notional per leg before sizing multipliers.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    /// Maximum number of simultaneously open pair positions.
    #[serde(default = "default_max_concurrent_pairs")]
    pub max_concurrent_pairs: usize,

    /// Daily realized-loss limit in USD.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,

    /// Fraction of the balance risked per trade.
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,

    /// Maximum holding time for a position, in hours.
    #[serde(default = "default_max_holding_hours")]
    pub max_holding_hours: f64,

    // --- Z-score thresholds (global defaults) --------------------------------

    #[serde(default = "default_zscore_entry")]
    pub zscore_entry_threshold: f64,

    #[serde(default = "default_zscore_exit")]
    pub zscore_exit_threshold: f64,

    #[serde(default = "default_zscore_stoploss")]
    pub zscore_stoploss_threshold: f64,

    // --- Cointegration -------------------------------------------------------

    /// Window (in samples) used for the engine's position z-score updates.
    #[serde(default = "default_cointegration_window")]
    pub cointegration_window: usize,

    #[serde(default = "default_cointegration_pvalue")]
    pub cointegration_pvalue_threshold: f64,

    // --- Signals -------------------------------------------------------------

    /// Consensus voting vs. one-decision-per-strategy OR mode.
    #[serde(default)]
    pub signal_mode: SignalMode,

    // --- Pairs ---------------------------------------------------------------

    #[serde(default = "default_pairs")]
    pub pairs: Vec<PairConfig>,

    // --- Observability -------------------------------------------------------

    /// Dashboard snapshot file, rewritten atomically each iteration.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// Rolling per-trade metrics file.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_enabled: false,
            testnet: default_testnet(),
            paper_balance: default_paper_balance(),
            close_on_shutdown: true,
            max_position_size: default_max_position_size(),
            max_concurrent_pairs: default_max_concurrent_pairs(),
            daily_loss_limit: default_daily_loss_limit(),
            risk_per_trade: default_risk_per_trade(),
            max_holding_hours: default_max_holding_hours(),
            zscore_entry_threshold: default_zscore_entry(),
            zscore_exit_threshold: default_zscore_exit(),
            zscore_stoploss_threshold: default_zscore_stoploss(),
            cointegration_window: default_cointegration_window(),
            cointegration_pvalue_threshold: default_cointegration_pvalue(),
            signal_mode: SignalMode::default(),
            pairs: default_pairs(),
            snapshot_path: default_snapshot_path(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            pairs = config.pairs.len(),
            trading_enabled = config.trading_enabled,
            signal_mode = %config.signal_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Unique symbols across all enabled pairs, in first-seen order.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for pair in self.pairs.iter().filter(|p| p.enabled) {
            if !out.contains(&pair.symbol_a) {
                out.push(pair.symbol_a.clone());
            }
            if !out.contains(&pair.symbol_b) {
                out.push(pair.symbol_b.clone());
            }
        }
        out
    }

    /// Enabled pair configurations.
    pub fn enabled_pairs(&self) -> Vec<PairConfig> {
        self.pairs.iter().filter(|p| p.enabled).cloned().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.trading_enabled);
        assert!(cfg.testnet);
        assert_eq!(cfg.max_concurrent_pairs, 5);
        assert!((cfg.max_position_size - 1000.0).abs() < f64::EPSILON);
        assert!((cfg.risk_per_trade - 0.01).abs() < f64::EPSILON);
        assert!((cfg.zscore_exit_threshold - 0.3).abs() < f64::EPSILON);
        assert!((cfg.zscore_stoploss_threshold - 4.0).abs() < f64::EPSILON);
        assert_eq!(cfg.signal_mode, SignalMode::Consensus);
        assert_eq!(cfg.pairs.len(), 2);
        assert!(cfg.close_on_shutdown);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert!(!cfg.trading_enabled);
        assert!(cfg.testnet);
        assert_eq!(cfg.max_concurrent_pairs, 5);
        assert_eq!(cfg.signal_mode, SignalMode::Consensus);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "trading_enabled": true,
            "signal_mode": "individual_or",
            "pairs": [{ "symbol_a": "XRPUSDT", "symbol_b": "DOGEUSDT" }]
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.trading_enabled);
        assert_eq!(cfg.signal_mode, SignalMode::IndividualOr);
        assert_eq!(cfg.pairs.len(), 1);
        assert_eq!(cfg.pairs[0].pair_id(), "XRPUSDT_DOGEUSDT");
        assert_eq!(cfg.max_concurrent_pairs, 5);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.max_concurrent_pairs, cfg2.max_concurrent_pairs);
        assert_eq!(cfg.signal_mode, cfg2.signal_mode);
        assert_eq!(cfg.pairs.len(), cfg2.pairs.len());
    }

    #[test]
    fn symbols_are_unique_and_respect_enabled_flag() {
        let mut cfg = RuntimeConfig::default();
        cfg.pairs = vec![
            PairConfig::new("BTCUSDT", "ETHUSDT"),
            PairConfig::new("ETHUSDT", "SOLUSDT"),
            PairConfig {
                symbol_a: "XRPUSDT".into(),
                symbol_b: "DOGEUSDT".into(),
                enabled: false,
            },
        ];
        assert_eq!(cfg.symbols(), vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        assert_eq!(cfg.enabled_pairs().len(), 2);
    }
}
