// =============================================================================
// Strategy signals — typed output of every strategy evaluation
// =============================================================================

use serde::Serialize;

use crate::types::SpreadAction;

/// Identifies one of the four strategies; also carries the static voting
/// weight used by the consensus aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    EngleGranger,
    OrderbookImbalance,
    CorrelationRsi,
    MeanReversion,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::EngleGranger,
        StrategyKind::OrderbookImbalance,
        StrategyKind::CorrelationRsi,
        StrategyKind::MeanReversion,
    ];

    /// Stable name used in logs, metrics files, and the dashboard snapshot.
    pub fn name(self) -> &'static str {
        match self {
            Self::EngleGranger => "engle_granger",
            Self::OrderbookImbalance => "orderbook_imbalance",
            Self::CorrelationRsi => "correlation_rsi",
            Self::MeanReversion => "mean_reversion",
        }
    }

    /// Inverse of [`Self::name`], used to attribute closed trades.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Static consensus weight. Engle-Granger carries the most weight
    /// (cointegration rigor), the Bollinger baseline the least.
    pub fn default_weight(self) -> f64 {
        match self {
            Self::EngleGranger => 0.4,
            Self::OrderbookImbalance => 0.3,
            Self::CorrelationRsi => 0.2,
            Self::MeanReversion => 0.1,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Strategy-specific diagnostics attached to every signal.
///
/// Only the fields a given strategy computes are populated; the rest stay
/// `None` and are skipped during serialisation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalDiagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zscore: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hedge_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adf_pvalue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi_a: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi_b: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imbalance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bb_upper: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bb_middle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bb_lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
}

/// The typed outcome of one strategy evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySignal {
    pub action: SpreadAction,
    /// In [0, 1]. `Hold` on missing data carries 0.
    pub confidence: f64,
    pub reason: String,
    pub diagnostics: SignalDiagnostics,
}

impl StrategySignal {
    pub fn new(
        action: SpreadAction,
        confidence: f64,
        reason: impl Into<String>,
        diagnostics: SignalDiagnostics,
    ) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            diagnostics,
        }
    }

    /// `Hold` with zero confidence — the canonical "not enough data" result.
    pub fn hold(reason: impl Into<String>) -> Self {
        Self::new(SpreadAction::Hold, 0.0, reason, SignalDiagnostics::default())
    }

    /// `Hold` while carrying diagnostics (e.g. "holding position").
    pub fn hold_with(
        confidence: f64,
        reason: impl Into<String>,
        diagnostics: SignalDiagnostics,
    ) -> Self {
        Self::new(SpreadAction::Hold, confidence, reason, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(StrategyKind::EngleGranger.name(), "engle_granger");
        assert_eq!(StrategyKind::OrderbookImbalance.name(), "orderbook_imbalance");
        assert_eq!(StrategyKind::CorrelationRsi.name(), "correlation_rsi");
        assert_eq!(StrategyKind::MeanReversion.name(), "mean_reversion");
    }

    #[test]
    fn default_weights_sum_to_one() {
        let total: f64 = StrategyKind::ALL.iter().map(|k| k.default_weight()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn confidence_is_clamped() {
        let signal = StrategySignal::new(
            SpreadAction::LongSpread,
            1.7,
            "x",
            SignalDiagnostics::default(),
        );
        assert_eq!(signal.confidence, 1.0);

        let signal = StrategySignal::new(
            SpreadAction::Hold,
            -0.2,
            "x",
            SignalDiagnostics::default(),
        );
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn hold_has_zero_confidence() {
        let signal = StrategySignal::hold("insufficient data");
        assert_eq!(signal.action, SpreadAction::Hold);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn empty_diagnostics_serialise_empty() {
        let json = serde_json::to_string(&SignalDiagnostics::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
