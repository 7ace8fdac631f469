// =============================================================================
// Engle-Granger Cointegration Strategy
// =============================================================================
//
// Two-step methodology:
//
//   1. OLS regression  price_a = alpha + beta * price_b + eps
//      beta is the hedge ratio; the residuals eps are the spread.
//   2. ADF unit-root test on eps (lag 1, constant).  Stationary residuals
//      mean the pair is cointegrated and the spread is tradeable.
//
// Entry when the spread z-score leaves the +-2.0 band, exit when it returns
// inside +-0.3, stop when it blows past +-3.5.  Cointegration strength scales
// confidence: p < 0.10 is strong (full confidence), 0.10 <= p < 0.20 is weak
// (discounted), anything above 0.20 is not tradeable.
// =============================================================================

use tracing::debug;

use crate::stats;
use crate::types::SpreadAction;

use super::signal::{SignalDiagnostics, StrategyKind, StrategySignal};
use super::{SpreadStrategy, StrategyContext};

pub struct EngleGrangerStrategy {
    lookback: usize,
    min_data_points: usize,
    zscore_entry: f64,
    zscore_exit: f64,
    zscore_stoploss: f64,
    strong_pvalue: f64,
    weak_pvalue: f64,
}

impl EngleGrangerStrategy {
    pub fn new() -> Self {
        Self {
            lookback: 60,
            min_data_points: 30,
            zscore_entry: 2.0,
            zscore_exit: 0.3,
            zscore_stoploss: 3.5,
            strong_pvalue: 0.10,
            weak_pvalue: 0.20,
        }
    }

    /// Confidence discount for weakly cointegrated pairs.
    fn cointegration_quality(&self, pvalue: f64) -> f64 {
        if pvalue < self.strong_pvalue {
            1.0
        } else {
            (1.0 - (pvalue - self.strong_pvalue) * 5.0).max(0.5)
        }
    }

    fn entry_confidence(&self, zscore: f64, quality: f64) -> f64 {
        (0.6 + zscore.abs() / 10.0).min(0.95) * quality
    }
}

impl Default for EngleGrangerStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SpreadStrategy for EngleGrangerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EngleGranger
    }

    fn signal(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        // Align on the timestamp intersection, duplicates collapsed by mean.
        let (aligned_a, aligned_b) = stats::align_series(ctx.prices_a, ctx.prices_b);
        if aligned_a.len() < self.min_data_points {
            return StrategySignal::hold("Insufficient data");
        }

        let start = aligned_a.len().saturating_sub(self.lookback);
        let window_a = &aligned_a[start..];
        let window_b = &aligned_b[start..];

        let correlation = stats::pearson(window_a, window_b).unwrap_or(0.0);

        // Step 1: OLS for the hedge ratio and the spread.
        let Some(fit) = stats::ols(window_a, window_b) else {
            return StrategySignal::hold("Degenerate regression input");
        };

        // Step 2: ADF on the residuals.  A flat spread has no information.
        let Some(adf) = stats::adf_test(&fit.residuals) else {
            return StrategySignal::hold("Zero-variance spread");
        };

        let Some(zscore) = stats::zscore_of_last(&fit.residuals) else {
            return StrategySignal::hold("Zero-variance spread");
        };

        let current_spread = fit.residuals.last().copied().unwrap_or(0.0);
        let diagnostics = SignalDiagnostics {
            zscore: Some(zscore),
            spread: Some(current_spread),
            hedge_ratio: Some(fit.beta),
            adf_pvalue: Some(adf.pvalue),
            correlation: Some(correlation),
            ..Default::default()
        };

        debug!(
            pair = ctx.pair_id,
            hedge_ratio = fit.beta,
            adf_pvalue = adf.pvalue,
            zscore,
            "engle-granger evaluated"
        );

        // Exit conditions while holding.
        if ctx.current_position.is_some() {
            if zscore.abs() > self.zscore_stoploss {
                return StrategySignal::new(
                    SpreadAction::Close,
                    0.95,
                    format!(
                        "Stop loss: z-score {:.3} beyond {:.1}",
                        zscore, self.zscore_stoploss
                    ),
                    diagnostics,
                );
            }
            if zscore.abs() < self.zscore_exit {
                return StrategySignal::new(
                    SpreadAction::Close,
                    0.90,
                    format!("Mean reversion complete: z-score {zscore:.3}"),
                    diagnostics,
                );
            }
            return StrategySignal::hold_with(0.5, "Holding position", diagnostics);
        }

        // Entry gating: at least weak cointegration.
        let strong = adf.pvalue < self.strong_pvalue;
        if adf.pvalue >= self.weak_pvalue {
            return StrategySignal::hold_with(
                0.0,
                format!(
                    "Not cointegrated (p={:.4} >= {:.2})",
                    adf.pvalue, self.weak_pvalue
                ),
                diagnostics,
            );
        }

        let quality = self.cointegration_quality(adf.pvalue);
        let strength = if strong { "Strong" } else { "Weak" };

        // Spread too high: sell A, buy B.
        if zscore > self.zscore_entry {
            let confidence = self.entry_confidence(zscore, quality);
            return StrategySignal::new(
                SpreadAction::ShortSpread,
                confidence,
                format!(
                    "{strength} cointegration (p={:.4}), z-score {:.3} > {:.1} (beta={:.4})",
                    adf.pvalue, zscore, self.zscore_entry, fit.beta
                ),
                diagnostics,
            );
        }

        // Spread too low: buy A, sell B.
        if zscore < -self.zscore_entry {
            let confidence = self.entry_confidence(zscore, quality);
            return StrategySignal::new(
                SpreadAction::LongSpread,
                confidence,
                format!(
                    "{strength} cointegration (p={:.4}), z-score {:.3} < -{:.1} (beta={:.4})",
                    adf.pvalue, zscore, self.zscore_entry, fit.beta
                ),
                diagnostics,
            );
        }

        StrategySignal::hold_with(
            0.5,
            format!("No signal: z-score {zscore:.3} in neutral range"),
            diagnostics,
        )
    }
}
