// =============================================================================
// Correlation + RSI Mean-Reversion Strategy
// =============================================================================
//
// Fast divergence scalper on the 1-second history:
//
//   - RSI(7) on each leg via simple moving averages of gains/losses
//   - z-score of the price ratio b/a over the trailing 30 samples
//   - Pearson correlation computed for diagnostics only; the gate is
//     configured off (threshold -1.0 accepts every pair)
//
// Entry tiers, strongest first: RSI divergence at the 45/55 bands with the
// full z threshold; the same bands with half the threshold (confidence
// 0.65); a bare RSI gap > 10 with 0.3x the threshold (confidence 0.55).
// =============================================================================

use tracing::debug;

use crate::indicators::rsi::calculate_rsi;
use crate::stats;
use crate::types::SpreadAction;

use super::signal::{SignalDiagnostics, StrategyKind, StrategySignal};
use super::{SpreadStrategy, StrategyContext};

pub struct CorrelationRsiStrategy {
    rsi_period: usize,
    rsi_oversold: f64,
    rsi_overbought: f64,
    zscore_entry: f64,
    zscore_exit: f64,
    zscore_stoploss: f64,
    lookback: usize,
}

impl CorrelationRsiStrategy {
    pub fn new() -> Self {
        Self {
            rsi_period: 7,
            rsi_oversold: 45.0,
            rsi_overbought: 55.0,
            zscore_entry: 0.01,
            zscore_exit: 0.005,
            zscore_stoploss: 1.5,
            lookback: 30,
        }
    }

    fn min_required(&self) -> usize {
        (self.rsi_period + 1).max(self.lookback)
    }

    /// Ratio series b/a with non-finite entries dropped.
    fn ratio_series(prices_a: &[f64], prices_b: &[f64]) -> Vec<f64> {
        prices_a
            .iter()
            .zip(prices_b.iter())
            .filter_map(|(a, b)| {
                let r = b / a;
                r.is_finite().then_some(r)
            })
            .collect()
    }
}

impl Default for CorrelationRsiStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SpreadStrategy for CorrelationRsiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CorrelationRsi
    }

    fn signal(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        let (aligned_a, aligned_b) = stats::align_series(ctx.prices_a, ctx.prices_b);
        if aligned_a.len() < self.min_required() {
            return StrategySignal::hold("Insufficient data");
        }

        let correlation = {
            let start = aligned_a.len().saturating_sub(self.lookback);
            stats::pearson(&aligned_a[start..], &aligned_b[start..]).unwrap_or(0.0)
        };

        let rsi_a = calculate_rsi(&aligned_a, self.rsi_period);
        let rsi_b = calculate_rsi(&aligned_b, self.rsi_period);

        let ratio = Self::ratio_series(&aligned_a, &aligned_b);
        let zscore = if ratio.len() >= self.lookback {
            let start = ratio.len() - self.lookback;
            stats::zscore_of_last(&ratio[start..]).unwrap_or(0.0)
        } else {
            0.0
        };

        let diagnostics = SignalDiagnostics {
            zscore: Some(zscore),
            correlation: Some(correlation),
            rsi_a: Some(rsi_a),
            rsi_b: Some(rsi_b),
            ratio: ratio.last().copied(),
            ..Default::default()
        };

        debug!(
            pair = ctx.pair_id,
            correlation, rsi_a, rsi_b, zscore, "correlation-rsi evaluated"
        );

        // Exit conditions while holding.
        if ctx.current_position.is_some() {
            if zscore.abs() > self.zscore_stoploss {
                return StrategySignal::new(
                    SpreadAction::Close,
                    0.95,
                    format!("Stop loss: z-score {zscore:.3}"),
                    diagnostics,
                );
            }
            if zscore.abs() < self.zscore_exit {
                return StrategySignal::new(
                    SpreadAction::Close,
                    0.85,
                    format!("Mean reversion complete: z-score {zscore:.3}"),
                    diagnostics,
                );
            }
            if (40.0..60.0).contains(&rsi_a) && (40.0..60.0).contains(&rsi_b) {
                return StrategySignal::new(SpreadAction::Close, 0.75, "RSI normalized", diagnostics);
            }
            return StrategySignal::hold_with(0.5, "Holding position", diagnostics);
        }

        // Entry tiers (no position). Correlation gate configured off.

        // Strong: oversold A vs overbought B with the full z threshold.
        if rsi_a < self.rsi_oversold && rsi_b > self.rsi_overbought && zscore < -self.zscore_entry {
            let confidence = (0.5
                + (self.rsi_oversold - rsi_a) / 100.0
                + (self.rsi_overbought - rsi_b) / 100.0
                + zscore.abs() / 10.0)
                .min(0.95);
            return StrategySignal::new(
                SpreadAction::LongSpread,
                confidence,
                format!("A oversold (RSI {rsi_a:.1}), B overbought (RSI {rsi_b:.1}), z-score {zscore:.3}"),
                diagnostics,
            );
        }

        if rsi_a > self.rsi_overbought && rsi_b < self.rsi_oversold && zscore > self.zscore_entry {
            let confidence = (0.5
                + (rsi_a - self.rsi_overbought) / 100.0
                + (self.rsi_oversold - rsi_b) / 100.0
                + zscore.abs() / 10.0)
                .min(0.95);
            return StrategySignal::new(
                SpreadAction::ShortSpread,
                confidence,
                format!("A overbought (RSI {rsi_a:.1}), B oversold (RSI {rsi_b:.1}), z-score {zscore:.3}"),
                diagnostics,
            );
        }

        // Moderate: same bands, half the z threshold.
        if rsi_a < 45.0 && rsi_b > 55.0 && zscore < -self.zscore_entry * 0.5 {
            return StrategySignal::new(
                SpreadAction::LongSpread,
                0.65,
                format!("Moderate LONG: RSI_A {rsi_a:.1}, RSI_B {rsi_b:.1}, z-score {zscore:.3}"),
                diagnostics,
            );
        }
        if rsi_a > 55.0 && rsi_b < 45.0 && zscore > self.zscore_entry * 0.5 {
            return StrategySignal::new(
                SpreadAction::ShortSpread,
                0.65,
                format!("Moderate SHORT: RSI_A {rsi_a:.1}, RSI_B {rsi_b:.1}, z-score {zscore:.3}"),
                diagnostics,
            );
        }

        // Weak: bare RSI divergence with 0.3x the z threshold.
        if (rsi_a - rsi_b).abs() > 10.0 && zscore.abs() > self.zscore_entry * 0.3 {
            let action = if rsi_a < rsi_b {
                SpreadAction::LongSpread
            } else {
                SpreadAction::ShortSpread
            };
            return StrategySignal::new(
                action,
                0.55,
                format!(
                    "Weak {action}: RSI divergence {:.1}, z-score {zscore:.3}",
                    (rsi_a - rsi_b).abs()
                ),
                diagnostics,
            );
        }

        StrategySignal::hold_with(0.5, "No clear entry signal", diagnostics)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpreadDirection;

    fn ctx<'a>(
        prices_a: &'a [(i64, f64)],
        prices_b: &'a [(i64, f64)],
        position: Option<SpreadDirection>,
    ) -> StrategyContext<'a> {
        StrategyContext {
            pair_id: "SOLUSDT_AVAXUSDT",
            prices_a,
            prices_b,
            orderbook_a: None,
            orderbook_b: None,
            current_position: position,
        }
    }

    fn series(values: &[f64]) -> Vec<(i64, f64)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64 * 1_000, *v))
            .collect()
    }

    /// A falling into the close, B rising: RSI_A low, RSI_B high, ratio b/a
    /// ends above its window mean... sign depends on construction, so tests
    /// assert on the actual diagnostics.
    fn diverging_pair() -> (Vec<(i64, f64)>, Vec<(i64, f64)>) {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for i in 0..40 {
            let fa = if i < 30 { 100.0 } else { 100.0 - (i - 30) as f64 * 0.5 };
            let fb = if i < 30 { 50.0 } else { 50.0 + (i - 30) as f64 * 0.5 };
            a.push(fa);
            b.push(fb);
        }
        (series(&a), series(&b))
    }

    #[test]
    fn insufficient_data_holds() {
        let a = series(&[100.0; 10]);
        let b = series(&[50.0; 10]);
        let signal = CorrelationRsiStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::Hold);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn single_point_history_holds() {
        let a = [(0, 100.0)];
        let b = [(0, 50.0)];
        let signal = CorrelationRsiStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::Hold);
    }

    #[test]
    fn flat_series_has_neutral_rsi_and_holds() {
        let a = series(&[100.0; 40]);
        let b = series(&[50.0; 40]);
        let signal = CorrelationRsiStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::Hold);
        assert_eq!(signal.diagnostics.rsi_a, Some(50.0));
        assert_eq!(signal.diagnostics.rsi_b, Some(50.0));
    }

    #[test]
    fn diverging_legs_trigger_long_spread() {
        let (a, b) = diverging_pair();
        let signal = CorrelationRsiStrategy::new().signal(&ctx(&a, &b, None));
        // A fell (RSI 0), B rose (RSI 100), ratio b/a is rising so z > 0...
        // the weak tier keys off the RSI gap and |z| only.
        assert_eq!(signal.action, SpreadAction::LongSpread);
        assert!(signal.confidence >= 0.55);
        assert!(signal.diagnostics.rsi_a.unwrap() < 45.0);
        assert!(signal.diagnostics.rsi_b.unwrap() > 55.0);
    }

    #[test]
    fn mirrored_divergence_triggers_short_spread() {
        let (a, b) = diverging_pair();
        // Swap the legs: A overbought, B oversold.
        let signal = CorrelationRsiStrategy::new().signal(&ctx(&b, &a, None));
        assert_eq!(signal.action, SpreadAction::ShortSpread);
    }

    #[test]
    fn ratio_stop_loss_closes_position() {
        // Flat ratio then a violent break on the last sample.
        let mut a = vec![100.0; 40];
        let b: Vec<f64> = (0..40).map(|i| 50.0 + (i as f64 * 0.7).sin() * 0.05).collect();
        a[39] = 80.0; // ratio jumps well past 1.5 sigma
        let (a, b) = (series(&a), series(&b));
        let signal =
            CorrelationRsiStrategy::new().signal(&ctx(&a, &b, Some(SpreadDirection::Long)));
        assert_eq!(signal.action, SpreadAction::Close);
        assert!(signal.reason.starts_with("Stop loss"));
    }

    #[test]
    fn rsi_normalization_closes_position() {
        // Tiny alternating jitter keeps both RSIs inside (40, 60) while the
        // alternating ratio holds |z| around 1 (between exit and stop).
        let a: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.01 })
            .collect();
        let b = vec![50.0; 40];
        let (a, b) = (series(&a), series(&b));
        let signal =
            CorrelationRsiStrategy::new().signal(&ctx(&a, &b, Some(SpreadDirection::Long)));
        assert_eq!(signal.action, SpreadAction::Close);
        assert_eq!(signal.reason, "RSI normalized");
        let rsi_a = signal.diagnostics.rsi_a.unwrap();
        let rsi_b = signal.diagnostics.rsi_b.unwrap();
        assert!((40.0..60.0).contains(&rsi_a));
        assert!((40.0..60.0).contains(&rsi_b));
    }

    #[test]
    fn correlation_is_reported_but_never_gates() {
        // Perfectly anti-correlated legs still produce entries.
        let (a, b) = diverging_pair();
        let signal = CorrelationRsiStrategy::new().signal(&ctx(&a, &b, None));
        assert!(signal.diagnostics.correlation.is_some());
        assert_ne!(signal.action, SpreadAction::Hold);
    }
}
