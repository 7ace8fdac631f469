// =============================================================================
// Bollinger Mean-Reversion Strategy
// =============================================================================
//
// Pure mean reversion on the price ratio b/a: Bollinger bands over a fast
// 10-period window at 1.5 sigma, z-score over the trailing 30 samples.
//
// Entry when the ratio breaks a band AND the z-score confirms (|z| > 0.3);
// near-band touches (within 1%) with 0.7x the threshold enter at reduced
// confidence.  Exits: |z| > 1.5 stop, |z| < 0.1 reversion complete, or the
// ratio back inside the central 20% of the band width.
// =============================================================================

use tracing::debug;

use crate::indicators::bollinger::calculate_bollinger;
use crate::stats;
use crate::types::SpreadAction;

use super::signal::{SignalDiagnostics, StrategyKind, StrategySignal};
use super::{SpreadStrategy, StrategyContext};

pub struct MeanReversionStrategy {
    bb_period: usize,
    bb_std: f64,
    zscore_entry: f64,
    zscore_exit: f64,
    zscore_stoploss: f64,
    lookback: usize,
}

impl MeanReversionStrategy {
    pub fn new() -> Self {
        Self {
            bb_period: 10,
            bb_std: 1.5,
            zscore_entry: 0.3,
            zscore_exit: 0.1,
            zscore_stoploss: 1.5,
            lookback: 30,
        }
    }
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SpreadStrategy for MeanReversionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn signal(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        let (aligned_a, aligned_b) = stats::align_series(ctx.prices_a, ctx.prices_b);
        if aligned_a.len() < self.bb_period {
            return StrategySignal::hold("Insufficient data");
        }

        let ratio: Vec<f64> = aligned_a
            .iter()
            .zip(aligned_b.iter())
            .filter_map(|(a, b)| {
                let r = b / a;
                r.is_finite().then_some(r)
            })
            .collect();
        if ratio.len() < self.bb_period {
            return StrategySignal::hold("Insufficient ratio data");
        }

        let Some(bands) = calculate_bollinger(&ratio, self.bb_period, self.bb_std) else {
            return StrategySignal::hold("Degenerate ratio window");
        };

        let zscore = if ratio.len() >= self.lookback {
            let start = ratio.len() - self.lookback;
            stats::zscore_of_last(&ratio[start..]).unwrap_or(0.0)
        } else {
            0.0
        };

        let current_ratio = *ratio.last().unwrap_or(&0.0);

        // Position of the ratio inside the band, as fractions of the width.
        let width = bands.width();
        let (dist_from_upper, dist_from_lower) = if width > 0.0 {
            (
                (bands.upper - current_ratio) / width,
                (current_ratio - bands.lower) / width,
            )
        } else {
            (0.5, 0.5)
        };

        let diagnostics = SignalDiagnostics {
            zscore: Some(zscore),
            bb_upper: Some(bands.upper),
            bb_middle: Some(bands.middle),
            bb_lower: Some(bands.lower),
            ratio: Some(current_ratio),
            ..Default::default()
        };

        debug!(
            pair = ctx.pair_id,
            ratio = current_ratio,
            zscore,
            bb_lower = bands.lower,
            bb_upper = bands.upper,
            "mean-reversion evaluated"
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
                    "Mean reversion complete",
                    diagnostics,
                );
            }
            // Central 20% of the band width counts as "returned to mean".
            if (0.4..0.6).contains(&dist_from_upper) && (0.4..0.6).contains(&dist_from_lower) {
                return StrategySignal::new(
                    SpreadAction::Close,
                    0.80,
                    "Ratio returned to mean",
                    diagnostics,
                );
            }
            return StrategySignal::hold_with(0.5, "Holding position", diagnostics);
        }

        // Entries.
        if current_ratio < bands.lower && zscore < -self.zscore_entry {
            let confidence = (0.6 + zscore.abs() / 10.0 + dist_from_lower / 5.0).min(0.95);
            return StrategySignal::new(
                SpreadAction::LongSpread,
                confidence,
                format!(
                    "Ratio below lower band ({current_ratio:.6} < {:.6}), z-score {zscore:.3}",
                    bands.lower
                ),
                diagnostics,
            );
        }
        if current_ratio > bands.upper && zscore > self.zscore_entry {
            let confidence = (0.6 + zscore.abs() / 10.0 + dist_from_upper / 5.0).min(0.95);
            return StrategySignal::new(
                SpreadAction::ShortSpread,
                confidence,
                format!(
                    "Ratio above upper band ({current_ratio:.6} > {:.6}), z-score {zscore:.3}",
                    bands.upper
                ),
                diagnostics,
            );
        }

        // Near-band moderate tier.
        if current_ratio < bands.lower * 1.01 && zscore < -self.zscore_entry * 0.7 {
            return StrategySignal::new(
                SpreadAction::LongSpread,
                0.65,
                format!("Moderate LONG: near lower band, z-score {zscore:.3}"),
                diagnostics,
            );
        }
        if current_ratio > bands.upper * 0.99 && zscore > self.zscore_entry * 0.7 {
            return StrategySignal::new(
                SpreadAction::ShortSpread,
                0.65,
                format!("Moderate SHORT: near upper band, z-score {zscore:.3}"),
                diagnostics,
            );
        }

        StrategySignal::hold_with(0.5, "No clear signal", diagnostics)
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
            pair_id: "XRPUSDT_DOGEUSDT",
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

    /// Flat ratio around 0.5 with mild jitter, then a final break of `shift`
    /// (as a fraction of the ratio).
    fn ratio_break(shift: f64) -> (Vec<(i64, f64)>, Vec<(i64, f64)>) {
        let a = vec![100.0; 40];
        let mut b: Vec<f64> = (0..40)
            .map(|i| 50.0 + ((i as f64) * 1.7).sin() * 0.02)
            .collect();
        b[39] = 50.0 * (1.0 + shift);
        (series(&a), series(&b))
    }

    #[test]
    fn insufficient_data_holds() {
        let a = series(&[100.0; 5]);
        let b = series(&[50.0; 5]);
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::Hold);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn single_point_history_holds() {
        let a = [(0, 100.0)];
        let b = [(0, 50.0)];
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::Hold);
    }

    #[test]
    fn ratio_above_upper_band_goes_short() {
        let (a, b) = ratio_break(0.01);
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::ShortSpread);
        assert!(signal.diagnostics.zscore.unwrap() > 0.3);
        let ratio = signal.diagnostics.ratio.unwrap();
        assert!(ratio > signal.diagnostics.bb_upper.unwrap());
    }

    #[test]
    fn ratio_below_lower_band_goes_long() {
        let (a, b) = ratio_break(-0.01);
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::LongSpread);
        assert!(signal.diagnostics.zscore.unwrap() < -0.3);
    }

    #[test]
    fn flat_ratio_holds_inside_bands() {
        let a = series(&[100.0; 40]);
        // Repeating jitter whose final sample sits exactly at the mean, so
        // neither the band break nor the near-band tier can fire.
        let jitter = [0.02, 0.0, -0.02, 0.0];
        let b: Vec<f64> = (0..40).map(|i| 50.0 + jitter[i % 4]).collect();
        let b = series(&b);
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, None));
        assert_eq!(signal.action, SpreadAction::Hold);
    }

    #[test]
    fn blown_ratio_stops_position() {
        let (a, b) = ratio_break(0.05);
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, Some(SpreadDirection::Short)));
        assert_eq!(signal.action, SpreadAction::Close);
        assert!(signal.reason.starts_with("Stop loss"));
        assert!(signal.diagnostics.zscore.unwrap() > 1.5);
    }

    #[test]
    fn settled_ratio_closes_position() {
        // Perfectly flat tail: z-score is ~0 and the ratio sits mid-band.
        let a = series(&[100.0; 40]);
        let mut vals: Vec<f64> = (0..30).map(|i| 50.0 + ((i as f64) * 1.7).sin() * 0.1).collect();
        vals.extend(std::iter::repeat(50.0).take(10));
        let b = series(&vals);
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, Some(SpreadDirection::Long)));
        assert_eq!(signal.action, SpreadAction::Close);
    }

    #[test]
    fn zero_variance_ratio_holds_without_position() {
        let a = series(&[100.0; 40]);
        let b = series(&[50.0; 40]);
        let signal = MeanReversionStrategy::new().signal(&ctx(&a, &b, None));
        // Flat bands collapse onto the ratio; z is 0; no entry fires.
        assert_eq!(signal.action, SpreadAction::Hold);
    }
}
