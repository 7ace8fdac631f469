// =============================================================================
// Bollinger Bands over a price-ratio series
// =============================================================================
//
// Middle band = SMA over `period`, upper/lower = middle ± `num_std` * σ where
// σ is the *sample* standard deviation of the window (the strategy thresholds
// were tuned against rolling sample statistics).
// =============================================================================

use crate::stats;

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone, Copy)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width (upper - lower); zero for a flat window.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Calculate Bollinger Bands over the trailing `period` values.
///
/// Returns `None` when:
/// - `period` is zero or larger than the series.
/// - The window statistics are degenerate (non-finite).
pub fn calculate_bollinger(values: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period < 2 || values.len() < period {
        return None;
    }

    let window = &values[values.len() - period..];
    let middle = stats::mean(window)?;
    let std = stats::sample_std(window)?;

    let upper = middle + num_std * std;
    let lower = middle - num_std * std;

    if upper.is_finite() && lower.is_finite() {
        Some(BollingerBands {
            upper,
            middle,
            lower,
        })
    } else {
        None
    }
}
