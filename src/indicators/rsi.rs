// =============================================================================
// Relative Strength Index (RSI) — simple moving-average variant
// =============================================================================
//
// The mean-reversion strategies use a fast RSI built from simple moving
// averages of gains and losses over the trailing `period` deltas (not
// Wilder's exponential smoothing):
//
//   avg_gain = SMA(gains, period)     over the last `period` deltas
//   avg_loss = SMA(losses, period)
//   RS       = avg_gain / avg_loss
//   RSI      = 100 - 100 / (1 + RS)
//
// The caller treats 50.0 as "no signal", so that is also the fallback for
// insufficient data and flat markets.
// =============================================================================

/// RSI of the most recent bar over the trailing `period` deltas.
///
/// # Edge cases
/// - Fewer than `period + 1` prices, or `period == 0` => 50.0 (neutral).
/// - No losses in the window => 100.0; no gains => 0.0; flat => 50.0.
/// - Non-finite inputs => 50.0.
pub fn calculate_rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let window = &prices[prices.len() - (period + 1)..];

    let mut sum_gain = 0.0;
    let mut sum_loss = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if !delta.is_finite() {
            return 50.0;
        }
        if delta > 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let avg_gain = sum_gain / period as f64;
    let avg_loss = sum_loss / period as f64;

    if avg_gain == 0.0 && avg_loss == 0.0 {
        return 50.0;
    }
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - 100.0 / (1.0 + rs);
    if rsi.is_finite() {
        rsi
    } else {
        50.0
    }
}
