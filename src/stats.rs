// =============================================================================
// Statistical primitives — OLS, ADF unit-root test, correlation, z-scores
// =============================================================================
//
// Everything the strategies need from a stats library, implemented as total
// functions over `f64` slices.  Conventions:
//
//   - Standard deviations are *sample* deviations (ddof = 1), matching the
//     rolling statistics the signal thresholds were tuned against.
//   - Degenerate inputs (too short, zero variance, non-finite intermediate
//     values) return `None`; callers translate that into a `Hold`.
//
// The ADF test is the Engle-Granger step 2: an auxiliary regression
//
//   Δy_t = c + γ·y_{t-1} + φ·Δy_{t-1} + e_t        (fixed lag 1, constant)
//
// whose t-statistic on γ is mapped to an approximate p-value with the
// MacKinnon (1994/2010) response-surface polynomials for the constant-only
// case.  p < 0.10 is treated as cointegrated by the calling strategy.
// =============================================================================

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};

/// Arithmetic mean. Returns `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (ddof = 1). Returns `None` for fewer than two
/// points or a non-finite result.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    let std = var.sqrt();
    if std.is_finite() {
        Some(std)
    } else {
        None
    }
}

/// Pearson correlation coefficient of two equal-length series.
///
/// Returns `None` when the series are shorter than two points, have
/// mismatched lengths, or either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let ma = mean(a)?;
    let mb = mean(b)?;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - ma) * (y - mb);
        var_a += (x - ma).powi(2);
        var_b += (y - mb).powi(2);
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    let r = cov / (var_a.sqrt() * var_b.sqrt());
    if r.is_finite() {
        Some(r)
    } else {
        None
    }
}

/// Z-score of the last element of `values` against the whole slice.
///
/// Returns `None` when the slice is shorter than two points or has zero
/// variance (the division-by-zero case the strategies must treat as `Hold`).
pub fn zscore_of_last(values: &[f64]) -> Option<f64> {
    let last = *values.last()?;
    let m = mean(values)?;
    let std = sample_std(values)?;
    if std <= 0.0 {
        return None;
    }
    let z = (last - m) / std;
    if z.is_finite() {
        Some(z)
    } else {
        None
    }
}

// =============================================================================
// Ordinary least squares (single regressor)
// =============================================================================

/// Result of the pairwise OLS fit `y = alpha + beta * x + resid`.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub alpha: f64,
    /// The hedge ratio when fitting `price_a` on `price_b`.
    pub beta: f64,
    pub residuals: Vec<f64>,
}

/// Fit `y = alpha + beta * x` by ordinary least squares.
///
/// Returns `None` when the series are shorter than three points, have
/// mismatched lengths, or `x` has zero variance.
pub fn ols(y: &[f64], x: &[f64]) -> Option<OlsFit> {
    if y.len() != x.len() || y.len() < 3 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        cov += (xi - mx) * (yi - my);
        var_x += (xi - mx).powi(2);
    }
    if var_x <= 0.0 {
        return None;
    }

    let beta = cov / var_x;
    let alpha = my - beta * mx;
    if !beta.is_finite() || !alpha.is_finite() {
        return None;
    }

    let residuals = y
        .iter()
        .zip(x.iter())
        .map(|(yi, xi)| yi - (alpha + beta * xi))
        .collect();

    Some(OlsFit {
        alpha,
        beta,
        residuals,
    })
}

// =============================================================================
// Augmented Dickey-Fuller test (lag 1, constant)
// =============================================================================

/// Outcome of the ADF unit-root test.
#[derive(Debug, Clone, Copy)]
pub struct AdfResult {
    /// The t-statistic on the lagged-level coefficient.
    pub statistic: f64,
    /// MacKinnon approximate p-value.
    pub pvalue: f64,
}

/// Minimum series length for the auxiliary regression to have meaningful
/// degrees of freedom (m = n - 2 rows against 3 coefficients).
const ADF_MIN_OBS: usize = 10;

/// Augmented Dickey-Fuller test with one augmenting lag and a constant term.
///
/// Returns `None` on degenerate inputs: series too short, zero variance, or a
/// singular design matrix (e.g. a perfectly linear series whose differences
/// are collinear with the constant).
pub fn adf_test(series: &[f64]) -> Option<AdfResult> {
    let n = series.len();
    if n < ADF_MIN_OBS {
        return None;
    }
    if sample_std(series)? <= 0.0 {
        return None;
    }

    // Rows: t = 2..n, response dy_t, regressors [1, y_{t-1}, dy_{t-1}].
    let m = n - 2;
    let mut x = DMatrix::<f64>::zeros(m, 3);
    let mut y = DVector::<f64>::zeros(m);
    for (row, t) in (2..n).enumerate() {
        let dy_t = series[t] - series[t - 1];
        let dy_lag = series[t - 1] - series[t - 2];
        x[(row, 0)] = 1.0;
        x[(row, 1)] = series[t - 1];
        x[(row, 2)] = dy_lag;
        y[row] = dy_t;
    }

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let xtx_inv = xtx.try_inverse()?;
    let coef = &xtx_inv * &xty;

    let fitted = &x * &coef;
    let resid = &y - &fitted;
    let dof = m.checked_sub(3).filter(|&d| d > 0)? as f64;
    let s2 = resid.dot(&resid) / dof;

    let gamma = coef[1];
    let se = (s2 * xtx_inv[(1, 1)]).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return None;
    }

    let statistic = gamma / se;
    if !statistic.is_finite() {
        return None;
    }

    Some(AdfResult {
        statistic,
        pvalue: mackinnon_pvalue(statistic),
    })
}

// MacKinnon response-surface constants for the constant-only regression with
// a single cointegrating relation (the statsmodels `regression='c'`, N=1
// surface).  Outside [TAU_MIN, TAU_MAX] the p-value saturates at 0 or 1.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALLP: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGEP: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

/// Approximate p-value for an ADF t-statistic (constant-only case).
pub fn mackinnon_pvalue(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }

    let z = if statistic <= TAU_STAR {
        TAU_SMALLP[0] + TAU_SMALLP[1] * statistic + TAU_SMALLP[2] * statistic.powi(2)
    } else {
        TAU_LARGEP[0]
            + TAU_LARGEP[1] * statistic
            + TAU_LARGEP[2] * statistic.powi(2)
            + TAU_LARGEP[3] * statistic.powi(3)
    };

    let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are valid");
    normal.cdf(z)
}

// =============================================================================
// Spread helpers
// =============================================================================

/// Build the spread series `a - hedge_ratio * b` over two aligned price
/// slices and return the z-score of its final point over the trailing
/// `window` samples.
///
/// Returns `None` on mismatched lengths, short series, or zero variance.
pub fn spread_zscore(prices_a: &[f64], prices_b: &[f64], hedge_ratio: f64, window: usize) -> Option<f64> {
    if prices_a.len() != prices_b.len() || prices_a.len() < 2 || window < 2 {
        return None;
    }
    let spread: Vec<f64> = prices_a
        .iter()
        .zip(prices_b.iter())
        .map(|(a, b)| a - hedge_ratio * b)
        .collect();
    let start = spread.len().saturating_sub(window);
    zscore_of_last(&spread[start..])
}

/// Collapse duplicate timestamps (keeping the mean of duplicates) and align
/// two `(timestamp, value)` series on their timestamp intersection.
///
/// Both inputs must be sorted ascending by timestamp; the output is two
/// equal-length value vectors in ascending timestamp order.
pub fn align_series(a: &[(i64, f64)], b: &[(i64, f64)]) -> (Vec<f64>, Vec<f64>) {
    let a = collapse_duplicates(a);
    let b = collapse_duplicates(b);

    let mut out_a = Vec::new();
    let mut out_b = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out_a.push(a[i].1);
                out_b.push(b[j].1);
                i += 1;
                j += 1;
            }
        }
    }
    (out_a, out_b)
}

fn collapse_duplicates(series: &[(i64, f64)]) -> Vec<(i64, f64)> {
    let mut out: Vec<(i64, f64)> = Vec::with_capacity(series.len());
    let mut run_count = 0usize;
    for &(ts, v) in series {
        match out.last_mut() {
            Some(last) if last.0 == ts => {
                // Running mean of the duplicate timestamp.
                run_count += 1;
                last.1 += (v - last.1) / (run_count + 1) as f64;
            }
            _ => {
                run_count = 0;
                out.push((ts, v));
            }
        }
    }
    out
}
