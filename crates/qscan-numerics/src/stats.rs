//! Descriptive statistics used by the derivation engine's field extraction
//! and quality-gate logic.
//!
//! Every function here is total: no panics on empty input, no division by
//! zero. Callers get an explicit default or `None` instead.

/// Divide `num` by `den`, returning `default` when `den` is zero, non-finite,
/// or smaller in magnitude than `f64::EPSILON`.
pub fn safe_div(num: f64, den: f64, default: f64) -> f64 {
    if !den.is_finite() || den.abs() < f64::EPSILON || !num.is_finite() {
        default
    } else {
        num / den
    }
}

/// Clamp `x` into `[lo, hi]`. `lo` must be <= `hi`; callers violating that
/// get whichever bound `f64::clamp` resolves to.
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if !x.is_finite() {
        return lo;
    }
    x.max(lo).min(hi)
}

/// Geometric mean over strictly-positive values only. Non-positive or
/// non-finite values are skipped. Returns `None` if fewer than one value
/// survives filtering.
pub fn geometric_mean(values: &[f64]) -> Option<f64> {
    let filtered: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if filtered.is_empty() {
        return None;
    }
    let log_sum: f64 = filtered.iter().map(|v| v.ln()).sum();
    Some((log_sum / filtered.len() as f64).exp())
}

/// Population standard deviation. Returns 0.0 for fewer than two finite
/// values (a single point has no spread to report).
pub fn std_dev(values: &[f64]) -> f64 {
    let filtered: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if filtered.len() < 2 {
        return 0.0;
    }
    let mean = filtered.iter().sum::<f64>() / filtered.len() as f64;
    let variance =
        filtered.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / filtered.len() as f64;
    variance.sqrt()
}

/// Coefficient of variation: stddev / |mean|, with `safe_div` semantics.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let filtered: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if filtered.is_empty() {
        return 0.0;
    }
    let mean = filtered.iter().sum::<f64>() / filtered.len() as f64;
    safe_div(std_dev(&filtered), mean.abs(), 0.0)
}

/// (Q1, median, Q3) via linear interpolation on the sorted sample.
/// Returns `None` for an empty slice.
pub fn quartiles(values: &[f64]) -> Option<(f64, f64, f64)> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let q = |p: f64| -> f64 {
        let n = sorted.len();
        if n == 1 {
            return sorted[0];
        }
        let rank = p * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            sorted[lo]
        } else {
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    };
    Some((q(0.25), q(0.5), q(0.75)))
}

/// Mask marking each input value as an outlier (true) when it falls more
/// than 1.5*IQR outside [Q1, Q3]. Non-finite inputs are always marked.
pub fn iqr_outlier_mask(values: &[f64]) -> Vec<bool> {
    let Some((q1, _, q3)) = quartiles(values) else {
        return vec![false; values.len()];
    };
    let iqr = q3 - q1;
    let lo = q1 - 1.5 * iqr;
    let hi = q3 + 1.5 * iqr;
    values
        .iter()
        .map(|v| !v.is_finite() || *v < lo || *v > hi)
        .collect()
}

/// `(new - old) / |old|`, falling back to `default` when `old` is ~zero.
pub fn percentage_change(old: f64, new: f64, default: f64) -> f64 {
    safe_div(new - old, old.abs(), default)
}

/// Cross-sectional percentile rank of `value` within `sample`, via linear
/// interpolation over the sorted sample (mid-rank for ties). Returns a
/// value in `[0, 1]`. An empty sample yields 0.5 (no information).
pub fn percentile_rank(sample: &[f64], value: f64) -> f64 {
    let mut sorted: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.5;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len() as f64;
    let below = sorted.iter().filter(|v| **v < value).count() as f64;
    let equal = sorted.iter().filter(|v| **v == value).count() as f64;
    // Mid-rank: count everything strictly below, plus half of the ties.
    clamp((below + 0.5 * equal) / n, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_div_zero_denominator_returns_default() {
        assert_eq!(safe_div(10.0, 0.0, -1.0), -1.0);
    }

    #[test]
    fn safe_div_normal() {
        assert!((safe_div(10.0, 4.0, 0.0) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp(5.0, 0.0, 3.0), 3.0);
        assert_eq!(clamp(-5.0, 0.0, 3.0), 0.0);
        assert_eq!(clamp(1.5, 0.0, 3.0), 1.5);
    }

    #[test]
    fn clamp_nan_falls_to_lo() {
        assert_eq!(clamp(f64::NAN, 1.0, 3.0), 1.0);
    }

    #[test]
    fn geometric_mean_basic() {
        let gm = geometric_mean(&[1.0, 2.0, 4.0]).unwrap();
        assert!((gm - 2.0).abs() < 1e-9);
    }

    #[test]
    fn geometric_mean_ignores_non_positive() {
        let gm = geometric_mean(&[-1.0, 0.0, 4.0, 4.0]).unwrap();
        assert!((gm - 4.0).abs() < 1e-9);
    }

    #[test]
    fn geometric_mean_empty_is_none() {
        assert!(geometric_mean(&[]).is_none());
        assert!(geometric_mean(&[-1.0, 0.0]).is_none());
    }

    #[test]
    fn std_dev_single_point_is_zero() {
        assert_eq!(std_dev(&[5.0]), 0.0);
    }

    #[test]
    fn std_dev_known_series() {
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn quartiles_basic() {
        let (q1, med, q3) = quartiles(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((med - 2.5).abs() < 1e-9);
        assert!(q1 < med && med < q3);
    }

    #[test]
    fn iqr_outlier_mask_flags_extreme() {
        let mask = iqr_outlier_mask(&[1.0, 2.0, 3.0, 4.0, 1000.0]);
        assert!(mask[4]);
        assert!(!mask[0]);
    }

    #[test]
    fn percentage_change_default_on_zero_base() {
        assert_eq!(percentage_change(0.0, 5.0, 42.0), 42.0);
    }

    #[test]
    fn percentile_rank_extremes() {
        let sample = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(percentile_rank(&sample, 1.0) < percentile_rank(&sample, 5.0));
        assert!((percentile_rank(&sample, 3.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn percentile_rank_ties_get_mid_rank() {
        let sample = [1.0, 2.0, 2.0, 2.0, 3.0];
        let r = percentile_rank(&sample, 2.0);
        assert!((r - 0.5).abs() < 1e-9);
    }
}
