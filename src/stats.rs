//! Order-statistic helpers shared by the recommendation pipeline: linear
//! interpolation percentiles and seeded bootstrap confidence intervals.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Quantile of a pre-sorted ascending slice with linear interpolation
/// between adjacent order statistics. A single-element slice returns that
/// element. Callers guarantee non-empty input.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    assert!(!sorted.is_empty(), "percentile of empty series");
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Fraction of series values strictly below `threshold`.
pub fn fraction_below(series: &[f64], threshold: f64) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let below = series.iter().filter(|v| **v < threshold).count();
    below as f64 / series.len() as f64
}

/// Population standard deviation; 0 for fewer than two samples.
pub fn stddev(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / series.len() as f64;
    var.sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Bootstrap CI for the `q`-quantile of `series`: resample with replacement
/// `resamples` times, take the quantile of each resample, and report the
/// 2.5th/97.5th percentiles of that distribution. Deterministic for a given
/// seed.
pub fn bootstrap_quantile_ci(
    series: &[f64],
    q: f64,
    resamples: u32,
    seed: u64,
) -> ConfidenceInterval {
    assert!(!series.is_empty(), "bootstrap of empty series");
    if series.len() == 1 {
        return ConfidenceInterval {
            lower: series[0],
            upper: series[0],
        };
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut stats = Vec::with_capacity(resamples as usize);
    let mut resample = vec![0.0; series.len()];
    for _ in 0..resamples {
        for slot in resample.iter_mut() {
            *slot = series[rng.random_range(0..series.len())];
        }
        resample.sort_by(|a, b| a.partial_cmp(b).unwrap());
        stats.push(percentile(&resample, q));
    }
    stats.sort_by(|a, b| a.partial_cmp(b).unwrap());

    ConfidenceInterval {
        lower: percentile(&stats, 0.025),
        upper: percentile(&stats, 0.975),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
        assert!(
            (actual - expected).abs() < epsilon,
            "expected {expected}, got {actual} (diff: {})",
            (actual - expected).abs()
        );
    }

    #[test]
    fn test_percentile_single_element() {
        assert_approx(percentile(&[0.42], 0.001), 0.42, 1e-12);
        assert_approx(percentile(&[0.42], 0.99), 0.42, 1e-12);
    }

    #[test]
    fn test_percentile_endpoints() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_approx(percentile(&sorted, 0.0), 1.0, 1e-12);
        assert_approx(percentile(&sorted, 1.0), 5.0, 1e-12);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        // rank = 0.5 * 3 = 1.5 -> halfway between 2.0 and 3.0
        assert_approx(percentile(&sorted, 0.5), 2.5, 1e-12);
        // rank = 0.25 * 3 = 0.75
        assert_approx(percentile(&sorted, 0.25), 1.75, 1e-12);
    }

    #[test]
    #[should_panic(expected = "empty series")]
    fn test_percentile_empty_panics() {
        percentile(&[], 0.5);
    }

    #[test]
    fn test_fraction_below() {
        let series = [0.99, 0.995, 0.999, 1.0];
        assert_approx(fraction_below(&series, 0.999), 0.5, 1e-12);
        assert_approx(fraction_below(&series, 0.5), 0.0, 1e-12);
        assert_approx(fraction_below(&series, 2.0), 1.0, 1e-12);
    }

    #[test]
    fn test_fraction_below_perfect_series_is_zero() {
        let series = vec![1.0; 30];
        assert_approx(fraction_below(&series, 1.0), 0.0, 1e-12);
    }

    #[test]
    fn test_stddev_constant_series() {
        assert_approx(stddev(&[0.5, 0.5, 0.5]), 0.0, 1e-12);
    }

    #[test]
    fn test_bootstrap_deterministic_for_seed() {
        let series: Vec<f64> = (0..30).map(|i| 0.99 + (i % 7) as f64 * 0.001).collect();
        let a = bootstrap_quantile_ci(&series, 0.01, 500, 42);
        let b = bootstrap_quantile_ci(&series, 0.01, 500, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bootstrap_seed_changes_result() {
        let series: Vec<f64> = (0..30).map(|i| 0.99 + (i % 7) as f64 * 0.001).collect();
        let a = bootstrap_quantile_ci(&series, 0.5, 500, 1);
        let b = bootstrap_quantile_ci(&series, 0.5, 500, 2);
        assert!(a != b || a.lower == a.upper);
    }

    #[test]
    fn test_bootstrap_single_sample_degenerate() {
        let ci = bootstrap_quantile_ci(&[0.998], 0.01, 1000, 7);
        assert_approx(ci.lower, 0.998, 1e-12);
        assert_approx(ci.upper, 0.998, 1e-12);
    }

    #[test]
    fn test_bootstrap_brackets_stable_series() {
        let series = vec![0.9993; 30];
        let ci = bootstrap_quantile_ci(&series, 0.01, 200, 9);
        assert_approx(ci.lower, 0.9993, 1e-9);
        assert_approx(ci.upper, 0.9993, 1e-9);
    }

    #[test]
    fn test_bootstrap_interval_ordering() {
        let series: Vec<f64> = (0..50).map(|i| 0.95 + (i as f64) * 0.001).collect();
        let ci = bootstrap_quantile_ci(&series, 0.05, 1000, 3);
        assert!(ci.lower <= ci.upper);
        assert!(ci.lower >= 0.95 && ci.upper <= 1.0);
    }
}
