/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the sample standard deviation (n - 1) given a pre-computed mean.
/// Returns 0.0 when fewer than two values are available.
pub fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

    variance.sqrt()
}

/// Share of `part` in `total` as a percentage, 0.0 when the total is not positive.
pub fn pct(part: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        part / total * 100.0
    }
}

/// Percent change from `previous` to `current`, `None` when `previous` is zero.
pub fn pct_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some((current - previous) / previous * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_sample_stddev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert_eq!(m, 5.0);
        assert!((sample_stddev(&values, m) - 2.138_089_935).abs() < 1e-6);
        assert_eq!(sample_stddev(&[3.0], 3.0), 0.0);
    }

    #[test]
    fn test_pct_with_zero_total() {
        assert_eq!(pct(10.0, 0.0), 0.0);
        assert_eq!(pct(1.0, 4.0), 25.0);
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(0.0, 5.0), None);
        assert_eq!(pct_change(10.0, 15.0), Some(50.0));
        assert_eq!(pct_change(10.0, 5.0), Some(-50.0));
    }
}
