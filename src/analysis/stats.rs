use serde::{Deserialize, Serialize};
use thiserror::Error;

/// z-value for a two-sided 95% confidence interval.
pub const Z_95: f64 = 1.96;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("no power samples were collected")]
    NoSamples,
}

/// Summary of one sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerStats {
    pub median: f64,
    pub mean: f64,
    /// Half-width of the 95% confidence interval of the mean.
    pub ci: f64,
}

impl PowerStats {
    pub fn from_readings(readings: &[f64]) -> Result<Self, StatsError> {
        if readings.is_empty() {
            return Err(StatsError::NoSamples);
        }

        let n = readings.len() as f64;
        let mean = readings.iter().sum::<f64>() / n;

        // Population variance; the CI uses the spread of the window itself
        let variance = readings
            .iter()
            .map(|v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let ci = Z_95 * variance.sqrt() / n.sqrt();

        Ok(Self {
            median: median(readings),
            mean,
            ci,
        })
    }
}

/// Median of a non-empty slice; even lengths average the two middle values.
fn median(readings: &[f64]) -> f64 {
    let mut sorted = readings.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_of_one_to_five() {
        let stats = PowerStats::from_readings(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.median, 3.0);
        let expected_ci = 1.96 * 2f64.sqrt() / 5f64.sqrt();
        assert!((stats.ci - expected_ci).abs() < 1e-12);
    }

    #[test]
    fn test_even_window_median_and_order_independence() {
        let stats = PowerStats::from_readings(&[6.0, 1.0, 4.0, 3.0]).unwrap();
        assert_eq!(stats.median, 3.5);
        assert_eq!(stats.mean, 3.5);
    }

    #[test]
    fn test_constant_window_has_zero_ci() {
        let stats = PowerStats::from_readings(&[4.2; 10]).unwrap();
        assert!(stats.ci < 1e-12);
        assert_eq!(stats.median, 4.2);
    }

    #[test]
    fn test_empty_window_is_an_error() {
        assert_eq!(PowerStats::from_readings(&[]), Err(StatsError::NoSamples));
    }
}
