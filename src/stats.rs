//! Summary statistics for latency and reading series.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Statistical summary of a series of values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Average value
    pub mean: f64,
    /// Sample standard deviation (n - 1); zero for a single value
    pub std_dev: f64,
    /// Number of values
    pub count: usize,
}

impl SampleStats {
    /// Summarize `values`. Returns `None` for an empty series.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;

        let std_dev = if values.len() > 1 {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (values.len() - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(SampleStats {
            min,
            max,
            mean,
            std_dev,
            count: values.len(),
        })
    }

    /// Summarize durations in milliseconds.
    pub fn from_durations(durations: &[Duration]) -> Option<Self> {
        let millis: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        Self::from_values(&millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_series() {
        assert!(SampleStats::from_values(&[]).is_none());
    }

    #[test]
    fn test_single_value_has_zero_deviation() {
        let stats = SampleStats::from_values(&[21.5]).unwrap();
        assert_eq!(stats.min, 21.5);
        assert_eq!(stats.max, 21.5);
        assert_eq!(stats.mean, 21.5);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn test_sample_standard_deviation() {
        // mean 5, squared deviations sum to 32, n - 1 = 7
        let stats = SampleStats::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.mean, 5.0);
        assert!((stats.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
    }

    #[test]
    fn test_durations_in_millis() {
        let stats = SampleStats::from_durations(&[
            Duration::from_millis(10),
            Duration::from_millis(30),
        ])
        .unwrap();
        assert!((stats.mean - 20.0).abs() < 1e-9);
        assert!((stats.min - 10.0).abs() < 1e-9);
    }
}
