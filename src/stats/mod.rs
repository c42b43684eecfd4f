//! Statistical calculations for latency and throughput samples
//!
//! Everything here is pure arithmetic over already-measured values. No
//! function substitutes a floor or default for missing data: an empty input
//! yields `None`, and the caller decides how to report the failure.

use serde::{Deserialize, Serialize};

/// Summary statistics over a set of successful samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleStatistics {
    /// Number of samples summarised
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// 50th percentile (linear interpolation)
    pub median: f64,
}

impl SampleStatistics {
    /// Calculate statistics from raw values; `None` when there are none
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = within_range(mean(values)?, min, max);

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Some(Self {
            count: values.len(),
            mean,
            min,
            max,
            std_dev: population_std_dev(values, mean),
            median: percentile(&sorted, 50.0)?,
        })
    }
}

/// Pull a rounded aggregate back into `[min, max]`.
///
/// Summation can land one step outside the range of the values it was
/// computed from.
pub fn within_range(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
///
/// Jitter is defined over the samples of one run, not as an estimate of a
/// wider population, so the population form is the right one here.
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }

    let variance = values.iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// Percentile over sorted values using linear interpolation between ranks
pub fn percentile(sorted_values: &[f64], percentile: f64) -> Option<f64> {
    if sorted_values.is_empty() {
        return None;
    }

    let index = (percentile.clamp(0.0, 100.0) / 100.0) * (sorted_values.len() as f64 - 1.0);
    let lower_index = index.floor() as usize;
    let upper_index = index.ceil() as usize;

    if lower_index == upper_index {
        Some(sorted_values[lower_index])
    } else {
        let lower_value = sorted_values[lower_index];
        let upper_value = sorted_values[upper_index];
        let weight = index - lower_index as f64;
        Some(lower_value + weight * (upper_value - lower_value))
    }
}

/// Fraction of attempts that failed; `None` when nothing was attempted
pub fn packet_loss(failed: u32, attempted: u32) -> Option<f64> {
    if attempted == 0 {
        return None;
    }
    Some(failed as f64 / attempted as f64)
}

/// Throughput in bits per second: `bytes * 8 / seconds`.
///
/// Returns `None` when no bytes were moved or no time elapsed; neither case
/// is a measurement.
pub fn throughput_bps(bytes: u64, elapsed_seconds: f64) -> Option<f64> {
    if bytes == 0 || !(elapsed_seconds > 0.0) || !elapsed_seconds.is_finite() {
        return None;
    }
    Some(bytes as f64 * 8.0 / elapsed_seconds)
}
