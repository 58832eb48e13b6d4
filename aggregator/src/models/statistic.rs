//! Statistic: the merge primitive behind every numeric metric
//!
//! A `Statistic` summarises a non-empty sample set. It is built either from raw samples or by
//! merging other statistics; "no data" is always `None`, never a zero-valued statistic.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistic {
    pub minimum: f64,
    pub maximum: f64,
    pub average: f64,
    /// Number of samples behind `average`, used to weight merges
    pub number_of_data_points_for_average: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(default, rename = "percentile05th", skip_serializing_if = "Option::is_none")]
    pub percentile_05th: Option<f64>,
    #[serde(default, rename = "percentile95th", skip_serializing_if = "Option::is_none")]
    pub percentile_95th: Option<f64>,
}

impl Statistic {
    /// Summary of exactly the given values, without percentiles
    pub fn new(minimum: f64, maximum: f64, average: f64, count: u64) -> Self {
        Self {
            minimum,
            maximum,
            average,
            number_of_data_points_for_average: count,
            median: None,
            percentile_05th: None,
            percentile_95th: None,
        }
    }

    pub fn count(&self) -> u64 {
        self.number_of_data_points_for_average
    }

    /// Compute a statistic from raw samples
    ///
    /// Percentiles are exact (nearest-rank) because every sample is at hand. Returns `None`
    /// for an empty sample list.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = sorted.iter().sum();
        let count = sorted.len();

        Some(Self {
            minimum: sorted[0],
            maximum: sorted[count - 1],
            average: sum / count as f64,
            number_of_data_points_for_average: count as u64,
            median: Some(nearest_rank(&sorted, 0.50)),
            percentile_05th: Some(nearest_rank(&sorted, 0.05)),
            percentile_95th: Some(nearest_rank(&sorted, 0.95)),
        })
    }

    /// Merge statistics of disjoint sample sets
    ///
    /// The average is weighted by sample count. A single input is returned unchanged so no
    /// floating-point drift is introduced. Percentiles of several inputs cannot be combined
    /// exactly and are dropped. Returns `None` when there is nothing to merge.
    pub fn merge(statistics: &[Statistic]) -> Option<Self> {
        let populated: Vec<&Statistic> = statistics.iter().filter(|s| s.count() > 0).collect();

        match populated.as_slice() {
            [] => None,
            [single] => Some((*single).clone()),
            many => {
                let count: u64 = many.iter().map(|s| s.count()).sum();
                let weighted_sum: f64 = many.iter().map(|s| s.average * s.count() as f64).sum();
                let minimum = many.iter().map(|s| s.minimum).fold(f64::INFINITY, f64::min);
                let maximum = many.iter().map(|s| s.maximum).fold(f64::NEG_INFINITY, f64::max);

                Some(Self::new(minimum, maximum, weighted_sum / count as f64, count))
            },
        }
    }
}

fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let rank = (percentile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
