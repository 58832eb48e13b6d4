//! Submission combiner
//!
//! Runs every category aggregator over one submission bundle and assembles the new snapshot.
//! A caller only needs the latest snapshot plus newly arrived raw data to compute the next
//! snapshot; raw history is never re-read.

use super::{
    CostAggregator, CpuAggregator, ExecutionAggregator, ExecutionStatusAggregator,
    ExecutionTimeAggregator, MemoryAggregator, ValidationStatusAggregator,
};
use crate::models::{ALL_PLATFORMS, ExecutionsRequestBody, Metrics};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCombiner {
    execution_status: ExecutionStatusAggregator,
    execution_time: ExecutionTimeAggregator,
    cpu: CpuAggregator,
    memory: MemoryAggregator,
    cost: CostAggregator,
    validation_status: ValidationStatusAggregator,
}

impl MetricsCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// New snapshot for one bundle, `None` when no category has data
    ///
    /// Time-series counts are relative to the moment they were computed and are not carried
    /// over from prior snapshots.
    pub fn aggregate(&self, request: &ExecutionsRequestBody) -> Option<Metrics> {
        let metrics = Metrics {
            execution_status_count: self.execution_status.aggregate(request),
            execution_time: self.execution_time.aggregate(request),
            cpu: self.cpu.aggregate(request),
            memory: self.memory.aggregate(request),
            cost: self.cost.aggregate(request),
            validation_status: self.validation_status.aggregate(request),
            ..Default::default()
        };

        if metrics.is_empty() { None } else { Some(metrics) }
    }

    /// Merge already emitted snapshots
    pub fn merge_snapshots(&self, snapshots: &[Metrics]) -> Option<Metrics> {
        self.aggregate(&ExecutionsRequestBody {
            aggregated_executions: snapshots.to_vec(),
            ..Default::default()
        })
    }

    /// Aggregate each platform's bundle and synthesize the `ALL` rollup
    ///
    /// Platforms without data are omitted. `ALL` merges every platform's new snapshot, so a
    /// bundle keyed `ALL` in the input is ignored.
    pub fn aggregate_platforms(
        &self,
        bundles: &BTreeMap<String, ExecutionsRequestBody>,
    ) -> BTreeMap<String, Metrics> {
        let mut results: BTreeMap<String, Metrics> = BTreeMap::new();

        for (platform, bundle) in bundles {
            if platform == ALL_PLATFORMS {
                debug!("Ignoring input bundle labelled {}, the rollup is synthesized", ALL_PLATFORMS);
                continue;
            }
            match self.aggregate(bundle) {
                Some(metrics) => {
                    results.insert(platform.clone(), metrics);
                },
                None => debug!("No metrics for platform {}", platform),
            }
        }

        let per_platform: Vec<Metrics> = results.values().cloned().collect();
        if let Some(all) = self.merge_snapshots(&per_platform) {
            results.insert(ALL_PLATFORMS.to_string(), all);
        }

        results
    }
}
