//! Aggregation runner
//!
//! Lists every partition in storage, aggregates each one on the worker pool and posts the
//! metrics of every platform (plus `ALL`) to the webservice. A failing partition is logged and
//! counted; the run carries on with the others.

use crate::models::{ALL_PLATFORMS, ExecutionsRequestBody, Metrics, PartitionKey};
use crate::services::aggregation::MetricsCombiner;
use crate::services::execution_store::ExecutionStore;
use crate::services::pushdown::{DailyBins, MonthlyBins, PushdownAggregator, TimeSeriesWindow, WeeklyBins};
use crate::services::webservice_client::MetricsWebservice;
use crate::services::worker_pool::{WorkCounters, WorkSummary, WorkerPool};
use crate::utils::{AggregatorResult, parse_timestamp};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub enum AggregationMode {
    /// Load raw executions from storage and aggregate them locally
    InProcess,
    /// Aggregate inside the analytical query service
    Pushdown(PushdownAggregator),
}

/// Dates of every workflow run in a bundle, including runs only reported as task groups
fn run_dates(bundle: &ExecutionsRequestBody) -> impl Iterator<Item = &str> {
    let runs = bundle.run_executions.iter().filter_map(|e| e.date_executed.as_deref());
    let task_runs = bundle.task_executions.iter().filter_map(|group| {
        group.date_executed.as_deref().or_else(|| {
            group
                .task_executions
                .iter()
                .filter_map(|t| t.date_executed.as_deref())
                .filter_map(|d| parse_timestamp(d).ok().map(|ts| (ts, d)))
                .min_by_key(|(ts, _)| *ts)
                .map(|(_, d)| d)
        })
    });
    runs.chain(task_runs)
}

#[derive(Clone)]
struct InProcessAggregator {
    combiner: MetricsCombiner,
    daily: TimeSeriesWindow<DailyBins>,
    weekly: TimeSeriesWindow<WeeklyBins>,
    monthly: TimeSeriesWindow<MonthlyBins>,
}

impl InProcessAggregator {
    fn new() -> Self {
        Self {
            combiner: MetricsCombiner::new(),
            daily: TimeSeriesWindow::daily(),
            weekly: TimeSeriesWindow::weekly(),
            monthly: TimeSeriesWindow::monthly(),
        }
    }

    fn add_time_series(&self, metrics: &mut Metrics, bundles: &[&ExecutionsRequestBody], now: DateTime<Utc>) {
        let dates: Vec<&str> = bundles.iter().copied().flat_map(run_dates).collect();
        if dates.is_empty() {
            return;
        }
        metrics.daily_execution_counts = Some(self.daily.count_dates(dates.iter().copied(), now));
        metrics.weekly_execution_counts = Some(self.weekly.count_dates(dates.iter().copied(), now));
        metrics.monthly_execution_counts = Some(self.monthly.count_dates(dates.iter().copied(), now));
    }

    fn aggregate(
        &self,
        bundles: &BTreeMap<String, ExecutionsRequestBody>,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, Metrics> {
        let mut metrics = self.combiner.aggregate_platforms(bundles);
        for (platform, platform_metrics) in metrics.iter_mut() {
            let sources: Vec<&ExecutionsRequestBody> = if platform == ALL_PLATFORMS {
                bundles.iter().filter(|(p, _)| p.as_str() != ALL_PLATFORMS).map(|(_, b)| b).collect()
            } else {
                bundles.get(platform).into_iter().collect()
            };
            self.add_time_series(platform_metrics, &sources, now);
        }
        metrics
    }
}

pub struct AggregationRunner {
    store: Arc<dyn ExecutionStore>,
    webservice: Arc<dyn MetricsWebservice>,
    mode: AggregationMode,
    in_process: InProcessAggregator,
    pool: WorkerPool,
    dry_run: bool,
}

impl AggregationRunner {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        webservice: Arc<dyn MetricsWebservice>,
        mode: AggregationMode,
        workers: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            webservice,
            mode,
            in_process: InProcessAggregator::new(),
            pool: WorkerPool::new(workers),
            dry_run,
        }
    }

    pub async fn run(&self) -> AggregatorResult<WorkSummary> {
        self.run_at(Utc::now()).await
    }

    /// Aggregate every partition with time series ending at `now`
    ///
    /// Only a failure to list partitions fails the run.
    pub async fn run_at(&self, now: DateTime<Utc>) -> AggregatorResult<WorkSummary> {
        let partitions = self.store.list_partitions().await?;
        tracing::info!(
            "Aggregating {} partitions with {} ({})",
            partitions.len(),
            match self.mode {
                AggregationMode::InProcess => "in-process aggregation",
                AggregationMode::Pushdown(_) => "push-down queries",
            },
            if self.dry_run { "dry run" } else { "posting results" }
        );

        let counters = Arc::new(WorkCounters::new());
        self.pool
            .run_all(partitions, |key| {
                let unit = PartitionUnit {
                    store: self.store.clone(),
                    webservice: self.webservice.clone(),
                    mode: self.mode.clone(),
                    in_process: self.in_process.clone(),
                    counters: counters.clone(),
                    dry_run: self.dry_run,
                };
                async move { unit.process(key, now).await }
            })
            .await;

        let summary = counters.summary();
        tracing::info!(
            "Aggregation finished: {} partitions processed, {} metrics posted, {} skipped, {} failed",
            summary.processed,
            summary.submitted,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }
}

/// Everything one worker needs to handle a partition
struct PartitionUnit {
    store: Arc<dyn ExecutionStore>,
    webservice: Arc<dyn MetricsWebservice>,
    mode: AggregationMode,
    in_process: InProcessAggregator,
    counters: Arc<WorkCounters>,
    dry_run: bool,
}

impl PartitionUnit {
    async fn aggregate(&self, key: &PartitionKey, now: DateTime<Utc>) -> AggregatorResult<BTreeMap<String, Metrics>> {
        match &self.mode {
            AggregationMode::InProcess => {
                let bundles = self.store.list(key).await?;
                Ok(self.in_process.aggregate(&bundles, now))
            },
            AggregationMode::Pushdown(pushdown) => pushdown.aggregate_at(key, now).await,
        }
    }

    async fn process(self, key: PartitionKey, now: DateTime<Utc>) {
        let metrics = match self.aggregate(&key, now).await {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!("Failed to aggregate {}: {}", key, e);
                self.counters.failed();
                return;
            },
        };
        self.counters.processed();

        if metrics.is_empty() {
            tracing::info!("No metrics for {}", key);
            self.counters.skipped(1);
            return;
        }

        for (platform, platform_metrics) in &metrics {
            if self.dry_run {
                tracing::info!("Dry run: would post {} metrics for {}", platform, key);
                continue;
            }
            match self.webservice.post_aggregated_metrics(&key, platform, platform_metrics).await {
                Ok(()) => self.counters.submitted(),
                Err(e) => {
                    tracing::warn!("Failed to post {} metrics for {}: {}", platform, key, e);
                    self.counters.failed();
                },
            }
        }
    }
}
