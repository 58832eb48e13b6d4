//! In-process metrics aggregation
//!
//! Every metric category implements [`ExecutionAggregator`]:
//! - extract its metric from a prior snapshot
//! - derive a workflow-level record from task-level records
//! - aggregate raw executions into a new metric
//! - merge metrics of several snapshots
//!
//! The provided [`ExecutionAggregator::aggregate`] runs the incremental protocol for one
//! submission bundle. It is append-only and NOT idempotent: applying the same raw batch twice
//! against a snapshot that already contains it counts it twice.

pub mod combiner;
pub mod cost;
pub mod execution_status;
pub mod execution_time;
pub mod resource;
pub mod validation_status;

pub use combiner::MetricsCombiner;
pub use cost::CostAggregator;
pub use execution_status::{ExecutionStatusAggregator, reduce_task_statuses};
pub use execution_time::ExecutionTimeAggregator;
pub use resource::{CpuAggregator, MemoryAggregator};
pub use validation_status::ValidationStatusAggregator;

use crate::models::{
    ExecutionsRequestBody, Metrics, MetricsByStatus, RunExecution, Statistic, StatisticMetric,
    TaskExecutions,
};

/// Aggregation contract of one metric category
pub trait ExecutionAggregator {
    type Metric: Clone;
    type Execution: Clone;

    /// Category name used in log lines
    fn name(&self) -> &'static str;

    /// This category's metric inside a prior snapshot
    fn metric_from_snapshot(&self, snapshot: &Metrics) -> Option<Self::Metric>;

    /// Raw executions of this category in a submission bundle
    fn raw_executions(&self, request: &ExecutionsRequestBody) -> Vec<Self::Execution>;

    /// Workflow-level record derived from one run's task-level records
    fn workflow_execution_from_tasks(&self, _tasks: &TaskExecutions) -> Option<Self::Execution> {
        None
    }

    /// Aggregate raw executions; `None` when none carries data for this category
    fn aggregate_executions(&self, executions: &[Self::Execution]) -> Option<Self::Metric>;

    /// Merge metrics of disjoint execution sets; `None` when the list is empty
    fn merge_metrics(&self, metrics: &[Self::Metric]) -> Option<Self::Metric>;

    /// Aggregate one submission bundle
    ///
    /// 1. derive workflow records from every task group and append them to the raw records
    /// 2. aggregate the raw records into one new metric
    /// 3. merge it with every prior snapshot's metric of this category
    fn aggregate(&self, request: &ExecutionsRequestBody) -> Option<Self::Metric> {
        let mut executions = self.raw_executions(request);
        executions.extend(
            request.task_executions.iter().filter_map(|tasks| self.workflow_execution_from_tasks(tasks)),
        );

        let mut metrics: Vec<Self::Metric> = Vec::with_capacity(request.aggregated_executions.len() + 1);
        if let Some(metric) = self.aggregate_executions(&executions) {
            metrics.push(metric);
        }
        metrics.extend(
            request.aggregated_executions.iter().filter_map(|snapshot| self.metric_from_snapshot(snapshot)),
        );

        let merged = self.merge_metrics(&metrics);
        if merged.is_none() {
            tracing::debug!("No {} data to aggregate", self.name());
        }
        merged
    }
}

/// Numeric categories summarised by a [`Statistic`]
pub trait NumericAggregator {
    fn name(&self) -> &'static str;

    fn unit(&self) -> &'static str;

    /// Sample contributed by one execution, if it has one
    fn value_of(&self, execution: &RunExecution) -> Option<f64>;

    fn from_snapshot<'a>(&self, snapshot: &'a Metrics) -> Option<&'a StatisticMetric>;

    fn from_status<'a>(&self, metrics: &'a MetricsByStatus) -> Option<&'a StatisticMetric>;

    /// Workflow-level record carrying this category's derived value
    fn workflow_execution_from_tasks(&self, tasks: &TaskExecutions) -> Option<RunExecution>;

    fn aggregate_values(&self, executions: &[RunExecution]) -> Option<StatisticMetric> {
        let samples: Vec<f64> = executions.iter().filter_map(|e| self.value_of(e)).collect();
        Statistic::from_samples(&samples).map(|statistic| StatisticMetric::new(statistic, self.unit()))
    }

    fn merge_values(&self, metrics: &[StatisticMetric]) -> Option<StatisticMetric> {
        match metrics {
            [single] => Some(single.clone()),
            many => {
                let statistics: Vec<Statistic> = many.iter().map(|m| m.statistic.clone()).collect();
                Statistic::merge(&statistics).map(|statistic| StatisticMetric::new(statistic, self.unit()))
            },
        }
    }
}

impl<T: NumericAggregator> ExecutionAggregator for T {
    type Metric = StatisticMetric;
    type Execution = RunExecution;

    fn name(&self) -> &'static str {
        NumericAggregator::name(self)
    }

    fn metric_from_snapshot(&self, snapshot: &Metrics) -> Option<StatisticMetric> {
        self.from_snapshot(snapshot).cloned()
    }

    fn raw_executions(&self, request: &ExecutionsRequestBody) -> Vec<RunExecution> {
        request.run_executions.clone()
    }

    fn workflow_execution_from_tasks(&self, tasks: &TaskExecutions) -> Option<RunExecution> {
        NumericAggregator::workflow_execution_from_tasks(self, tasks)
    }

    fn aggregate_executions(&self, executions: &[RunExecution]) -> Option<StatisticMetric> {
        self.aggregate_values(executions)
    }

    fn merge_metrics(&self, metrics: &[StatisticMetric]) -> Option<StatisticMetric> {
        self.merge_values(metrics)
    }
}

/// Skeleton of a workflow record derived from a task group
///
/// Carries the group's identity and the derived status; callers fill in the field their
/// category derives. `None` for an empty task group.
pub(crate) fn derived_workflow_execution(tasks: &TaskExecutions) -> Option<RunExecution> {
    let status = reduce_task_statuses(&tasks.task_executions)?;
    let mut execution = RunExecution::new(status);
    execution.execution_id = tasks.execution_id.clone();
    execution.date_executed = tasks.date_executed.clone().or_else(|| {
        tasks
            .task_executions
            .iter()
            .filter_map(|task| task.date_executed.as_deref())
            .filter_map(|date| crate::utils::parse_timestamp(date).ok().map(|parsed| (parsed, date)))
            .min_by_key(|(parsed, _)| *parsed)
            .map(|(_, date)| date.to_string())
    });
    Some(execution)
}
