//! Execution status aggregator
//!
//! Counts executions per status. Each status also carries the execution time, cpu, memory and
//! cost statistics of its own executions, computed by the numeric aggregators.

use super::{
    CostAggregator, CpuAggregator, ExecutionAggregator, ExecutionTimeAggregator, MemoryAggregator,
    NumericAggregator, derived_workflow_execution,
};
use crate::models::{
    ExecutionStatus, ExecutionStatusMetric, ExecutionsRequestBody, Metrics, MetricsByStatus,
    RunExecution, StatisticMetric, TaskExecutions,
};
use std::collections::{BTreeMap, HashMap};

/// Status of a workflow derived from its task statuses
///
/// Successful when every task succeeded; otherwise the most frequent non-successful status,
/// ties going to the lexicographically smallest label. `None` for no tasks.
pub fn reduce_task_statuses(tasks: &[RunExecution]) -> Option<ExecutionStatus> {
    if tasks.is_empty() {
        return None;
    }

    let mut failures: HashMap<ExecutionStatus, usize> = HashMap::new();
    for task in tasks.iter().filter(|t| t.execution_status != ExecutionStatus::Successful) {
        *failures.entry(task.execution_status).or_default() += 1;
    }

    let most_frequent = failures
        .into_iter()
        .max_by(|(a, a_count), (b, b_count)| a_count.cmp(b_count).then_with(|| b.as_str().cmp(a.as_str())))
        .map(|(status, _)| status);

    Some(most_frequent.unwrap_or(ExecutionStatus::Successful))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionStatusAggregator {
    execution_time: ExecutionTimeAggregator,
    cpu: CpuAggregator,
    memory: MemoryAggregator,
    cost: CostAggregator,
}

impl ExecutionStatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn metrics_by_status(&self, executions: &[RunExecution]) -> MetricsByStatus {
        MetricsByStatus {
            execution_status_count: executions.len() as u64,
            execution_time: self.execution_time.aggregate_values(executions),
            cpu: self.cpu.aggregate_values(executions),
            memory: self.memory.aggregate_values(executions),
            cost: self.cost.aggregate_values(executions),
        }
    }

    fn merge_by_status(&self, metrics: &[&MetricsByStatus]) -> MetricsByStatus {
        fn merged<A: NumericAggregator>(
            aggregator: &A,
            metrics: &[&MetricsByStatus],
        ) -> Option<StatisticMetric> {
            let parts: Vec<StatisticMetric> =
                metrics.iter().filter_map(|m| aggregator.from_status(m)).cloned().collect();
            aggregator.merge_values(&parts)
        }

        MetricsByStatus {
            execution_status_count: metrics.iter().map(|m| m.execution_status_count).sum(),
            execution_time: merged(&self.execution_time, metrics),
            cpu: merged(&self.cpu, metrics),
            memory: merged(&self.memory, metrics),
            cost: merged(&self.cost, metrics),
        }
    }
}

impl ExecutionAggregator for ExecutionStatusAggregator {
    type Metric = ExecutionStatusMetric;
    type Execution = RunExecution;

    fn name(&self) -> &'static str {
        "execution status"
    }

    fn metric_from_snapshot(&self, snapshot: &Metrics) -> Option<ExecutionStatusMetric> {
        snapshot.execution_status_count.clone()
    }

    fn raw_executions(&self, request: &ExecutionsRequestBody) -> Vec<RunExecution> {
        request.run_executions.clone()
    }

    /// Derived status plus every other category's derived value
    fn workflow_execution_from_tasks(&self, tasks: &TaskExecutions) -> Option<RunExecution> {
        let mut execution = derived_workflow_execution(tasks)?;
        execution.execution_time = NumericAggregator::workflow_execution_from_tasks(&self.execution_time, tasks)
            .and_then(|e| e.execution_time);
        execution.cpu_requirements =
            NumericAggregator::workflow_execution_from_tasks(&self.cpu, tasks).and_then(|e| e.cpu_requirements);
        execution.memory_requirements_gb = NumericAggregator::workflow_execution_from_tasks(&self.memory, tasks)
            .and_then(|e| e.memory_requirements_gb);
        execution.cost = NumericAggregator::workflow_execution_from_tasks(&self.cost, tasks).and_then(|e| e.cost);
        Some(execution)
    }

    fn aggregate_executions(&self, executions: &[RunExecution]) -> Option<ExecutionStatusMetric> {
        if executions.is_empty() {
            return None;
        }

        let mut grouped: BTreeMap<ExecutionStatus, Vec<RunExecution>> = BTreeMap::new();
        for execution in executions {
            grouped.entry(execution.execution_status).or_default().push(execution.clone());
        }

        let count = grouped
            .into_iter()
            .map(|(status, executions)| (status.as_str().to_string(), self.metrics_by_status(&executions)))
            .collect();
        Some(ExecutionStatusMetric { count })
    }

    fn merge_metrics(&self, metrics: &[ExecutionStatusMetric]) -> Option<ExecutionStatusMetric> {
        match metrics {
            [] => None,
            [single] => Some(single.clone()),
            many => {
                let mut by_status: BTreeMap<&str, Vec<&MetricsByStatus>> = BTreeMap::new();
                for metric in many {
                    for (status, by) in &metric.count {
                        by_status.entry(status.as_str()).or_default().push(by);
                    }
                }

                let count = by_status
                    .into_iter()
                    .map(|(status, parts)| (status.to_string(), self.merge_by_status(&parts)))
                    .collect();
                Some(ExecutionStatusMetric { count })
            },
        }
    }
}
