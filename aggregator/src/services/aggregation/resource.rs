//! CPU and memory aggregators
//!
//! A workflow's requirement is the maximum over its tasks: tasks may run concurrently, so the
//! workflow needs at least what its most demanding task needs.

use super::{NumericAggregator, derived_workflow_execution};
use crate::models::{CPU_UNIT, MEMORY_UNIT, Metrics, MetricsByStatus, RunExecution, StatisticMetric, TaskExecutions};

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuAggregator;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryAggregator;

impl NumericAggregator for CpuAggregator {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn unit(&self) -> &'static str {
        CPU_UNIT
    }

    fn value_of(&self, execution: &RunExecution) -> Option<f64> {
        execution.cpu_requirements.map(|cpu| cpu as f64)
    }

    fn from_snapshot<'a>(&self, snapshot: &'a Metrics) -> Option<&'a StatisticMetric> {
        snapshot.cpu.as_ref()
    }

    fn from_status<'a>(&self, metrics: &'a MetricsByStatus) -> Option<&'a StatisticMetric> {
        metrics.cpu.as_ref()
    }

    fn workflow_execution_from_tasks(&self, tasks: &TaskExecutions) -> Option<RunExecution> {
        let max_cpu = tasks.task_executions.iter().filter_map(|t| t.cpu_requirements).max()?;
        let mut execution = derived_workflow_execution(tasks)?;
        execution.cpu_requirements = Some(max_cpu);
        Some(execution)
    }
}

impl NumericAggregator for MemoryAggregator {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn unit(&self) -> &'static str {
        MEMORY_UNIT
    }

    fn value_of(&self, execution: &RunExecution) -> Option<f64> {
        execution.memory_requirements_gb
    }

    fn from_snapshot<'a>(&self, snapshot: &'a Metrics) -> Option<&'a StatisticMetric> {
        snapshot.memory.as_ref()
    }

    fn from_status<'a>(&self, metrics: &'a MetricsByStatus) -> Option<&'a StatisticMetric> {
        metrics.memory.as_ref()
    }

    fn workflow_execution_from_tasks(&self, tasks: &TaskExecutions) -> Option<RunExecution> {
        let max_memory = tasks
            .task_executions
            .iter()
            .filter_map(|t| t.memory_requirements_gb)
            .fold(None, |max: Option<f64>, memory| Some(max.map_or(memory, |m| m.max(memory))))?;
        let mut execution = derived_workflow_execution(tasks)?;
        execution.memory_requirements_gb = Some(max_memory);
        Some(execution)
    }
}
