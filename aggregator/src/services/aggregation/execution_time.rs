//! Execution time aggregator
//!
//! Durations arrive as ISO-8601 strings and are aggregated in seconds. A malformed duration
//! drops that one execution from the time metric and is logged; it never fails the batch.

use super::{NumericAggregator, derived_workflow_execution};
use crate::models::{EXECUTION_TIME_UNIT, Metrics, MetricsByStatus, RunExecution, StatisticMetric, TaskExecutions};
use crate::utils::{format_duration_seconds, parse_duration_seconds, parse_timestamp};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionTimeAggregator;

impl ExecutionTimeAggregator {
    /// Wall-clock approximation of a multi-task run
    ///
    /// One task: its own duration. Several: the span from the earliest to the latest task
    /// `dateExecuted`, assuming tasks run back to back. Every task must carry a parseable date.
    fn workflow_seconds_from_tasks(&self, tasks: &TaskExecutions) -> Option<f64> {
        match tasks.task_executions.as_slice() {
            [] => None,
            [single] => self.value_of(single),
            many => {
                let mut dates = Vec::with_capacity(many.len());
                for task in many {
                    let Some(date) = task.date_executed.as_deref() else {
                        warn!(
                            "Task {} has no dateExecuted, cannot derive workflow execution time for {}",
                            task.display_id(),
                            tasks.execution_id.as_deref().unwrap_or("<no execution id>")
                        );
                        return None;
                    };
                    match parse_timestamp(date) {
                        Ok(parsed) => dates.push(parsed),
                        Err(e) => {
                            warn!("Dropping task group execution time: {}", e);
                            return None;
                        },
                    }
                }

                let earliest = dates.iter().min()?;
                let latest = dates.iter().max()?;
                Some((*latest - *earliest).num_milliseconds() as f64 / 1000.0)
            },
        }
    }
}

impl NumericAggregator for ExecutionTimeAggregator {
    fn name(&self) -> &'static str {
        "execution time"
    }

    fn unit(&self) -> &'static str {
        EXECUTION_TIME_UNIT
    }

    fn value_of(&self, execution: &RunExecution) -> Option<f64> {
        let raw = execution.execution_time.as_deref()?;
        match parse_duration_seconds(raw) {
            Ok(seconds) if seconds < 0.0 => {
                warn!("Skipping execution time of {}: negative duration {}", execution.display_id(), raw);
                None
            },
            Ok(seconds) => Some(seconds),
            Err(e) => {
                warn!("Skipping execution time of {}: {}", execution.display_id(), e);
                None
            },
        }
    }

    fn from_snapshot<'a>(&self, snapshot: &'a Metrics) -> Option<&'a StatisticMetric> {
        snapshot.execution_time.as_ref()
    }

    fn from_status<'a>(&self, metrics: &'a MetricsByStatus) -> Option<&'a StatisticMetric> {
        metrics.execution_time.as_ref()
    }

    fn workflow_execution_from_tasks(&self, tasks: &TaskExecutions) -> Option<RunExecution> {
        let seconds = self.workflow_seconds_from_tasks(tasks)?;
        let mut execution = derived_workflow_execution(tasks)?;
        execution.execution_time = Some(format_duration_seconds(seconds));
        Some(execution)
    }
}
