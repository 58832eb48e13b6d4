//! Cost aggregator
//!
//! Costs are aggregated by magnitude in a single currency. A workflow's cost is the sum of its
//! task costs, and only when every task reports one in the same currency; mixing currencies
//! has no conversion policy, so such a group derives no cost.

use super::{NumericAggregator, derived_workflow_execution};
use crate::models::{COST_UNIT, Cost, Metrics, MetricsByStatus, RunExecution, StatisticMetric, TaskExecutions};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct CostAggregator;

impl NumericAggregator for CostAggregator {
    fn name(&self) -> &'static str {
        "cost"
    }

    fn unit(&self) -> &'static str {
        COST_UNIT
    }

    fn value_of(&self, execution: &RunExecution) -> Option<f64> {
        execution.cost.as_ref().map(|cost| cost.value)
    }

    fn from_snapshot<'a>(&self, snapshot: &'a Metrics) -> Option<&'a StatisticMetric> {
        snapshot.cost.as_ref()
    }

    fn from_status<'a>(&self, metrics: &'a MetricsByStatus) -> Option<&'a StatisticMetric> {
        metrics.cost.as_ref()
    }

    fn workflow_execution_from_tasks(&self, tasks: &TaskExecutions) -> Option<RunExecution> {
        let costs: Option<Vec<&Cost>> = tasks.task_executions.iter().map(|t| t.cost.as_ref()).collect();
        let costs = costs.filter(|costs| !costs.is_empty())?;

        let currency = &costs[0].currency;
        if costs.iter().any(|cost| &cost.currency != currency) {
            warn!(
                "Task costs of {} use more than one currency, not deriving a workflow cost",
                tasks.execution_id.as_deref().unwrap_or("<no execution id>")
            );
            return None;
        }

        let total = costs.iter().map(|cost| cost.value).sum();
        let mut execution = derived_workflow_execution(tasks)?;
        execution.cost = Some(Cost { value: total, currency: currency.clone() });
        Some(execution)
    }
}
