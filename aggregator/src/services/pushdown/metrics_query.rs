//! Push-down execution status query
//!
//! One query groups by `CUBE(platform, executionstatus)`. Rows with a concrete status feed the
//! per-status count map along with that status' numeric sub-metrics; the status-rollup row of
//! each platform feeds the platform's top-level numeric metrics.

use super::query_builder::{Expr, ROLLUP_LABEL, SelectQuery};
use super::query_runner::{QueryResultSet, ResultRow};
use super::statistic_query::{COST_COLUMN, CPU_COLUMN, EXECUTION_TIME_COLUMN, MEMORY_COLUMN, StatisticColumn};
use super::{EXECUTIONS_CTE, ExecutionTable, PLATFORM_COLUMN, rows_by_platform, with_executions};
use crate::models::{ExecutionStatusMetric, Metrics, MetricsByStatus, PartitionKey};
use std::collections::BTreeMap;

pub const STATUS_COLUMN: &str = "executionstatus";
pub const EXECUTION_COUNT: &str = "execution_count";

#[derive(Debug, Clone, Copy)]
pub struct ExecutionMetricsQuery {
    execution_time: StatisticColumn,
    cpu: StatisticColumn,
    memory: StatisticColumn,
    cost: StatisticColumn,
}

impl Default for ExecutionMetricsQuery {
    fn default() -> Self {
        Self { execution_time: EXECUTION_TIME_COLUMN, cpu: CPU_COLUMN, memory: MEMORY_COLUMN, cost: COST_COLUMN }
    }
}

impl ExecutionMetricsQuery {
    pub fn build(&self, table: &ExecutionTable, key: &PartitionKey) -> SelectQuery {
        let mut query = with_executions(SelectQuery::from_cte(EXECUTIONS_CTE), table, key)
            .select(Expr::rollup_label(PLATFORM_COLUMN), PLATFORM_COLUMN)
            .select(Expr::rollup_label(STATUS_COLUMN), STATUS_COLUMN)
            .select(Expr::call("count", vec![Expr::Star]), EXECUTION_COUNT);

        for column in [self.execution_time, self.cpu, self.memory, self.cost] {
            query = query.select_fields(column.select_fields());
        }

        query.cube([Expr::col(PLATFORM_COLUMN), Expr::col(STATUS_COLUMN)])
    }

    fn by_status(&self, row: &ResultRow<'_>) -> MetricsByStatus {
        MetricsByStatus {
            execution_status_count: row.get_u64(EXECUTION_COUNT).unwrap_or(0),
            execution_time: self.execution_time.metric_from_row(row),
            cpu: self.cpu.metric_from_row(row),
            memory: self.memory.metric_from_row(row),
            cost: self.cost.metric_from_row(row),
        }
    }

    /// Platform (including `ALL`) -> metrics
    pub fn parse(&self, result: &QueryResultSet) -> BTreeMap<String, Metrics> {
        let mut metrics_by_platform = BTreeMap::new();

        for (platform, rows) in rows_by_platform(result) {
            let mut metrics = Metrics::default();
            let mut count = BTreeMap::new();

            for row in rows {
                match row.get(STATUS_COLUMN) {
                    Some(ROLLUP_LABEL) => {
                        metrics.execution_time = self.execution_time.metric_from_row(&row);
                        metrics.cpu = self.cpu.metric_from_row(&row);
                        metrics.memory = self.memory.metric_from_row(&row);
                        metrics.cost = self.cost.metric_from_row(&row);
                    },
                    Some(status) => {
                        let by_status = self.by_status(&row);
                        if by_status.execution_status_count > 0 {
                            count.insert(status.to_string(), by_status);
                        }
                    },
                    None => tracing::warn!("Skipping {} rows without an execution status", platform),
                }
            }

            if !count.is_empty() {
                metrics.execution_status_count = Some(ExecutionStatusMetric { count });
            }
            if !metrics.is_empty() {
                metrics_by_platform.insert(platform, metrics);
            }
        }

        metrics_by_platform
    }
}
