//! Push-down aggregation
//!
//! Computes a partition's metrics inside the analytical query service instead of loading raw
//! executions. Every query groups by a `CUBE` that includes `platform`, so the cross-platform
//! `ALL` rollup comes back in the same pass as the per-platform rows.

pub mod http_backend;
pub mod metrics_query;
pub mod query_builder;
pub mod query_runner;
pub mod statistic_query;
pub mod time_series;
pub mod validation_query;

pub use http_backend::HttpQueryBackend;
pub use metrics_query::ExecutionMetricsQuery;
pub use query_runner::{QueryBackend, QueryResultSet, QueryRunner, QueryState, QueryStatus, ResultPage, ResultRow};
pub use time_series::{DailyBins, MonthlyBins, TimeSeriesWindow, WeeklyBins};
pub use validation_query::ValidationStatusQuery;

use crate::config::QueryConfig;
use crate::models::{ExecutionStatus, Metrics, PartitionKey, default_currency};
use crate::utils::AggregatorResult;
use chrono::{DateTime, Utc};
use query_builder::{Expr, SelectQuery};
use std::collections::BTreeMap;

pub const EXECUTIONS_CTE: &str = "executions";
pub const TASK_GROUPS_CTE: &str = "taskgroups";
pub const PLATFORM_COLUMN: &str = "platform";

/// Hidden column naming the file a row was read from, one file per submission
const SUBMISSION_COLUMN: &str = "\"$path\"";
const GROUP_INDEX_COLUMN: &str = "groupindex";

/// Columns every row of the executions CTE carries after `platform`, in select order
const EXECUTION_COLUMNS: [&str; 6] = [
    "executionstatus",
    "dateexecuted",
    "executiontimeseconds",
    "cpurequirements",
    "memoryrequirementsgb",
    "costvalue",
];

/// Table holding the raw submissions, one row per submitted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTable {
    pub database: String,
    pub table: String,
}

impl ExecutionTable {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self { database: database.into(), table: table.into() }
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(&config.database, &config.table)
    }
}

/// Restrict a query to one partition
pub(crate) fn partition_filters(query: SelectQuery, key: &PartitionKey) -> SelectQuery {
    [
        ("entity", &key.entity),
        ("registry", &key.registry),
        ("org", &key.org),
        ("name", &key.name),
        ("version", &key.version),
    ]
    .into_iter()
    .fold(query, |query, (column, value)| query.filter(Expr::col(column).eq(Expr::lit(value.as_str()))))
}

/// Non-successful statuses in label order
fn failure_statuses() -> Vec<ExecutionStatus> {
    let mut statuses: Vec<ExecutionStatus> =
        ExecutionStatus::ALL.into_iter().filter(|s| *s != ExecutionStatus::Successful).collect();
    statuses.sort_by_key(|s| s.as_str());
    statuses
}

fn failed_tasks_column(status: ExecutionStatus) -> String {
    format!("{}_tasks", status.as_str().to_lowercase())
}

/// One row per task group of the partition, reduced to workflow-level values
///
/// cpu and memory take the task maximum. Cost is the task sum when every task has one and they
/// share a currency. Execution time is the duration of a lone task, otherwise the span between
/// the earliest and latest task dates, which must all parse. The status is left as per-status
/// failure counts and resolved in [`derived_status`].
fn task_groups_cte(table: &ExecutionTable, key: &PartitionKey) -> SelectQuery {
    let task = |name: &str| Expr::field("task", name);
    let task_count = || Expr::call("count", vec![Expr::Star]);
    let task_date =
        || Expr::call("try", vec![Expr::call("from_iso8601_timestamp", vec![task("dateexecuted")])]);
    let currency = || Expr::call("coalesce", vec![task("cost.currency"), Expr::lit(default_currency())]);

    let mut query = SelectQuery::from_table(&table.database, &table.table)
        .unnest_with_ordinality("taskexecutions", "g", "taskgroup", GROUP_INDEX_COLUMN)
        .unnest("taskgroup.taskexecutions", "k", "task")
        .select(Expr::col(PLATFORM_COLUMN), PLATFORM_COLUMN);
    for status in failure_statuses() {
        query = query.select(
            Expr::call("count_if", vec![task("executionstatus").eq(Expr::lit(status.as_str()))]),
            failed_tasks_column(status),
        );
    }

    let span_seconds = Expr::call("to_unixtime", vec![Expr::call("max", vec![task_date()])])
        .minus(Expr::call("to_unixtime", vec![Expr::call("min", vec![task_date()])]));
    let query = query
        .select(
            Expr::call(
                "coalesce",
                vec![
                    Expr::call("arbitrary", vec![Expr::field("taskgroup", "dateexecuted")]),
                    Expr::call("min_by", vec![task("dateexecuted"), task_date()]),
                ],
            ),
            "dateexecuted",
        )
        .select(
            Expr::call(
                "if",
                vec![
                    task_count().eq(Expr::num(1.0)),
                    Expr::call("max", vec![task("executiontimeseconds")]),
                    Expr::call("if", vec![Expr::call("count", vec![task_date()]).eq(task_count()), span_seconds]),
                ],
            ),
            "executiontimeseconds",
        )
        .select(Expr::call("max", vec![task("cpurequirements")]), "cpurequirements")
        .select(Expr::call("max", vec![task("memoryrequirementsgb")]), "memoryrequirementsgb")
        .select(
            Expr::call(
                "if",
                vec![
                    Expr::call("count", vec![task("cost.value")])
                        .eq(task_count())
                        .and(Expr::call("min", vec![currency()]).eq(Expr::call("max", vec![currency()]))),
                    Expr::call("sum", vec![task("cost.value")]),
                ],
            ),
            "costvalue",
        )
        .group_by(Expr::col(PLATFORM_COLUMN))
        .group_by(Expr::col(SUBMISSION_COLUMN))
        .group_by(Expr::col(GROUP_INDEX_COLUMN));
    partition_filters(query, key)
}

/// Successful when no task failed, else the most frequent failure, ties to the smallest label
fn derived_status() -> Expr {
    let statuses = failure_statuses();
    let most_failures =
        Expr::call("greatest", statuses.iter().map(|s| Expr::col(failed_tasks_column(*s))).collect());

    let mut branches = vec![(most_failures.clone().eq(Expr::num(0.0)), Expr::lit(ExecutionStatus::Successful.as_str()))];
    branches.extend(
        statuses
            .iter()
            .map(|s| (Expr::col(failed_tasks_column(*s)).eq(most_failures.clone()), Expr::lit(s.as_str()))),
    );
    Expr::case(branches, None)
}

/// One row per workflow run of the partition, with its numeric columns flattened
///
/// Runs reported only as task groups are included through their reduced record.
fn executions_cte(table: &ExecutionTable, key: &PartitionKey) -> SelectQuery {
    let field = |name: &str| Expr::field("runexecution", name);
    let runs = SelectQuery::from_table(&table.database, &table.table)
        .unnest("runexecutions", "t", "runexecution")
        .select(Expr::col(PLATFORM_COLUMN), PLATFORM_COLUMN)
        .select(field("executionstatus"), "executionstatus")
        .select(field("dateexecuted"), "dateexecuted")
        .select(field("executiontimeseconds"), "executiontimeseconds")
        .select(field("cpurequirements"), "cpurequirements")
        .select(field("memoryrequirementsgb"), "memoryrequirementsgb")
        .select(field("cost.value"), "costvalue");

    let derived = EXECUTION_COLUMNS[1..].iter().fold(
        SelectQuery::from_cte(TASK_GROUPS_CTE)
            .select(Expr::col(PLATFORM_COLUMN), PLATFORM_COLUMN)
            .select(derived_status(), EXECUTION_COLUMNS[0]),
        |query, column| query.select(Expr::col(*column), *column),
    );

    partition_filters(runs, key).union_all(derived)
}

/// Attach the CTEs `query` reads executions from
pub(crate) fn with_executions(query: SelectQuery, table: &ExecutionTable, key: &PartitionKey) -> SelectQuery {
    query
        .with_cte(TASK_GROUPS_CTE, task_groups_cte(table, key))
        .with_cte(EXECUTIONS_CTE, executions_cte(table, key))
}

/// Rows grouped by their platform label
///
/// A NULL platform came from source data without one; those rows are skipped.
pub(crate) fn rows_by_platform(result: &QueryResultSet) -> BTreeMap<String, Vec<ResultRow<'_>>> {
    let mut grouped: BTreeMap<String, Vec<ResultRow<'_>>> = BTreeMap::new();
    if result.is_empty() {
        return grouped;
    }
    let mut skipped = 0usize;
    for row in result.rows() {
        match row.get(PLATFORM_COLUMN) {
            Some(platform) => grouped.entry(platform.to_string()).or_default().push(row),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!("Skipped {} result rows without a platform", skipped);
    }
    grouped
}

/// Runs every push-down query of a partition and assembles per-platform metrics
#[derive(Clone)]
pub struct PushdownAggregator {
    runner: QueryRunner,
    table: ExecutionTable,
    metrics: ExecutionMetricsQuery,
    validation: ValidationStatusQuery,
    daily: TimeSeriesWindow<DailyBins>,
    weekly: TimeSeriesWindow<WeeklyBins>,
    monthly: TimeSeriesWindow<MonthlyBins>,
}

impl PushdownAggregator {
    pub fn new(runner: QueryRunner, table: ExecutionTable) -> Self {
        Self {
            runner,
            table,
            metrics: ExecutionMetricsQuery::default(),
            validation: ValidationStatusQuery,
            daily: TimeSeriesWindow::daily(),
            weekly: TimeSeriesWindow::weekly(),
            monthly: TimeSeriesWindow::monthly(),
        }
    }

    pub async fn aggregate(&self, key: &PartitionKey) -> AggregatorResult<BTreeMap<String, Metrics>> {
        self.aggregate_at(key, Utc::now()).await
    }

    /// Platform (including `ALL`) -> metrics, with time series ending at `now`
    ///
    /// Any failed query fails the whole partition.
    pub async fn aggregate_at(
        &self,
        key: &PartitionKey,
        now: DateTime<Utc>,
    ) -> AggregatorResult<BTreeMap<String, Metrics>> {
        tracing::info!("Aggregating {} with push-down queries", key);

        let result = self.runner.run(&self.metrics.build(&self.table, key).to_sql()).await?;
        tracing::debug!("Execution metrics query for {} returned {} rows", key, result.len());
        let mut metrics = self.metrics.parse(&result);

        let result = self.runner.run(&self.validation.build(&self.table, key).to_sql()).await?;
        for (platform, validation) in self.validation.parse(&result) {
            metrics.entry(platform).or_default().validation_status = Some(validation);
        }

        let result = self.runner.run(&self.daily.build(&self.table, key, now).to_sql()).await?;
        for (platform, series) in self.daily.parse(&result, now) {
            metrics.entry(platform).or_default().daily_execution_counts = Some(series);
        }

        let result = self.runner.run(&self.weekly.build(&self.table, key, now).to_sql()).await?;
        for (platform, series) in self.weekly.parse(&result, now) {
            metrics.entry(platform).or_default().weekly_execution_counts = Some(series);
        }

        let result = self.runner.run(&self.monthly.build(&self.table, key, now).to_sql()).await?;
        for (platform, series) in self.monthly.parse(&result, now) {
            metrics.entry(platform).or_default().monthly_execution_counts = Some(series);
        }

        tracing::debug!("{} produced metrics for {} platform entries", key, metrics.len());
        Ok(metrics)
    }
}
