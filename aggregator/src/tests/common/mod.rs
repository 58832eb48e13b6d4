// Common test utilities and fakes

use crate::config::QueryConfig;
use crate::models::{
    ALL_PLATFORMS, Cost, ExecutionStatus, ExecutionsRequestBody, Metrics, PartitionKey, PublishedWorkflow,
    RunExecution, Statistic, StatisticMetric, TaskExecutions, ValidationExecution, ValidatorTool, WorkflowVersion,
};
use crate::services::execution_store::ExecutionStore;
use crate::services::pushdown::query_builder::ROLLUP_LABEL;
use crate::services::pushdown::statistic_query::{
    COST_COLUMN, CPU_COLUMN, EXECUTION_TIME_COLUMN, MEMORY_COLUMN, StatisticColumn,
};
use crate::services::pushdown::{QueryBackend, QueryRunner, QueryState, QueryStatus, ResultPage};
use crate::services::webservice_client::MetricsWebservice;
use crate::utils::{AggregatorError, AggregatorResult, format_duration_seconds, parse_duration_seconds, parse_timestamp};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const EPSILON: f64 = 1e-9;

pub fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < EPSILON, "expected {}, got {}", expected, actual);
}

pub fn workflow_key(name: &str, version: &str) -> PartitionKey {
    PartitionKey::new("workflow", "github.com", "org", name, version)
}

pub fn run(status: ExecutionStatus, time: &str, cpu: i64, memory: f64) -> RunExecution {
    let mut execution = RunExecution::new(status);
    execution.execution_time = Some(time.to_string());
    execution.cpu_requirements = Some(cpu);
    execution.memory_requirements_gb = Some(memory);
    execution
}

pub fn dated_run(status: ExecutionStatus, time: &str, cpu: i64, memory: f64, cost: f64, date: &str) -> RunExecution {
    let mut execution = run(status, time, cpu, memory);
    execution.cost = Some(Cost::usd(cost));
    execution.date_executed = Some(date.to_string());
    execution
}

pub fn validation(tool: ValidatorTool, version: &str, is_valid: bool, date: &str) -> ValidationExecution {
    ValidationExecution {
        execution_id: None,
        validator_tool: tool,
        validator_tool_version: version.to_string(),
        is_valid,
        date_executed: date.to_string(),
        error_message: if is_valid { None } else { Some(format!("{} rejected the descriptor", tool)) },
    }
}

pub fn runs_bundle(runs: Vec<RunExecution>) -> ExecutionsRequestBody {
    ExecutionsRequestBody { run_executions: runs, ..Default::default() }
}

pub fn published_workflow(trs_id: &str, versions: &[(&str, &str)]) -> PublishedWorkflow {
    PublishedWorkflow {
        trs_id: trs_id.to_string(),
        workflow_versions: versions
            .iter()
            .map(|(name, path)| WorkflowVersion {
                name: name.to_string(),
                primary_descriptor_path: path.to_string(),
            })
            .collect(),
    }
}

/// Records every call and serves published workflows from a fixed map
#[derive(Default)]
pub struct FakeWebservice {
    pub posted: Mutex<Vec<(PartitionKey, String, Metrics)>>,
    pub submitted: Mutex<Vec<(PartitionKey, String, Option<String>, ExecutionsRequestBody)>>,
    pub workflow_lookups: AtomicUsize,
    workflows: HashMap<String, Vec<PublishedWorkflow>>,
    rejected_platforms: HashSet<String>,
    panicking_repositories: HashSet<String>,
}

impl FakeWebservice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflows(mut self, repository: &str, workflows: Vec<PublishedWorkflow>) -> Self {
        self.workflows.insert(repository.to_string(), workflows);
        self
    }

    /// Every post or submission for `platform` is rejected
    pub fn rejecting(mut self, platform: &str) -> Self {
        self.rejected_platforms.insert(platform.to_string());
        self
    }

    /// Looking up workflows of `repository` panics
    pub fn panicking_on(mut self, repository: &str) -> Self {
        self.panicking_repositories.insert(repository.to_string());
        self
    }

    pub fn posted_platforms(&self, key: &PartitionKey) -> Vec<String> {
        let mut platforms: Vec<String> = self
            .posted
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, platform, _)| platform.clone())
            .collect();
        platforms.sort();
        platforms
    }

    pub fn posted_metrics(&self, key: &PartitionKey, platform: &str) -> Option<Metrics> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .find(|(k, p, _)| k == key && p == platform)
            .map(|(_, _, metrics)| metrics.clone())
    }

    fn check_platform(&self, platform: &str) -> AggregatorResult<()> {
        if self.rejected_platforms.contains(platform) {
            return Err(AggregatorError::WebserviceRejected { status: 500, message: "unavailable".to_string() });
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsWebservice for FakeWebservice {
    async fn post_aggregated_metrics(
        &self,
        key: &PartitionKey,
        platform: &str,
        metrics: &Metrics,
    ) -> AggregatorResult<()> {
        self.check_platform(platform)?;
        self.posted.lock().unwrap().push((key.clone(), platform.to_string(), metrics.clone()));
        Ok(())
    }

    async fn submit_executions(
        &self,
        key: &PartitionKey,
        platform: &str,
        description: Option<&str>,
        executions: &ExecutionsRequestBody,
    ) -> AggregatorResult<()> {
        self.check_platform(platform)?;
        self.submitted.lock().unwrap().push((
            key.clone(),
            platform.to_string(),
            description.map(str::to_string),
            executions.clone(),
        ));
        Ok(())
    }

    async fn published_workflows(&self, repository: &str) -> AggregatorResult<Vec<PublishedWorkflow>> {
        self.workflow_lookups.fetch_add(1, Ordering::SeqCst);
        if self.panicking_repositories.contains(repository) {
            panic!("workflow lookup of {} blew up", repository);
        }
        Ok(self.workflows.get(repository).cloned().unwrap_or_default())
    }
}

/// Partitions held in memory; listing a partition in `broken` fails
#[derive(Default)]
pub struct MemoryExecutionStore {
    partitions: BTreeMap<PartitionKey, BTreeMap<String, ExecutionsRequestBody>>,
    broken: HashSet<PartitionKey>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, key: &PartitionKey, platform: &str, bundle: ExecutionsRequestBody) -> Self {
        self.partitions.entry(key.clone()).or_default().entry(platform.to_string()).or_default().extend(bundle);
        self
    }

    pub fn with_broken(mut self, key: &PartitionKey) -> Self {
        self.partitions.entry(key.clone()).or_default();
        self.broken.insert(key.clone());
        self
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn list_partitions(&self) -> AggregatorResult<Vec<PartitionKey>> {
        Ok(self.partitions.keys().cloned().collect())
    }

    async fn list(&self, key: &PartitionKey) -> AggregatorResult<BTreeMap<String, ExecutionsRequestBody>> {
        if self.broken.contains(key) {
            return Err(AggregatorError::storage(format!("cannot read {}", key)));
        }
        Ok(self.partitions.get(key).cloned().unwrap_or_default())
    }
}

/// Query backend that evaluates the push-down queries over in-memory records
///
/// The query kind is recognised from the submitted SQL. `CUBE` rollups are emulated by adding
/// every record to its platform group and to the `ALL` group. Task groups count as runs when the
/// query reads `taskexecutions`, reduced the way its SQL reduces them. Time-series queries return
/// no rows. Results are served two rows per page.
pub struct CubeQueryBackend {
    runs: Vec<(String, RunExecution)>,
    task_groups: Vec<(String, TaskExecutions)>,
    validations: Vec<(String, ValidationExecution)>,
    pages: Mutex<HashMap<String, Vec<ResultPage>>>,
    pub queries: Mutex<Vec<String>>,
}

const PAGE_SIZE: usize = 2;

impl CubeQueryBackend {
    pub fn new(bundles: &BTreeMap<String, ExecutionsRequestBody>) -> Self {
        let mut runs = Vec::new();
        let mut task_groups = Vec::new();
        let mut validations = Vec::new();
        for (platform, bundle) in bundles {
            runs.extend(bundle.run_executions.iter().map(|e| (platform.clone(), e.clone())));
            task_groups.extend(bundle.task_executions.iter().map(|g| (platform.clone(), g.clone())));
            validations.extend(bundle.validation_executions.iter().map(|e| (platform.clone(), e.clone())));
        }
        Self { runs, task_groups, validations, pages: Mutex::new(HashMap::new()), queries: Mutex::new(Vec::new()) }
    }

    pub fn runner(self: std::sync::Arc<Self>) -> QueryRunner {
        QueryRunner::new(self, &QueryConfig::default())
            .with_timing(Duration::from_millis(1), Duration::from_secs(5))
    }

    fn evaluate(&self, sql: &str) -> (Vec<String>, Vec<Vec<Option<String>>>) {
        if sql.contains("validatortool") {
            self.validation_rows()
        } else if sql.contains("bin_start") {
            (vec!["platform".to_string(), "bin_start".to_string(), "execution_count".to_string()], Vec::new())
        } else {
            self.metrics_rows(sql.contains("taskexecutions"))
        }
    }

    fn metrics_rows(&self, with_task_groups: bool) -> (Vec<String>, Vec<Vec<Option<String>>>) {
        let stat_columns = [EXECUTION_TIME_COLUMN, CPU_COLUMN, MEMORY_COLUMN, COST_COLUMN];
        let mut columns = vec!["platform".to_string(), "executionstatus".to_string(), "execution_count".to_string()];
        for column in &stat_columns {
            for function in ["min", "avg", "max", "count", "median", "p05", "p95"] {
                columns.push(column.alias(function));
            }
        }

        let mut records: Vec<(String, RunExecution)> = self.runs.clone();
        if with_task_groups {
            records.extend(
                self.task_groups.iter().filter_map(|(platform, group)| Some((platform.clone(), reduce_group(group)?))),
            );
        }

        let mut groups: BTreeMap<(String, String), Vec<&RunExecution>> = BTreeMap::new();
        for (platform, execution) in &records {
            let status = execution.execution_status.as_str().to_string();
            for group_platform in [platform.as_str(), ALL_PLATFORMS] {
                for group_status in [status.as_str(), ROLLUP_LABEL] {
                    groups
                        .entry((group_platform.to_string(), group_status.to_string()))
                        .or_default()
                        .push(execution);
                }
            }
        }

        let rows = groups
            .into_iter()
            .map(|((platform, status), executions)| {
                let mut row = vec![Some(platform), Some(status), Some(executions.len().to_string())];
                for column in &stat_columns {
                    let samples: Vec<f64> = executions.iter().filter_map(|e| sample(column, e)).collect();
                    row.extend(statistic_cells(Statistic::from_samples(&samples)));
                }
                row
            })
            .collect();
        (columns, rows)
    }

    fn validation_rows(&self) -> (Vec<String>, Vec<Vec<Option<String>>>) {
        let columns = [
            "platform",
            "validatortool",
            "validatortoolversion",
            "number_of_runs",
            "passing_runs",
            "latest_isvalid",
            "latest_errormessage",
            "latest_dateexecuted",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();

        let mut groups: BTreeMap<(String, String, String), Vec<&ValidationExecution>> = BTreeMap::new();
        for (platform, execution) in &self.validations {
            for group_platform in [platform.as_str(), ALL_PLATFORMS] {
                groups
                    .entry((
                        group_platform.to_string(),
                        execution.validator_tool.as_str().to_string(),
                        execution.validator_tool_version.clone(),
                    ))
                    .or_default()
                    .push(execution);
            }
        }

        let rows = groups
            .into_iter()
            .filter_map(|((platform, tool, version), executions)| {
                let latest = executions.iter().max_by_key(|e| parse_timestamp(&e.date_executed).ok())?;
                let passing = executions.iter().filter(|e| e.is_valid).count();
                Some(vec![
                    Some(platform),
                    Some(tool),
                    Some(version),
                    Some(executions.len().to_string()),
                    Some(passing.to_string()),
                    Some(latest.is_valid.to_string()),
                    latest.error_message.clone(),
                    Some(latest.date_executed.clone()),
                ])
            })
            .collect();
        (columns, rows)
    }
}

/// Workflow record of a task group as the push-down `taskgroups` CTE computes it
fn reduce_group(group: &TaskExecutions) -> Option<RunExecution> {
    let tasks = &group.task_executions;
    if tasks.is_empty() {
        return None;
    }

    let mut failures: BTreeMap<&str, usize> = BTreeMap::new();
    for task in tasks.iter().filter(|t| t.execution_status != ExecutionStatus::Successful) {
        *failures.entry(task.execution_status.as_str()).or_default() += 1;
    }
    let most = failures.values().copied().max().unwrap_or(0);
    let status = failures
        .iter()
        .find(|(_, count)| **count == most)
        .and_then(|(label, _)| ExecutionStatus::from_label(label))
        .unwrap_or(ExecutionStatus::Successful);

    let dates: Vec<_> =
        tasks.iter().filter_map(|t| t.date_executed.as_deref().and_then(|d| parse_timestamp(d).ok())).collect();
    let earliest_task = tasks
        .iter()
        .filter_map(|t| t.date_executed.as_deref())
        .filter_map(|d| parse_timestamp(d).ok().map(|ts| (ts, d)))
        .min_by_key(|(ts, _)| *ts)
        .map(|(_, d)| d);

    let mut execution = RunExecution::new(status);
    execution.date_executed = group.date_executed.clone().or(earliest_task.map(str::to_string));
    execution.execution_time = if tasks.len() == 1 {
        tasks[0].execution_time.clone()
    } else if dates.len() == tasks.len() {
        let span = *dates.iter().max()? - *dates.iter().min()?;
        Some(format_duration_seconds(span.num_milliseconds() as f64 / 1000.0))
    } else {
        None
    };
    execution.cpu_requirements = tasks.iter().filter_map(|t| t.cpu_requirements).max();
    execution.memory_requirements_gb = tasks.iter().filter_map(|t| t.memory_requirements_gb).reduce(f64::max);

    let costs: Vec<&Cost> = tasks.iter().filter_map(|t| t.cost.as_ref()).collect();
    let one_currency = costs.iter().all(|c| c.currency == costs[0].currency);
    if costs.len() == tasks.len() && one_currency {
        execution.cost = Some(Cost { value: costs.iter().map(|c| c.value).sum(), currency: costs[0].currency.clone() });
    }
    Some(execution)
}

fn sample(column: &StatisticColumn, execution: &RunExecution) -> Option<f64> {
    if *column == EXECUTION_TIME_COLUMN {
        execution.execution_time.as_deref().and_then(|t| parse_duration_seconds(t).ok())
    } else if *column == CPU_COLUMN {
        execution.cpu_requirements.map(|cpu| cpu as f64)
    } else if *column == MEMORY_COLUMN {
        execution.memory_requirements_gb
    } else {
        execution.cost.as_ref().map(|cost| cost.value)
    }
}

/// min, avg, max, count, median, p05, p95
fn statistic_cells(statistic: Option<Statistic>) -> Vec<Option<String>> {
    match statistic {
        Some(s) => vec![
            Some(s.minimum.to_string()),
            Some(s.average.to_string()),
            Some(s.maximum.to_string()),
            Some(s.count().to_string()),
            s.median.map(|v| v.to_string()),
            s.percentile_05th.map(|v| v.to_string()),
            s.percentile_95th.map(|v| v.to_string()),
        ],
        None => vec![None, None, None, Some("0".to_string()), None, None, None],
    }
}

#[async_trait]
impl QueryBackend for CubeQueryBackend {
    async fn submit(&self, sql: &str, _database: &str, _output_location: &str) -> AggregatorResult<String> {
        let (columns, rows) = self.evaluate(sql);
        let mut queries = self.queries.lock().unwrap();
        let id = format!("query-{}", queries.len());
        queries.push(sql.to_string());

        let chunks: Vec<_> = rows.chunks(PAGE_SIZE).map(|c| c.to_vec()).collect();
        let page_count = chunks.len().max(1);
        let pages: Vec<ResultPage> = (0..page_count)
            .map(|i| ResultPage {
                columns: columns.clone(),
                rows: chunks.get(i).cloned().unwrap_or_default(),
                next_token: (i + 1 < page_count).then(|| format!("{}", i + 1)),
            })
            .collect();
        self.pages.lock().unwrap().insert(id.clone(), pages);
        Ok(id)
    }

    async fn poll_status(&self, _execution_id: &str) -> AggregatorResult<QueryStatus> {
        Ok(QueryStatus::new(QueryState::Succeeded))
    }

    async fn fetch_results(&self, execution_id: &str, next_token: Option<&str>) -> AggregatorResult<ResultPage> {
        let index = next_token.map(|t| t.parse::<usize>().unwrap_or(0)).unwrap_or(0);
        self.pages
            .lock()
            .unwrap()
            .get(execution_id)
            .and_then(|pages| pages.get(index).cloned())
            .ok_or_else(|| AggregatorError::query_backend(format!("no page {} for {}", index, execution_id)))
    }
}

/// min, max, avg and count of two statistic metrics agree
pub fn assert_same_statistic(label: &str, actual: Option<&StatisticMetric>, expected: Option<&StatisticMetric>) {
    match (actual, expected) {
        (None, None) => {},
        (Some(a), Some(e)) => {
            assert_eq!(a.unit, e.unit, "{}: unit", label);
            assert_eq!(a.statistic.count(), e.statistic.count(), "{}: count", label);
            assert_close(a.statistic.minimum, e.statistic.minimum);
            assert_close(a.statistic.maximum, e.statistic.maximum);
            assert_close(a.statistic.average, e.statistic.average);
        },
        (a, e) => panic!("{}: expected {:?}, got {:?}", label, e, a),
    }
}
