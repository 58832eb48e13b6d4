use crate::models::{
    ALL_PLATFORMS, Cost, ExecutionStatus, ExecutionsRequestBody, Metrics, RunExecution, TaskExecutions,
    ValidationStatusMetric, ValidatorTool,
};
use crate::services::MetricsCombiner;
use crate::services::pushdown::{ExecutionTable, PushdownAggregator};
use crate::tests::common::{
    CubeQueryBackend, assert_close, assert_same_statistic, dated_run, run, validation, workflow_key,
};
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

fn dataset() -> BTreeMap<String, ExecutionsRequestBody> {
    let mut bundles = BTreeMap::new();
    bundles.insert(
        "TERRA".to_string(),
        ExecutionsRequestBody {
            run_executions: vec![
                dated_run(ExecutionStatus::Successful, "PT5M", 2, 2.0, 0.5, "2023-03-01T10:00:00Z"),
                dated_run(ExecutionStatus::Failed, "PT1S", 4, 4.5, 0.1, "2023-03-02T10:00:00Z"),
                dated_run(ExecutionStatus::Successful, "PT1H2M", 8, 16.0, 3.25, "2023-03-03T10:00:00Z"),
            ],
            validation_executions: vec![
                validation(ValidatorTool::Miniwdl, "1.0", true, "2023-03-01T00:00:00Z"),
                validation(ValidatorTool::Miniwdl, "1.0", false, "2023-03-05T00:00:00Z"),
            ],
            ..Default::default()
        },
    );
    bundles.insert(
        "GALAXY".to_string(),
        ExecutionsRequestBody {
            run_executions: vec![
                dated_run(ExecutionStatus::Aborted, "PT30S", 1, 0.5, 0.02, "2023-03-04T10:00:00Z"),
                dated_run(ExecutionStatus::Successful, "PT2M", 6, 8.0, 1.0, "2023-03-04T11:00:00Z"),
            ],
            validation_executions: vec![
                validation(ValidatorTool::Miniwdl, "1.0", true, "2023-03-02T00:00:00Z"),
                validation(ValidatorTool::Miniwdl, "1.1", true, "2023-03-06T00:00:00Z"),
                validation(ValidatorTool::Womtool, "85", false, "2023-03-03T00:00:00Z"),
            ],
            ..Default::default()
        },
    );
    bundles
}

fn assert_same_numeric_metrics(platform: &str, actual: &Metrics, expected: &Metrics) {
    assert_same_statistic(platform, actual.execution_time.as_ref(), expected.execution_time.as_ref());
    assert_same_statistic(platform, actual.cpu.as_ref(), expected.cpu.as_ref());
    assert_same_statistic(platform, actual.memory.as_ref(), expected.memory.as_ref());
    assert_same_statistic(platform, actual.cost.as_ref(), expected.cost.as_ref());

    let actual_status = actual.execution_status_count.as_ref().unwrap();
    let expected_status = expected.execution_status_count.as_ref().unwrap();
    assert_eq!(
        actual_status.count.keys().collect::<Vec<_>>(),
        expected_status.count.keys().collect::<Vec<_>>(),
        "{}: statuses",
        platform
    );
    for (status, expected_by_status) in &expected_status.count {
        let actual_by_status = &actual_status.count[status];
        let label = format!("{} {}", platform, status);
        assert_eq!(actual_by_status.execution_status_count, expected_by_status.execution_status_count);
        assert_same_statistic(&label, actual_by_status.cpu.as_ref(), expected_by_status.cpu.as_ref());
        assert_same_statistic(&label, actual_by_status.memory.as_ref(), expected_by_status.memory.as_ref());
        assert_same_statistic(
            &label,
            actual_by_status.execution_time.as_ref(),
            expected_by_status.execution_time.as_ref(),
        );
        assert_same_statistic(&label, actual_by_status.cost.as_ref(), expected_by_status.cost.as_ref());
    }
}

fn assert_same_validation(actual: &ValidationStatusMetric, expected: &ValidationStatusMetric) {
    assert_eq!(
        actual.validator_tools.keys().collect::<Vec<_>>(),
        expected.validator_tools.keys().collect::<Vec<_>>()
    );
    for (tool, expected_info) in &expected.validator_tools {
        let actual_info = &actual.validator_tools[tool];
        assert_eq!(actual_info.most_recent_version_name, expected_info.most_recent_version_name);
        assert_eq!(actual_info.number_of_runs, expected_info.number_of_runs);
        assert_close(actual_info.passing_rate, expected_info.passing_rate);

        assert_eq!(actual_info.validator_versions.len(), expected_info.validator_versions.len());
        for (a, e) in actual_info.validator_versions.iter().zip(&expected_info.validator_versions) {
            assert_eq!((&a.name, a.is_valid, &a.date_executed), (&e.name, e.is_valid, &e.date_executed));
            assert_eq!(a.error_message, e.error_message);
            assert_eq!(a.number_of_runs, e.number_of_runs);
            assert_close(a.passing_rate, e.passing_rate);
        }
    }
}

#[tokio::test]
async fn test_pushdown_matches_in_process_aggregation() {
    let bundles = dataset();
    let key = workflow_key("pipeline", "1.0");
    let now = Utc.with_ymd_and_hms(2023, 3, 10, 12, 0, 0).unwrap();

    let expected = MetricsCombiner::new().aggregate_platforms(&bundles);

    let backend = Arc::new(CubeQueryBackend::new(&bundles));
    let pushdown = PushdownAggregator::new(backend.clone().runner(), ExecutionTable::new("dockstore", "executions"));
    let actual = pushdown.aggregate_at(&key, now).await.unwrap();

    assert_eq!(actual.keys().collect::<Vec<_>>(), vec![ALL_PLATFORMS, "GALAXY", "TERRA"]);
    assert_eq!(actual.keys().collect::<Vec<_>>(), expected.keys().collect::<Vec<_>>());

    for (platform, expected_metrics) in &expected {
        let actual_metrics = &actual[platform];
        assert_same_numeric_metrics(platform, actual_metrics, expected_metrics);
        assert_same_validation(
            actual_metrics.validation_status.as_ref().unwrap(),
            expected_metrics.validation_status.as_ref().unwrap(),
        );
    }

    // one query per category: metrics, validation and three time-series windows
    let queries = backend.queries.lock().unwrap();
    assert_eq!(queries.len(), 5);
    assert!(queries.iter().all(|sql| sql.contains("name = 'pipeline'")));
}

#[tokio::test]
async fn test_pushdown_keeps_percentiles_of_raw_rows() {
    let bundles = dataset();
    let backend = Arc::new(CubeQueryBackend::new(&bundles));
    let pushdown = PushdownAggregator::new(backend.runner(), ExecutionTable::new("dockstore", "executions"));

    let actual = pushdown.aggregate(&workflow_key("pipeline", "1.0")).await.unwrap();

    // the in-process rollup merges snapshots and loses percentiles, push-down does not
    let all_cpu = &actual[ALL_PLATFORMS].cpu.as_ref().unwrap().statistic;
    assert!(all_cpu.median.is_some());
    assert_eq!(all_cpu.count(), 5);
    assert!(actual[ALL_PLATFORMS].daily_execution_counts.is_none());
}

fn task(status: ExecutionStatus, date: Option<&str>, cpu: i64, memory: f64, cost: Option<Cost>) -> RunExecution {
    let mut execution = run(status, "PT1M", cpu, memory);
    execution.date_executed = date.map(str::to_string);
    execution.cost = cost;
    execution
}

fn task_group(date: Option<&str>, tasks: Vec<RunExecution>) -> TaskExecutions {
    TaskExecutions { execution_id: None, date_executed: date.map(str::to_string), task_executions: tasks }
}

fn task_group_dataset() -> BTreeMap<String, ExecutionsRequestBody> {
    let mut bundles = BTreeMap::new();
    bundles.insert(
        "TERRA".to_string(),
        ExecutionsRequestBody {
            run_executions: vec![dated_run(ExecutionStatus::Successful, "PT10M", 2, 4.0, 2.0, "2023-03-01T10:00:00Z")],
            task_executions: vec![
                // one FAILED and one ABORTED task: the tie goes to ABORTED, spanning five minutes
                task_group(
                    None,
                    vec![
                        task(ExecutionStatus::Failed, Some("2023-03-02T10:00:00Z"), 2, 1.0, Some(Cost::usd(1.0))),
                        task(ExecutionStatus::Aborted, Some("2023-03-02T10:05:00Z"), 4, 3.0, Some(Cost::usd(0.5))),
                    ],
                ),
                // a lone task keeps its own duration; without a cost there is no workflow cost
                task_group(
                    Some("2023-03-05T00:00:00Z"),
                    vec![task(ExecutionStatus::Successful, None, 1, 0.5, None)],
                ),
                task_group(Some("2023-03-06T00:00:00Z"), Vec::new()),
            ],
            ..Default::default()
        },
    );
    bundles.insert(
        "GALAXY".to_string(),
        ExecutionsRequestBody {
            task_executions: vec![task_group(
                None,
                vec![
                    task(ExecutionStatus::Successful, Some("2023-03-03T08:00:00Z"), 8, 1.0, Some(Cost::usd(1.0))),
                    task(ExecutionStatus::Failed, Some("2023-03-03T09:00:00Z"), 2, 2.0, None),
                    task(ExecutionStatus::Failed, None, 2, 3.0, Some(Cost { value: 1.0, currency: "EUR".into() })),
                ],
            )],
            ..Default::default()
        },
    );
    bundles
}

#[tokio::test]
async fn test_pushdown_reduces_task_groups_like_in_process_aggregation() {
    let bundles = task_group_dataset();
    let key = workflow_key("pipeline", "1.0");
    let now = Utc.with_ymd_and_hms(2023, 3, 10, 12, 0, 0).unwrap();

    let expected = MetricsCombiner::new().aggregate_platforms(&bundles);

    let backend = Arc::new(CubeQueryBackend::new(&bundles));
    let pushdown = PushdownAggregator::new(backend.clone().runner(), ExecutionTable::new("dockstore", "executions"));
    let actual = pushdown.aggregate_at(&key, now).await.unwrap();

    assert_eq!(actual.keys().collect::<Vec<_>>(), expected.keys().collect::<Vec<_>>());
    for (platform, expected_metrics) in &expected {
        assert_same_numeric_metrics(platform, &actual[platform], expected_metrics);
    }

    let all = &actual[ALL_PLATFORMS];
    let status = all.execution_status_count.as_ref().unwrap();
    assert_eq!(status.count_of("SUCCESSFUL"), 2);
    assert_eq!(status.count_of("ABORTED"), 1);
    assert_eq!(status.count_of("FAILED"), 1);
    assert_eq!(all.cpu.as_ref().unwrap().statistic.maximum, 8.0);
    // only the TERRA run and the first task group have a cost
    assert_eq!(all.cost.as_ref().unwrap().statistic.count(), 2);
    assert_close(all.cost.as_ref().unwrap().statistic.average, 1.75);
    // ten minutes, five minutes and the lone task's minute
    assert_eq!(all.execution_time.as_ref().unwrap().statistic.count(), 3);
    assert_close(all.execution_time.as_ref().unwrap().statistic.maximum, 600.0);
    assert_close(all.execution_time.as_ref().unwrap().statistic.minimum, 60.0);

    let queries = backend.queries.lock().unwrap();
    assert!(queries[0].contains("UNNEST(taskexecutions) WITH ORDINALITY"));
}
