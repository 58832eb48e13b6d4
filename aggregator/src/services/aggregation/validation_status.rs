//! Validation status aggregator
//!
//! Tracks, per validator tool and tool version, how often validation ran and passed, and what
//! the most recent run said. "Most recent" is always decided by `dateExecuted`, never by the
//! order records or snapshots were submitted in, so merging is order-independent.
//!
//! Passing counts are kept as whole runs (`passingRate * numberOfRuns / 100`, rounded), which
//! makes every sum exact regardless of merge order.

use super::ExecutionAggregator;
use crate::models::{
    ExecutionsRequestBody, Metrics, ValidationExecution, ValidationStatusMetric, ValidatorInfo,
    ValidatorVersionInfo,
};
use crate::utils::parse_timestamp;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationStatusAggregator;

type RecencyKey = (Option<DateTime<Utc>>, bool, Reverse<Option<String>>, Reverse<String>);

/// Ordering key for "which record is the most recent"
///
/// Latest date first; on equal dates an invalid result beats a valid one, then the smallest
/// error message. Unparseable dates count as oldest.
fn recency_key(
    date_executed: &str,
    is_valid: bool,
    error_message: Option<&str>,
) -> RecencyKey {
    (
        parse_timestamp(date_executed).ok(),
        !is_valid,
        Reverse(error_message.map(str::to_string)),
        Reverse(date_executed.to_string()),
    )
}

fn version_recency(version: &ValidatorVersionInfo) -> RecencyKey {
    recency_key(&version.date_executed, version.is_valid, version.error_message.as_deref())
}

fn passing_runs(version: &ValidatorVersionInfo) -> u64 {
    (version.passing_rate * version.number_of_runs as f64 / 100.0).round() as u64
}

pub(crate) fn passing_rate(passing: u64, runs: u64) -> f64 {
    if runs == 0 { 0.0 } else { passing as f64 / runs as f64 * 100.0 }
}

/// Combine infos of one version name into one
fn merge_versions(versions: &[&ValidatorVersionInfo]) -> Option<ValidatorVersionInfo> {
    let latest = versions.iter().max_by_key(|v| version_recency(v))?;
    let runs: u64 = versions.iter().map(|v| v.number_of_runs).sum();
    let passing: u64 = versions.iter().map(|v| passing_runs(v)).sum();

    Some(ValidatorVersionInfo {
        name: latest.name.clone(),
        is_valid: latest.is_valid,
        date_executed: latest.date_executed.clone(),
        error_message: latest.error_message.clone(),
        number_of_runs: runs,
        passing_rate: passing_rate(passing, runs),
    })
}

/// Tool-level summary over its versions, which are emitted sorted by name
pub(crate) fn validator_info(mut versions: Vec<ValidatorVersionInfo>) -> Option<ValidatorInfo> {
    versions.sort_by(|a, b| a.name.cmp(&b.name));

    let most_recent = versions
        .iter()
        .max_by_key(|v| (version_recency(v), Reverse(v.name.clone())))?
        .name
        .clone();
    let runs: u64 = versions.iter().map(|v| v.number_of_runs).sum();
    let passing: u64 = versions.iter().map(passing_runs).sum();

    Some(ValidatorInfo {
        most_recent_version_name: most_recent,
        validator_versions: versions,
        number_of_runs: runs,
        passing_rate: passing_rate(passing, runs),
    })
}

impl ExecutionAggregator for ValidationStatusAggregator {
    type Metric = ValidationStatusMetric;
    type Execution = ValidationExecution;

    fn name(&self) -> &'static str {
        "validation status"
    }

    fn metric_from_snapshot(&self, snapshot: &Metrics) -> Option<ValidationStatusMetric> {
        snapshot.validation_status.clone()
    }

    fn raw_executions(&self, request: &ExecutionsRequestBody) -> Vec<ValidationExecution> {
        request.validation_executions.clone()
    }

    fn aggregate_executions(&self, executions: &[ValidationExecution]) -> Option<ValidationStatusMetric> {
        let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<&ValidationExecution>>> = BTreeMap::new();
        for execution in executions {
            grouped
                .entry(execution.validator_tool.as_str())
                .or_default()
                .entry(execution.validator_tool_version.as_str())
                .or_default()
                .push(execution);
        }

        let validator_tools: BTreeMap<String, ValidatorInfo> = grouped
            .into_iter()
            .filter_map(|(tool, by_version)| {
                let versions = by_version
                    .into_iter()
                    .filter_map(|(version, runs)| {
                        let latest = runs.iter().max_by_key(|e| {
                            recency_key(&e.date_executed, e.is_valid, e.error_message.as_deref())
                        })?;
                        let passing = runs.iter().filter(|e| e.is_valid).count() as u64;
                        Some(ValidatorVersionInfo {
                            name: version.to_string(),
                            is_valid: latest.is_valid,
                            date_executed: latest.date_executed.clone(),
                            error_message: latest.error_message.clone(),
                            number_of_runs: runs.len() as u64,
                            passing_rate: passing_rate(passing, runs.len() as u64),
                        })
                    })
                    .collect();
                validator_info(versions).map(|info| (tool.to_string(), info))
            })
            .collect();

        if validator_tools.is_empty() {
            None
        } else {
            Some(ValidationStatusMetric { validator_tools })
        }
    }

    fn merge_metrics(&self, metrics: &[ValidationStatusMetric]) -> Option<ValidationStatusMetric> {
        if let [single] = metrics {
            return Some(single.clone());
        }

        let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<&ValidatorVersionInfo>>> = BTreeMap::new();
        for metric in metrics {
            for (tool, info) in &metric.validator_tools {
                let by_version = grouped.entry(tool.as_str()).or_default();
                for version in &info.validator_versions {
                    by_version.entry(version.name.as_str()).or_default().push(version);
                }
            }
        }

        let validator_tools: BTreeMap<String, ValidatorInfo> = grouped
            .into_iter()
            .filter_map(|(tool, by_version)| {
                let versions = by_version.values().filter_map(|infos| merge_versions(infos)).collect();
                validator_info(versions).map(|info| (tool.to_string(), info))
            })
            .collect();

        if validator_tools.is_empty() {
            None
        } else {
            Some(ValidationStatusMetric { validator_tools })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidatorTool;

    fn validation(tool: ValidatorTool, version: &str, valid: bool, date: &str) -> ValidationExecution {
        ValidationExecution {
            execution_id: None,
            validator_tool: tool,
            validator_tool_version: version.to_string(),
            is_valid: valid,
            date_executed: date.to_string(),
            error_message: if valid { None } else { Some("syntax error".to_string()) },
        }
    }

    #[test]
    fn test_passing_rate_and_latest_result() {
        let metric = ValidationStatusAggregator
            .aggregate_executions(&[
                validation(ValidatorTool::Miniwdl, "1.0", true, "2023-01-01T00:00:00Z"),
                validation(ValidatorTool::Miniwdl, "1.0", false, "2023-02-01T00:00:00Z"),
            ])
            .unwrap();

        let info = &metric.validator_tools["MINIWDL"];
        assert_eq!(info.number_of_runs, 2);
        assert_eq!(info.passing_rate, 50.0);
        assert_eq!(info.most_recent_version_name, "1.0");

        let version = info.version("1.0").unwrap();
        assert!(!version.is_valid, "later execution is authoritative");
        assert_eq!(version.error_message.as_deref(), Some("syntax error"));
        assert_eq!(version.date_executed, "2023-02-01T00:00:00Z");
    }

    #[test]
    fn test_most_recent_version_is_by_date_not_order() {
        let metric = ValidationStatusAggregator
            .aggregate_executions(&[
                validation(ValidatorTool::Womtool, "2.0", true, "2023-01-01T00:00:00Z"),
                validation(ValidatorTool::Womtool, "1.0", true, "2023-06-01T00:00:00Z"),
            ])
            .unwrap();
        assert_eq!(metric.validator_tools["WOMTOOL"].most_recent_version_name, "1.0");
    }

    #[test]
    fn test_merge_sums_runs_across_snapshots() {
        let aggregator = ValidationStatusAggregator;
        let a = aggregator
            .aggregate_executions(&[
                validation(ValidatorTool::Miniwdl, "1.0", true, "2023-01-01T00:00:00Z"),
                validation(ValidatorTool::Miniwdl, "1.0", true, "2023-01-02T00:00:00Z"),
            ])
            .unwrap();
        let b = aggregator
            .aggregate_executions(&[
                validation(ValidatorTool::Miniwdl, "1.0", false, "2023-01-03T00:00:00Z"),
                validation(ValidatorTool::Cwltool, "3.1", true, "2023-01-03T00:00:00Z"),
            ])
            .unwrap();

        let merged = aggregator.merge_metrics(&[a.clone(), b.clone()]).unwrap();
        let miniwdl = &merged.validator_tools["MINIWDL"];
        assert_eq!(miniwdl.number_of_runs, 3);
        assert!((miniwdl.passing_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!(!miniwdl.version("1.0").unwrap().is_valid);
        assert_eq!(merged.validator_tools["CWLTOOL"].number_of_runs, 1);

        assert_eq!(aggregator.merge_metrics(&[b, a]).unwrap(), merged);
    }

    #[test]
    fn test_merge_is_order_independent_on_date_ties() {
        let aggregator = ValidationStatusAggregator;
        let valid = aggregator
            .aggregate_executions(&[validation(ValidatorTool::Miniwdl, "1.0", true, "2023-01-01T00:00:00Z")])
            .unwrap();
        let invalid = aggregator
            .aggregate_executions(&[validation(ValidatorTool::Miniwdl, "1.0", false, "2023-01-01T00:00:00Z")])
            .unwrap();

        let ab = aggregator.merge_metrics(&[valid.clone(), invalid.clone()]).unwrap();
        let ba = aggregator.merge_metrics(&[invalid, valid]).unwrap();
        assert_eq!(ab, ba);
        assert!(!ab.validator_tools["MINIWDL"].validator_versions[0].is_valid);
    }

    #[test]
    fn test_no_executions_is_absent() {
        assert!(ValidationStatusAggregator.aggregate_executions(&[]).is_none());
        assert!(ValidationStatusAggregator.merge_metrics(&[]).is_none());
    }
}
