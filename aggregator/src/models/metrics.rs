use crate::models::Statistic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const EXECUTION_TIME_UNIT: &str = "s";
pub const CPU_UNIT: &str = "vCPU";
pub const MEMORY_UNIT: &str = "GB";
pub const COST_UNIT: &str = "USD";

/// A statistic with the unit of its samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticMetric {
    #[serde(flatten)]
    pub statistic: Statistic,
    pub unit: String,
}

impl StatisticMetric {
    pub fn new(statistic: Statistic, unit: &str) -> Self {
        Self { statistic, unit: unit.to_string() }
    }
}

/// Executions of one status, with the numeric metrics of just those executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsByStatus {
    pub execution_status_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<StatisticMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<StatisticMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<StatisticMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<StatisticMetric>,
}

/// Status label -> executions with that status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionStatusMetric {
    pub count: BTreeMap<String, MetricsByStatus>,
}

impl ExecutionStatusMetric {
    pub fn count_of(&self, status: &str) -> u64 {
        self.count.get(status).map(|m| m.execution_status_count).unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.count.values().map(|m| m.execution_status_count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorVersionInfo {
    /// Validator tool version name
    pub name: String,
    /// Result of the most recent execution of this version
    pub is_valid: bool,
    /// Date of the most recent execution of this version
    pub date_executed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub number_of_runs: u64,
    /// Percentage of valid runs, 0..=100
    pub passing_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorInfo {
    pub most_recent_version_name: String,
    pub validator_versions: Vec<ValidatorVersionInfo>,
    pub number_of_runs: u64,
    pub passing_rate: f64,
}

impl ValidatorInfo {
    pub fn version(&self, name: &str) -> Option<&ValidatorVersionInfo> {
        self.validator_versions.iter().find(|v| v.name == name)
    }
}

/// Validator tool label -> validation history of that tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStatusMetric {
    pub validator_tools: BTreeMap<String, ValidatorInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeSeriesInterval {
    Day,
    Week,
    Month,
}

/// Execution counts in consecutive calendar bins, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesMetric {
    /// Start of the first bin
    pub begins: DateTime<Utc>,
    pub interval: TimeSeriesInterval,
    pub values: Vec<f64>,
}

/// One aggregated snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status_count: Option<ExecutionStatusMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<StatisticMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<StatisticMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<StatisticMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<StatisticMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatusMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_execution_counts: Option<TimeSeriesMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_execution_counts: Option<TimeSeriesMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_execution_counts: Option<TimeSeriesMetric>,
}

impl Metrics {
    pub fn is_empty(&self) -> bool {
        self.execution_status_count.is_none()
            && self.execution_time.is_none()
            && self.cpu.is_none()
            && self.memory.is_none()
            && self.cost.is_none()
            && self.validation_status.is_none()
            && self.daily_execution_counts.is_none()
            && self.weekly_execution_counts.is_none()
            && self.monthly_execution_counts.is_none()
    }
}
