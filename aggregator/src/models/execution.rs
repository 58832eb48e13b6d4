use crate::models::Metrics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of one workflow or task run
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Successful,
    Failed,
    FailedSemanticInvalid,
    FailedRuntimeInvalid,
    Aborted,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 5] = [
        Self::Successful,
        Self::Failed,
        Self::FailedSemanticInvalid,
        Self::FailedRuntimeInvalid,
        Self::Aborted,
    ];

    /// Wire label, also used as the key of the status count map
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::FailedSemanticInvalid => "FAILED_SEMANTIC_INVALID",
            Self::FailedRuntimeInvalid => "FAILED_RUNTIME_INVALID",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool that validated a workflow version
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorTool {
    Miniwdl,
    Womtool,
    Cwltool,
    NfValidation,
    Other,
}

impl ValidatorTool {
    pub const ALL: [ValidatorTool; 5] =
        [Self::Miniwdl, Self::Womtool, Self::Cwltool, Self::NfValidation, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Miniwdl => "MINIWDL",
            Self::Womtool => "WOMTOOL",
            Self::Cwltool => "CWLTOOL",
            Self::NfValidation => "NF_VALIDATION",
            Self::Other => "OTHER",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for ValidatorTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Cost {
    pub value: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

pub fn default_currency() -> String {
    "USD".to_string()
}

impl Cost {
    pub fn usd(value: f64) -> Self {
        Self { value, currency: default_currency() }
    }
}

/// Metrics of one workflow invocation (or of one task, inside `TaskExecutions`)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub execution_status: ExecutionStatus,
    /// ISO-8601 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_executed: Option<String>,
    /// ISO-8601 duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_requirements: Option<i64>,
    #[serde(default, rename = "memoryRequirementsGB", skip_serializing_if = "Option::is_none")]
    pub memory_requirements_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

impl RunExecution {
    pub fn new(execution_status: ExecutionStatus) -> Self {
        Self {
            execution_id: None,
            execution_status,
            date_executed: None,
            execution_time: None,
            cpu_requirements: None,
            memory_requirements_gb: None,
            cost: None,
        }
    }

    /// Identity used in log lines
    pub fn display_id(&self) -> &str {
        self.execution_id.as_deref().unwrap_or("<no execution id>")
    }
}

/// The task-level records of one workflow run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_executed: Option<String>,
    #[serde(default)]
    pub task_executions: Vec<RunExecution>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub validator_tool: ValidatorTool,
    pub validator_tool_version: String,
    pub is_valid: bool,
    /// ISO-8601 timestamp
    pub date_executed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One submission bundle: raw executions plus previously emitted snapshots
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionsRequestBody {
    #[serde(default)]
    pub run_executions: Vec<RunExecution>,
    #[serde(default)]
    pub task_executions: Vec<TaskExecutions>,
    #[serde(default)]
    pub validation_executions: Vec<ValidationExecution>,
    #[serde(default)]
    pub aggregated_executions: Vec<Metrics>,
}

impl ExecutionsRequestBody {
    pub fn is_empty(&self) -> bool {
        self.run_executions.is_empty()
            && self.task_executions.is_empty()
            && self.validation_executions.is_empty()
            && self.aggregated_executions.is_empty()
    }

    /// Fold another bundle into this one
    pub fn extend(&mut self, other: ExecutionsRequestBody) {
        self.run_executions.extend(other.run_executions);
        self.task_executions.extend(other.task_executions);
        self.validation_executions.extend(other.validation_executions);
        self.aggregated_executions.extend(other.aggregated_executions);
    }
}
