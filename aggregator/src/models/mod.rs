pub mod execution;
pub mod metrics;
pub mod partition;
pub mod statistic;
pub mod workflow;

pub use execution::{
    Cost, ExecutionStatus, ExecutionsRequestBody, RunExecution, TaskExecutions, default_currency,
    ValidationExecution, ValidatorTool,
};
pub use metrics::{
    COST_UNIT, CPU_UNIT, EXECUTION_TIME_UNIT, ExecutionStatusMetric, MEMORY_UNIT, Metrics,
    MetricsByStatus, StatisticMetric, TimeSeriesInterval, TimeSeriesMetric, ValidationStatusMetric,
    ValidatorInfo, ValidatorVersionInfo,
};
pub use partition::{ALL_PLATFORMS, PartitionKey};
pub use statistic::Statistic;
pub use workflow::{PublishedWorkflow, WorkflowVersion};
