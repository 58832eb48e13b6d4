pub mod aggregation;
pub mod aggregation_runner;
pub mod csv_ingest;
pub mod execution_store;
pub mod pushdown;
pub mod submission_service;
pub mod trs_resolver;
pub mod webservice_client;
pub mod worker_pool;

pub use aggregation::MetricsCombiner;
pub use aggregation_runner::{AggregationMode, AggregationRunner};
pub use execution_store::{ExecutionStore, LocalExecutionStore};
pub use pushdown::{HttpQueryBackend, PushdownAggregator, QueryBackend, QueryRunner};
pub use submission_service::{SubmissionService, TerraSubmission, ValidationSubmission};
pub use trs_resolver::{Resolution, ResolutionCache, TrsResolver};
pub use webservice_client::{MetricsWebservice, WebserviceClient};
pub use worker_pool::{WorkCounters, WorkSummary, WorkerPool};
