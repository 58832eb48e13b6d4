//! Bulk submission of externally produced executions
//!
//! Reads a CSV export, turns each row into a raw execution of the tool version it belongs to,
//! and submits one batch per tool version. Rows that cannot be used are skipped with a reason.

use crate::models::{ExecutionsRequestBody, PartitionKey, ValidatorTool};
use crate::services::csv_ingest::{self, CsvRows, TerraRow, ValidationRow};
use crate::services::trs_resolver::{Resolution, TrsResolver};
use crate::services::webservice_client::MetricsWebservice;
use crate::services::worker_pool::{WorkCounters, WorkSummary, WorkerPool};
use crate::utils::AggregatorResult;
use csv::StringRecord;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

pub const TERRA_PLATFORM: &str = "TERRA";
const RESOLUTION_FAILED: &str = "resolution task failed";

pub struct ValidationSubmission<'a> {
    pub data_file: &'a Path,
    pub validator: ValidatorTool,
    pub validator_version: &'a str,
    pub platform: &'a str,
    pub skipped_rows_file: Option<&'a Path>,
}

pub struct TerraSubmission<'a> {
    pub data_file: &'a Path,
    pub description: Option<&'a str>,
    pub skipped_rows_file: Option<&'a Path>,
}

pub struct SubmissionService {
    webservice: Arc<dyn MetricsWebservice>,
    resolver: Arc<TrsResolver>,
    pool: WorkerPool,
    dry_run: bool,
}

impl SubmissionService {
    pub fn new(
        webservice: Arc<dyn MetricsWebservice>,
        resolver: Arc<TrsResolver>,
        workers: usize,
        dry_run: bool,
    ) -> Self {
        Self { webservice, resolver, pool: WorkerPool::new(workers), dry_run }
    }

    pub async fn submit_validation_data(&self, request: ValidationSubmission<'_>) -> AggregatorResult<WorkSummary> {
        let CsvRows { headers, rows, mut skipped } =
            csv_ingest::read_rows_from_path::<ValidationRow>(request.data_file)?;

        let mut batches: BTreeMap<PartitionKey, ExecutionsRequestBody> = BTreeMap::new();
        for (record, row) in rows {
            let converted = row
                .partition()
                .and_then(|key| row.to_execution(request.validator, request.validator_version).map(|e| (key, e)));
            match converted {
                Ok((key, execution)) => batches.entry(key).or_default().validation_executions.push(execution),
                Err(reason) => skipped.push((record, reason)),
            }
        }

        let summary = self.submit_batches(batches, request.platform, None, skipped.len() as u64).await;
        write_skipped(request.skipped_rows_file, &headers, &skipped)?;
        Ok(summary)
    }

    pub async fn submit_terra_metrics(&self, request: TerraSubmission<'_>) -> AggregatorResult<WorkSummary> {
        let CsvRows { headers, rows, mut skipped } = csv_ingest::read_rows_from_path::<TerraRow>(request.data_file)?;

        let mut by_source: HashMap<String, Vec<(StringRecord, TerraRow)>> = HashMap::new();
        for (record, row) in rows {
            by_source.entry(row.source_url.clone()).or_default().push((record, row));
        }
        tracing::info!("Resolving {} distinct source urls", by_source.len());

        let resolutions = self
            .pool
            .run_all(by_source.keys().cloned().collect::<Vec<_>>(), |url| {
                let resolver = self.resolver.clone();
                async move {
                    let resolution = resolver.resolve(&url).await;
                    (url, resolution)
                }
            })
            .await;

        let mut batches: BTreeMap<PartitionKey, ExecutionsRequestBody> = BTreeMap::new();
        for (url, resolution) in resolutions {
            let Some(source_rows) = by_source.remove(&url) else { continue };
            let key = match resolution {
                Ok(Resolution::Resolved(key)) => key,
                Ok(Resolution::Skipped(reason)) => {
                    let reason = reason.to_string();
                    skipped.extend(source_rows.into_iter().map(|(record, _)| (record, reason.clone())));
                    continue;
                },
                Err(e) => {
                    tracing::warn!("Could not resolve {}: {}", url, e);
                    let reason = format!("resolution failed: {}", e);
                    skipped.extend(source_rows.into_iter().map(|(record, _)| (record, reason.clone())));
                    continue;
                },
            };

            for (record, row) in source_rows {
                match row.to_execution() {
                    Ok(execution) => batches.entry(key.clone()).or_default().run_executions.push(execution),
                    Err(reason) => skipped.push((record, reason)),
                }
            }
        }

        // urls whose resolution task panicked produced no output
        for (url, source_rows) in by_source.drain() {
            tracing::warn!("Resolution of {} did not complete, skipping {} rows", url, source_rows.len());
            skipped.extend(source_rows.into_iter().map(|(record, _)| (record, RESOLUTION_FAILED.to_string())));
        }

        let summary =
            self.submit_batches(batches, TERRA_PLATFORM, request.description, skipped.len() as u64).await;
        write_skipped(request.skipped_rows_file, &headers, &skipped)?;
        Ok(summary)
    }

    async fn submit_batches(
        &self,
        batches: BTreeMap<PartitionKey, ExecutionsRequestBody>,
        platform: &str,
        description: Option<&str>,
        skipped_rows: u64,
    ) -> WorkSummary {
        let counters = Arc::new(WorkCounters::new());
        counters.skipped(skipped_rows);

        let platform = platform.to_string();
        let description = description.map(str::to_string);
        self.pool
            .run_all(batches, |(key, body)| {
                let webservice = self.webservice.clone();
                let counters = counters.clone();
                let platform = platform.clone();
                let description = description.clone();
                let dry_run = self.dry_run;
                async move {
                    counters.processed();
                    let executions = body.run_executions.len() + body.validation_executions.len();
                    if dry_run {
                        tracing::info!("Dry run: would submit {} executions for {}", executions, key);
                        return;
                    }
                    match webservice.submit_executions(&key, &platform, description.as_deref(), &body).await {
                        Ok(()) => {
                            tracing::info!("Submitted {} executions for {}", executions, key);
                            counters.submitted();
                        },
                        Err(e) => {
                            tracing::warn!("Failed to submit executions for {}: {}", key, e);
                            counters.failed();
                        },
                    }
                }
            })
            .await;

        let summary = counters.summary();
        tracing::info!(
            "Submission finished: {} tool versions, {} submitted, {} failed, {} rows skipped",
            summary.processed,
            summary.submitted,
            summary.failed,
            summary.skipped
        );
        summary
    }
}

fn write_skipped(path: Option<&Path>, headers: &StringRecord, skipped: &[(StringRecord, String)]) -> AggregatorResult<()> {
    match path {
        Some(path) if !skipped.is_empty() => csv_ingest::write_skipped_rows(path, headers, skipped),
        _ => Ok(()),
    }
}
