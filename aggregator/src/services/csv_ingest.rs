//! Bulk CSV ingestion
//!
//! Rows are deserialized and checked with `validator` rules. A row that fails either step, or
//! that is not valid UTF-8, is kept with its (lossily decoded) columns and a reason, so it can be
//! written to the skipped-rows CSV.

use crate::models::{ExecutionStatus, PartitionKey, RunExecution, ValidationExecution, ValidatorTool};
use crate::utils::time::format_duration_minutes;
use crate::utils::{AggregatorResult, parse_timestamp};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;
use validator::Validate;

pub const SKIP_REASON_COLUMN: &str = "reason";

/// Rows of one CSV file split into accepted and skipped
#[derive(Debug)]
pub struct CsvRows<T> {
    pub headers: StringRecord,
    pub rows: Vec<(StringRecord, T)>,
    pub skipped: Vec<(StringRecord, String)>,
}

pub fn read_rows<T, R>(reader: R) -> AggregatorResult<CsvRows<T>>
where
    T: DeserializeOwned + Validate,
    R: Read,
{
    let mut reader = ReaderBuilder::new().trim(Trim::All).flexible(true).from_reader(reader);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    let mut skipped = Vec::new();

    for (index, record) in reader.byte_records().enumerate() {
        let line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping unreadable CSV row {}: {}", line, e);
                skipped.push((StringRecord::new(), format!("unreadable row at line {}: {}", line, e)));
                continue;
            },
        };
        let record = match StringRecord::from_byte_record(record) {
            Ok(record) => record,
            Err(e) => {
                let field = e.utf8_error().field() + 1;
                tracing::warn!("Skipping CSV row {}: field {} is not valid UTF-8", line, field);
                let lossy: StringRecord = e.into_byte_record().iter().map(String::from_utf8_lossy).collect();
                skipped.push((lossy, format!("malformed row: field {} is not valid UTF-8", field)));
                continue;
            },
        };

        match record.deserialize::<T>(Some(&headers)) {
            Ok(row) => match row.validate() {
                Ok(()) => rows.push((record, row)),
                Err(e) => skipped.push((record, format!("invalid row: {}", e).replace('\n', "; "))),
            },
            Err(e) => skipped.push((record, format!("malformed row: {}", e))),
        }
    }

    tracing::info!("Read {} rows, {} rejected", rows.len() + skipped.len(), skipped.len());
    Ok(CsvRows { headers, rows, skipped })
}

pub fn read_rows_from_path<T>(path: &Path) -> AggregatorResult<CsvRows<T>>
where
    T: DeserializeOwned + Validate,
{
    read_rows(std::fs::File::open(path)?)
}

/// Write skipped rows with their original columns plus a `reason` column
pub fn write_skipped_rows(
    path: &Path,
    headers: &StringRecord,
    skipped: &[(StringRecord, String)],
) -> AggregatorResult<()> {
    let mut writer = WriterBuilder::new().flexible(true).from_path(path)?;

    let mut header = headers.clone();
    header.push_field(SKIP_REASON_COLUMN);
    writer.write_record(&header)?;

    for (record, reason) in skipped {
        let mut row = record.clone();
        row.push_field(reason);
        writer.write_record(&row)?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} skipped rows to {}", skipped.len(), path.display());
    Ok(())
}

/// `trsId,versionName,isValid,dateExecuted`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRow {
    #[validate(length(min = 1))]
    pub trs_id: String,
    #[validate(length(min = 1))]
    pub version_name: String,
    pub is_valid: bool,
    #[validate(length(min = 1))]
    pub date_executed: String,
}

impl ValidationRow {
    pub fn partition(&self) -> Result<PartitionKey, String> {
        PartitionKey::from_trs_id(&self.trs_id, &self.version_name)
            .ok_or_else(|| format!("'{}' is not a valid TRS id", self.trs_id))
    }

    pub fn to_execution(&self, tool: ValidatorTool, tool_version: &str) -> Result<ValidationExecution, String> {
        let executed = parse_timestamp(&self.date_executed).map_err(|e| e.to_string())?;
        Ok(ValidationExecution {
            execution_id: None,
            validator_tool: tool,
            validator_tool_version: tool_version.to_string(),
            is_valid: self.is_valid,
            date_executed: executed.to_rfc3339(),
            error_message: None,
        })
    }
}

/// Terra workflow export row
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TerraRow {
    #[validate(length(min = 1))]
    pub workflow_id: String,
    #[validate(length(min = 1))]
    pub status: String,
    #[validate(length(min = 1))]
    pub workflow_start: String,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub workflow_runtime_minutes: Option<i64>,
    #[validate(url)]
    pub source_url: String,
}

fn terra_status(status: &str) -> Option<ExecutionStatus> {
    match status {
        "Succeeded" => Some(ExecutionStatus::Successful),
        "Failed" => Some(ExecutionStatus::Failed),
        "Aborted" => Some(ExecutionStatus::Aborted),
        _ => None,
    }
}

impl TerraRow {
    pub fn to_execution(&self) -> Result<RunExecution, String> {
        let status =
            terra_status(&self.status).ok_or_else(|| format!("unsupported Terra status '{}'", self.status))?;
        let started = parse_timestamp(&self.workflow_start).map_err(|e| e.to_string())?;

        let mut execution = RunExecution::new(status);
        execution.execution_id = Some(self.workflow_id.clone());
        execution.date_executed = Some(started.to_rfc3339());
        execution.execution_time = self.workflow_runtime_minutes.map(format_duration_minutes);
        Ok(execution)
    }
}
