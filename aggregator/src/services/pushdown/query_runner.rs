//! Remote query execution
//!
//! A query is submitted, polled at a fixed interval until it reaches a terminal state, and on
//! success its result pages are fetched until the backend stops returning a continuation
//! token. Failure and cancellation are fatal for that query only; there is no retry.

use crate::config::QueryConfig;
use crate::utils::{AggregatorError, AggregatorResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    pub state: QueryState,
    pub reason: Option<String>,
}

impl QueryStatus {
    pub fn new(state: QueryState) -> Self {
        Self { state, reason: None }
    }
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

/// Analytical query service reached by the push-down aggregators
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Submit a query and return its execution id
    async fn submit(&self, sql: &str, database: &str, output_location: &str) -> AggregatorResult<String>;

    async fn poll_status(&self, execution_id: &str) -> AggregatorResult<QueryStatus>;

    async fn fetch_results(&self, execution_id: &str, next_token: Option<&str>) -> AggregatorResult<ResultPage>;
}

/// All rows of a finished query with a column-name index
#[derive(Debug, Clone, Default)]
pub struct QueryResultSet {
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<Option<String>>>,
}

impl QueryResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_lowercase(), i))
            .collect();
        Self { column_index, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = ResultRow<'_>> {
        self.rows.iter().map(|values| ResultRow { column_index: &self.column_index, values })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResultRow<'a> {
    column_index: &'a HashMap<String, usize>,
    values: &'a [Option<String>],
}

impl<'a> ResultRow<'a> {
    /// Value of a column; `None` for SQL NULL or an unknown column
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = *self.column_index.get(column)?;
        self.values.get(idx)?.as_deref()
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column)?.trim().parse().ok()
    }

    pub fn get_u64(&self, column: &str) -> Option<u64> {
        let value = self.get(column)?.trim();
        value.parse().ok().or_else(|| value.parse::<f64>().ok().map(|v| v as u64))
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.get(column)?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
}

/// Drives one query through submit, poll and paginated fetch
#[derive(Clone)]
pub struct QueryRunner {
    backend: Arc<dyn QueryBackend>,
    database: String,
    output_location: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl QueryRunner {
    pub fn new(backend: Arc<dyn QueryBackend>, config: &QueryConfig) -> Self {
        Self {
            backend,
            database: config.database.clone(),
            output_location: config.output_location.clone(),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, sql: &str) -> AggregatorResult<QueryResultSet> {
        tracing::debug!("Submitting query: {}", sql);
        let execution_id = self.backend.submit(sql, &self.database, &self.output_location).await?;
        tracing::debug!("Query submitted as {}", execution_id);

        self.wait_for_completion(&execution_id).await?;
        self.fetch_all(&execution_id).await
    }

    async fn wait_for_completion(&self, execution_id: &str) -> AggregatorResult<()> {
        let started = Instant::now();

        loop {
            let status = self.backend.poll_status(execution_id).await?;
            match status.state {
                QueryState::Succeeded => {
                    tracing::debug!("Query {} succeeded after {:?}", execution_id, started.elapsed());
                    return Ok(());
                },
                QueryState::Failed => {
                    let reason = status.reason.unwrap_or_else(|| "no reason given".to_string());
                    tracing::error!("Query {} failed: {}", execution_id, reason);
                    return Err(AggregatorError::query_failed(execution_id, reason));
                },
                QueryState::Cancelled => {
                    tracing::error!("Query {} was cancelled", execution_id);
                    return Err(AggregatorError::QueryCancelled { execution_id: execution_id.to_string() });
                },
                QueryState::Queued | QueryState::Running => {
                    if started.elapsed() >= self.timeout {
                        tracing::error!("Query {} timed out after {:?}", execution_id, self.timeout);
                        return Err(AggregatorError::QueryTimedOut {
                            execution_id: execution_id.to_string(),
                            timeout_secs: self.timeout.as_secs(),
                        });
                    }
                    tokio::time::sleep(self.poll_interval).await;
                },
            }
        }
    }

    async fn fetch_all(&self, execution_id: &str) -> AggregatorResult<QueryResultSet> {
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.backend.fetch_results(execution_id, next_token.as_deref()).await?;
            pages += 1;
            if columns.is_empty() {
                columns = page.columns;
            }
            rows.extend(page.rows);

            match page.next_token {
                Some(token) if next_token.as_deref() != Some(token.as_str()) => next_token = Some(token),
                Some(_) => {
                    return Err(AggregatorError::query_backend(format!(
                        "Query {} returned the same continuation token twice",
                        execution_id
                    )));
                },
                None => break,
            }
        }

        tracing::debug!("Fetched {} rows in {} pages for query {}", rows.len(), pages, execution_id);
        Ok(QueryResultSet::new(columns, rows))
    }
}
