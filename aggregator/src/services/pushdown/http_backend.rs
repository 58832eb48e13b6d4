use super::query_runner::{QueryBackend, QueryState, QueryStatus, ResultPage};
use crate::config::QueryConfig;
use crate::utils::{AggregatorError, AggregatorResult};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Query backend reached through an HTTP gateway in front of the analytical engine
///
/// - `POST {url}/queries` submits and returns the execution id
/// - `GET {url}/queries/{id}` reports the state
/// - `GET {url}/queries/{id}/results?nextToken=` pages through the results
pub struct HttpQueryBackend {
    http_client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    query: &'a str,
    database: &'a str,
    output_location: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    query_execution_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    state: QueryState,
    #[serde(default)]
    state_change_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsResponse {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Option<String>>>,
    #[serde(default)]
    next_token: Option<String>,
}

impl HttpQueryBackend {
    pub fn new(config: &QueryConfig) -> Self {
        let http_client = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { http_client, base_url: config.url.trim_end_matches('/').to_string() }
    }

    fn query_url(&self, execution_id: &str) -> String {
        format!("{}/queries/{}", self.base_url, urlencoding::encode(execution_id))
    }

    async fn check(response: Response, action: &str) -> AggregatorResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!("Query gateway {} failed with status {}: {}", action, status, error_text);
        Err(AggregatorError::query_backend(format!("{} failed ({}): {}", action, status, error_text)))
    }
}

#[async_trait]
impl QueryBackend for HttpQueryBackend {
    async fn submit(&self, sql: &str, database: &str, output_location: &str) -> AggregatorResult<String> {
        let url = format!("{}/queries", self.base_url);
        let body = SubmitRequest { query: sql, database, output_location };

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AggregatorError::query_backend(format!("Request failed: {}", e)))?;
        let response = Self::check(response, "submit").await?;

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| AggregatorError::query_backend(format!("Failed to parse response: {}", e)))?;
        Ok(submitted.query_execution_id)
    }

    async fn poll_status(&self, execution_id: &str) -> AggregatorResult<QueryStatus> {
        let response = self
            .http_client
            .get(self.query_url(execution_id))
            .send()
            .await
            .map_err(|e| AggregatorError::query_backend(format!("Request failed: {}", e)))?;
        let response = Self::check(response, "status").await?;

        let status: StatusResponse = response
            .json()
            .await
            .map_err(|e| AggregatorError::query_backend(format!("Failed to parse response: {}", e)))?;
        Ok(QueryStatus { state: status.state, reason: status.state_change_reason })
    }

    async fn fetch_results(&self, execution_id: &str, next_token: Option<&str>) -> AggregatorResult<ResultPage> {
        let mut request = self.http_client.get(format!("{}/results", self.query_url(execution_id)));
        if let Some(token) = next_token {
            request = request.query(&[("nextToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AggregatorError::query_backend(format!("Request failed: {}", e)))?;
        let response = Self::check(response, "results").await?;

        let page: ResultsResponse = response
            .json()
            .await
            .map_err(|e| AggregatorError::query_backend(format!("Failed to parse response: {}", e)))?;
        Ok(ResultPage { columns: page.columns, rows: page.rows, next_token: page.next_token })
    }
}
