//! Webservice collaborator
//!
//! Receives aggregated metrics and raw execution submissions, and lists published workflows
//! for source url resolution.

use crate::config::WebserviceConfig;
use crate::models::{ExecutionsRequestBody, Metrics, PartitionKey, PublishedWorkflow};
use crate::utils::{AggregatorError, AggregatorResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

#[async_trait]
pub trait MetricsWebservice: Send + Sync {
    /// Replace the aggregated metrics of one platform of a tool version
    async fn post_aggregated_metrics(
        &self,
        key: &PartitionKey,
        platform: &str,
        metrics: &Metrics,
    ) -> AggregatorResult<()>;

    /// Submit raw executions of one platform of a tool version
    async fn submit_executions(
        &self,
        key: &PartitionKey,
        platform: &str,
        description: Option<&str>,
        executions: &ExecutionsRequestBody,
    ) -> AggregatorResult<()>;

    /// Published workflows whose source lives in `repository`, e.g. `github.com/org/repo`
    async fn published_workflows(&self, repository: &str) -> AggregatorResult<Vec<PublishedWorkflow>>;
}

pub struct WebserviceClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl WebserviceClient {
    pub fn new(config: &WebserviceConfig) -> Self {
        let http_client = Client::builder().timeout(Duration::from_secs(60)).build().unwrap_or_default();
        Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    pub fn version_url(&self, key: &PartitionKey) -> String {
        format!(
            "{}/ga4gh/trs/v2/extended/{}/versions/{}",
            self.base_url,
            urlencoding::encode(&key.trs_id()),
            urlencoding::encode(&key.version)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> AggregatorResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| AggregatorError::webservice(format!("{} request failed: {}", action, e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            tracing::error!("{} rejected with status {}: {}", action, status, message);
            return Err(AggregatorError::WebserviceRejected { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl MetricsWebservice for WebserviceClient {
    async fn post_aggregated_metrics(
        &self,
        key: &PartitionKey,
        platform: &str,
        metrics: &Metrics,
    ) -> AggregatorResult<()> {
        let url = format!("{}/aggregatedMetrics", self.version_url(key));
        let request = self.http_client.put(&url).query(&[("platform", platform)]).json(metrics);
        self.send(request, "Posting aggregated metrics").await?;
        tracing::debug!("Posted {} metrics for {}", platform, key);
        Ok(())
    }

    async fn submit_executions(
        &self,
        key: &PartitionKey,
        platform: &str,
        description: Option<&str>,
        executions: &ExecutionsRequestBody,
    ) -> AggregatorResult<()> {
        let url = format!("{}/executions", self.version_url(key));
        let mut request = self.http_client.post(&url).query(&[("platform", platform)]);
        if let Some(description) = description {
            request = request.query(&[("description", description)]);
        }
        self.send(request.json(executions), "Submitting executions").await?;
        tracing::debug!("Submitted executions of {} for {}", platform, key);
        Ok(())
    }

    async fn published_workflows(&self, repository: &str) -> AggregatorResult<Vec<PublishedWorkflow>> {
        let url = format!("{}/workflows/published", self.base_url);
        let request = self.http_client.get(&url).query(&[("repository", repository)]);
        let response = self.send(request, "Listing published workflows").await?;

        response
            .json()
            .await
            .map_err(|e| AggregatorError::webservice(format!("Failed to parse workflows: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_url_encodes_trs_id() {
        let client = WebserviceClient::new(&WebserviceConfig {
            url: "https://example.org/api/".to_string(),
            token: None,
        });
        let key = PartitionKey::new("workflow", "github.com", "org", "repo/wdl", "v1.0");
        assert_eq!(
            client.version_url(&key),
            "https://example.org/api/ga4gh/trs/v2/extended/%23workflow%2Fgithub.com%2Forg%2Frepo%2Fwdl/versions/v1.0"
        );
    }
}
