//! Source url resolution
//!
//! Maps the raw descriptor url an external platform reports for a run onto the registered
//! workflow version it belongs to. Outcomes, positive and negative, are cached per url in a
//! [`ResolutionCache`] shared across workers. A url maps to the same outcome every time, so
//! concurrent writers race harmlessly and the latest write wins.

use crate::models::{PartitionKey, PublishedWorkflow};
use crate::services::webservice_client::MetricsWebservice;
use crate::utils::AggregatorResult;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

const RAW_GITHUB_PREFIX: &str = "https://raw.githubusercontent.com/";
const GITHUB_REGISTRY: &str = "github.com";

/// Why a source url was not resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedUrl,
    TooFewComponents,
    NoMatchingWorkflow,
    AmbiguousWorkflow(Vec<String>),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedUrl => f.write_str("source url is not a raw GitHub url"),
            Self::TooFewComponents => f.write_str("source url has too few path components"),
            Self::NoMatchingWorkflow => f.write_str("no published workflow version matches the source url"),
            Self::AmbiguousWorkflow(ids) => {
                write!(f, "source url matches more than one workflow: {}", ids.join(", "))
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(PartitionKey),
    Skipped(SkipReason),
}

/// `https://raw.githubusercontent.com/{org}/{repo}/{ref}/{path..}` split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    pub org: String,
    pub repo: String,
    pub git_ref: String,
    /// Descriptor path inside the repository, with a leading `/`
    pub path: String,
}

impl SourceUrl {
    pub fn parse(url: &str) -> Result<Self, SkipReason> {
        let rest = url.trim().strip_prefix(RAW_GITHUB_PREFIX).ok_or(SkipReason::UnsupportedUrl)?;
        let components: Vec<&str> = rest.split('/').filter(|c| !c.is_empty()).collect();
        match components.as_slice() {
            [org, repo, git_ref, path @ ..] if !path.is_empty() => Ok(Self {
                org: org.to_string(),
                repo: repo.to_string(),
                git_ref: git_ref.to_string(),
                path: format!("/{}", path.join("/")),
            }),
            _ => Err(SkipReason::TooFewComponents),
        }
    }

    pub fn repository(&self) -> String {
        format!("{}/{}/{}", GITHUB_REGISTRY, self.org, self.repo)
    }
}

/// Resolution outcomes keyed by source url
#[derive(Debug, Default)]
pub struct ResolutionCache {
    resolved: DashMap<String, PartitionKey>,
    skipped: DashMap<String, SkipReason>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Resolution> {
        if let Some(key) = self.resolved.get(url) {
            return Some(Resolution::Resolved(key.value().clone()));
        }
        self.skipped.get(url).map(|reason| Resolution::Skipped(reason.value().clone()))
    }

    pub fn insert(&self, url: &str, resolution: &Resolution) {
        match resolution {
            Resolution::Resolved(key) => {
                self.resolved.insert(url.to_string(), key.clone());
            },
            Resolution::Skipped(reason) => {
                self.skipped.insert(url.to_string(), reason.clone());
            },
        }
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Workflow versions whose name and primary descriptor match the url
fn matching_versions(workflows: &[PublishedWorkflow], source: &SourceUrl) -> Vec<PartitionKey> {
    workflows
        .iter()
        .filter_map(|workflow| {
            let version = workflow.version(&source.git_ref)?;
            if version.primary_descriptor_path != source.path {
                return None;
            }
            PartitionKey::from_trs_id(&workflow.trs_id, &version.name)
        })
        .collect()
}

pub struct TrsResolver {
    webservice: Arc<dyn MetricsWebservice>,
    cache: Arc<ResolutionCache>,
}

impl TrsResolver {
    pub fn new(webservice: Arc<dyn MetricsWebservice>, cache: Arc<ResolutionCache>) -> Self {
        Self { webservice, cache }
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Resolve a source url, consulting the cache first
    ///
    /// Only webservice failures are errors; they are not cached so a later call retries.
    pub async fn resolve(&self, url: &str) -> AggregatorResult<Resolution> {
        if let Some(cached) = self.cache.get(url) {
            return Ok(cached);
        }

        let resolution = match SourceUrl::parse(url) {
            Err(reason) => Resolution::Skipped(reason),
            Ok(source) => {
                let workflows = self.webservice.published_workflows(&source.repository()).await?;
                let mut matches = matching_versions(&workflows, &source);
                match matches.len() {
                    0 => Resolution::Skipped(SkipReason::NoMatchingWorkflow),
                    1 => Resolution::Resolved(matches.remove(0)),
                    _ => Resolution::Skipped(SkipReason::AmbiguousWorkflow(
                        matches.iter().map(|key| key.trs_id()).collect(),
                    )),
                }
            },
        };

        match &resolution {
            Resolution::Resolved(key) => tracing::debug!("Resolved {} to {}", url, key),
            Resolution::Skipped(reason) => tracing::warn!("Skipping source url {}: {}", url, reason),
        }
        self.cache.insert(url, &resolution);
        Ok(resolution)
    }
}
