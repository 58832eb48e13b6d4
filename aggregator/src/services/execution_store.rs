//! Raw execution storage
//!
//! Raw submissions are JSON files laid out as
//! `{root}/{entity}/{registry}/{org}/{name}/{version}/{platform}/*.json`, with every path
//! segment url-encoded so names containing `/` stay one segment.
//!
//! Each record of a submission is decoded on its own: a record that does not decode is dropped
//! and logged, and the rest of its file still counts.

use crate::models::{ExecutionsRequestBody, PartitionKey};
use crate::utils::{AggregatorError, AggregatorResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Every partition holding raw data
    async fn list_partitions(&self) -> AggregatorResult<Vec<PartitionKey>>;

    /// Raw submissions of one partition, folded into one bundle per platform
    async fn list(&self, key: &PartitionKey) -> AggregatorResult<BTreeMap<String, ExecutionsRequestBody>>;
}

pub struct LocalExecutionStore {
    root: PathBuf,
}

const PARTITION_DEPTH: usize = 5;

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

fn decode(segment: &str) -> AggregatorResult<String> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| AggregatorError::storage(format!("Invalid path segment '{}': {}", segment, e)))
}

async fn subdirectories(path: &Path) -> AggregatorResult<Vec<(String, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Decode every element of the array under `field`, dropping the ones that do not decode
fn decode_records<T: DeserializeOwned>(file: &Path, submission: &mut Value, field: &str) -> Vec<T> {
    let records = match submission.get_mut(field).map(Value::take) {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(records)) => records,
        Some(other) => {
            tracing::warn!("Ignoring {} of {}: expected an array, found {}", field, file.display(), other);
            return Vec::new();
        },
    };

    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value(record) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Dropping {}[{}] of {}: {}", field, index, file.display(), e);
                None
            },
        })
        .collect()
}

/// One stored submission; only unparseable JSON fails the whole file
pub(crate) fn decode_submission(file: &Path, content: &[u8]) -> AggregatorResult<ExecutionsRequestBody> {
    let mut submission: Value = serde_json::from_slice(content)?;
    if !submission.is_object() {
        return Err(AggregatorError::storage(format!("{} does not hold a submission object", file.display())));
    }

    Ok(ExecutionsRequestBody {
        run_executions: decode_records(file, &mut submission, "runExecutions"),
        task_executions: decode_records(file, &mut submission, "taskExecutions"),
        validation_executions: decode_records(file, &mut submission, "validationExecutions"),
        aggregated_executions: decode_records(file, &mut submission, "aggregatedExecutions"),
    })
}

impl LocalExecutionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn partition_dir(&self, key: &PartitionKey) -> PathBuf {
        [&key.entity, &key.registry, &key.org, &key.name, &key.version]
            .iter()
            .fold(self.root.clone(), |path, segment| path.join(encode(segment)))
    }

    /// Store one raw submission, returning the written file
    pub async fn write(
        &self,
        key: &PartitionKey,
        platform: &str,
        file_name: &str,
        body: &ExecutionsRequestBody,
    ) -> AggregatorResult<PathBuf> {
        let dir = self.partition_dir(key).join(encode(platform));
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", encode(file_name)));
        tokio::fs::write(&path, serde_json::to_vec_pretty(body)?).await?;
        Ok(path)
    }

    async fn read_platform(&self, dir: &Path) -> AggregatorResult<ExecutionsRequestBody> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut bundle = ExecutionsRequestBody::default();
        for file in files {
            let content = tokio::fs::read(&file).await?;
            match decode_submission(&file, &content) {
                Ok(body) => bundle.extend(body),
                Err(e) => tracing::warn!("Skipping unreadable submission {}: {}", file.display(), e),
            }
        }
        Ok(bundle)
    }
}

#[async_trait]
impl ExecutionStore for LocalExecutionStore {
    async fn list_partitions(&self) -> AggregatorResult<Vec<PartitionKey>> {
        if !tokio::fs::try_exists(&self.root).await? {
            tracing::warn!("Storage root {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let mut frontier: Vec<(Vec<String>, PathBuf)> = vec![(Vec::new(), self.root.clone())];
        for _ in 0..PARTITION_DEPTH {
            let mut next = Vec::new();
            for (segments, path) in frontier {
                for (name, child) in subdirectories(&path).await? {
                    let mut child_segments = segments.clone();
                    child_segments.push(decode(&name)?);
                    next.push((child_segments, child));
                }
            }
            frontier = next;
        }

        let partitions = frontier
            .into_iter()
            .filter_map(|(segments, _)| match segments.as_slice() {
                [entity, registry, org, name, version] => {
                    Some(PartitionKey::new(entity, registry, org, name, version))
                },
                _ => None,
            })
            .collect::<Vec<_>>();
        tracing::info!("Found {} partitions under {}", partitions.len(), self.root.display());
        Ok(partitions)
    }

    async fn list(&self, key: &PartitionKey) -> AggregatorResult<BTreeMap<String, ExecutionsRequestBody>> {
        let dir = self.partition_dir(key);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(AggregatorError::storage(format!("No raw data for {}", key)));
        }

        let mut bundles = BTreeMap::new();
        for (name, platform_dir) in subdirectories(&dir).await? {
            let bundle = self.read_platform(&platform_dir).await?;
            if !bundle.is_empty() {
                bundles.insert(decode(&name)?, bundle);
            }
        }
        Ok(bundles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, RunExecution};

    fn bundle(status: ExecutionStatus) -> ExecutionsRequestBody {
        ExecutionsRequestBody { run_executions: vec![RunExecution::new(status)], ..Default::default() }
    }

    #[tokio::test]
    async fn test_write_then_list_partitions_and_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalExecutionStore::new(dir.path());
        let key = PartitionKey::new("workflow", "github.com", "org", "repo/wdl", "main");

        store.write(&key, "TERRA", "a", &bundle(ExecutionStatus::Successful)).await.unwrap();
        store.write(&key, "TERRA", "b", &bundle(ExecutionStatus::Failed)).await.unwrap();
        store.write(&key, "DNA_STACK", "c", &bundle(ExecutionStatus::Aborted)).await.unwrap();
        tokio::fs::write(store.partition_dir(&key).join("TERRA").join("broken.json"), b"{not json")
            .await
            .unwrap();

        assert_eq!(store.list_partitions().await.unwrap(), vec![key.clone()]);

        let bundles = store.list(&key).await.unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles["TERRA"].run_executions.len(), 2);
        assert_eq!(bundles["DNA_STACK"].run_executions[0].execution_status, ExecutionStatus::Aborted);
    }

    #[tokio::test]
    async fn test_bad_records_do_not_drop_their_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalExecutionStore::new(dir.path());
        let key = PartitionKey::new("workflow", "github.com", "org", "repo", "main");
        let platform_dir = store.partition_dir(&key).join("TERRA");
        tokio::fs::create_dir_all(&platform_dir).await.unwrap();

        let submission = serde_json::json!({
            "runExecutions": [
                {"executionStatus": "SUCCESSFUL", "cpuRequirements": 2},
                {"executionStatus": "SUCCESSFUL", "cpuRequirements": 4},
                {"cpuRequirements": 8}
            ],
            "taskExecutions": [
                {"taskExecutions": [{"executionStatus": "FAILED"}]},
                {"taskExecutions": [{"executionStatus": "EXPLODED"}]}
            ],
            "validationExecutions": [
                {"validatorTool": "MINIWDL", "validatorToolVersion": "1.0", "isValid": true,
                 "dateExecuted": "2023-01-01T00:00:00Z"},
                {"validatorTool": "MINIWDL", "isValid": true}
            ],
            "aggregatedExecutions": null
        });
        tokio::fs::write(platform_dir.join("mixed.json"), serde_json::to_vec(&submission).unwrap()).await.unwrap();

        let bundles = store.list(&key).await.unwrap();
        let terra = &bundles["TERRA"];
        let cpus: Vec<Option<i64>> = terra.run_executions.iter().map(|e| e.cpu_requirements).collect();
        assert_eq!(cpus, vec![Some(2), Some(4)]);
        assert_eq!(terra.task_executions.len(), 1);
        assert_eq!(terra.validation_executions.len(), 1);
        assert!(terra.aggregated_executions.is_empty());
    }

    #[test]
    fn test_non_object_submission_is_rejected() {
        let file = Path::new("list.json");
        assert!(decode_submission(file, b"[1, 2]").is_err());
        assert!(decode_submission(file, b"{not json").is_err());
        assert!(decode_submission(file, b"{}").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_has_no_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalExecutionStore::new(dir.path().join("missing"));
        assert!(store.list_partitions().await.unwrap().is_empty());
    }
}
