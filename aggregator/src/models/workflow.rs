use serde::{Deserialize, Serialize};

/// A published workflow as listed by the webservice, with its version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedWorkflow {
    pub trs_id: String,
    #[serde(default)]
    pub workflow_versions: Vec<WorkflowVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowVersion {
    pub name: String,
    /// Path of the primary descriptor inside the repository, with a leading `/`
    pub primary_descriptor_path: String,
}

impl PublishedWorkflow {
    pub fn version(&self, name: &str) -> Option<&WorkflowVersion> {
        self.workflow_versions.iter().find(|v| v.name == name)
    }
}
