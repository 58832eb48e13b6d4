use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform label of the cross-platform rollup
///
/// Distinct from a platform that is simply absent from a source record.
pub const ALL_PLATFORMS: &str = "ALL";

/// Address of one tool-version's raw-data partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub entity: String,
    pub registry: String,
    pub org: String,
    pub name: String,
    pub version: String,
}

impl PartitionKey {
    pub fn new(
        entity: impl Into<String>,
        registry: impl Into<String>,
        org: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            registry: registry.into(),
            org: org.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// TRS id of the entry owning this partition
    ///
    /// Tools have no prefix; every other entity type is prefixed with `#{entity}/`.
    pub fn trs_id(&self) -> String {
        let path = format!("{}/{}/{}", self.registry, self.org, self.name);
        if self.entity == "tool" { path } else { format!("#{}/{}", self.entity, path) }
    }

    /// Partition of `version` under the given TRS id
    pub fn from_trs_id(trs_id: &str, version: &str) -> Option<Self> {
        let (entity, path) = match trs_id.strip_prefix('#') {
            Some(rest) => rest.split_once('/')?,
            None => ("tool", trs_id),
        };

        let mut parts = path.splitn(3, '/');
        let registry = parts.next().filter(|s| !s.is_empty())?;
        let org = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        if version.is_empty() {
            return None;
        }

        Some(Self::new(entity, registry, org, name, version))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.trs_id(), self.version)
    }
}
