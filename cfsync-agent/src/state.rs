//! Persisted identities of applied resources.
//!
//! The state file maps each manifest key to the identity the control plane
//! assigned (or the composite identity of a relational resource) together
//! with the desired state last applied. Parameters and local-only flags
//! cannot be read back from the control plane, so the recorded spec is the
//! only source for them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use cfsync_engine::{DomainAccessSpec, ServiceInstanceSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const STATE_VERSION: u32 = 1;

/// Resource kinds the agent manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ServiceInstance,
    PrivateDomainAccess,
}

/// What is known about one applied resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRecord {
    ServiceInstance {
        id: String,
        spec: ServiceInstanceSpec,
    },
    PrivateDomainAccess {
        id: String,
        spec: DomainAccessSpec,
    },
}

impl ResourceRecord {
    pub fn id(&self) -> &str {
        match self {
            ResourceRecord::ServiceInstance { id, .. } => id,
            ResourceRecord::PrivateDomainAccess { id, .. } => id,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRecord::ServiceInstance { .. } => ResourceKind::ServiceInstance,
            ResourceRecord::PrivateDomainAccess { .. } => ResourceKind::PrivateDomainAccess,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    resources: BTreeMap<String, ResourceRecord>,
    /// Keys whose create was accepted but not yet seen to finish.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    unsettled: BTreeSet<String>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resources: BTreeMap::new(),
            unsettled: BTreeSet::new(),
        }
    }
}

/// State file on disk plus its in-memory copy.
pub struct StateStore {
    path: PathBuf,
    state: StateFile,
}

impl StateStore {
    /// Open the state file. A missing file is an empty state.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let state: StateFile = serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid state file {}", path.display()))?;
                if state.version != STATE_VERSION {
                    bail!(
                        "Unsupported state version {} in {} (expected {})",
                        state.version,
                        path.display(),
                        STATE_VERSION
                    );
                }
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                StateFile::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state file {}", path.display()));
            }
        };
        Ok(Self { path, state })
    }

    pub fn get(&self, key: &str) -> Option<&ResourceRecord> {
        self.state.resources.get(key)
    }

    pub fn set(&mut self, key: &str, record: ResourceRecord) {
        self.state.resources.insert(key.to_string(), record);
    }

    pub fn remove(&mut self, key: &str) -> Option<ResourceRecord> {
        self.state.unsettled.remove(key);
        self.state.resources.remove(key)
    }

    /// Whether the create of `key` may still be running remotely.
    pub fn is_unsettled(&self, key: &str) -> bool {
        self.state.unsettled.contains(key)
    }

    pub fn set_unsettled(&mut self, key: &str, unsettled: bool) {
        if unsettled {
            self.state.unsettled.insert(key.to_string());
        } else {
            self.state.unsettled.remove(key);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.resources.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.resources.is_empty()
    }

    /// Write the state next to the target and rename it into place.
    pub async fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
