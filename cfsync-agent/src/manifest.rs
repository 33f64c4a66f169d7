//! Declared resources, loaded from a JSON manifest.
//!
//! ```json
//! {
//!   "service_instances": [
//!     { "key": "orders-db", "name": "orders-db", "service_plan": "<plan guid>",
//!       "space": "<space guid>", "json_params": "{\"size\": \"large\"}",
//!       "replace_on_service_plan_change": true }
//!   ],
//!   "private_domain_access": [
//!     { "key": "shop-domain", "domain": "<domain guid>", "org": "<org guid>" }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use cfsync_engine::{DomainAccessSpec, EngineError, ServiceInstanceSpec};
use serde::{Deserialize, Serialize};

/// Full desired state for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub service_instances: Vec<ServiceInstanceEntry>,
    #[serde(default)]
    pub private_domain_access: Vec<DomainAccessEntry>,
}

/// A declared managed service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceInstanceEntry {
    /// Local address of the resource in the state file.
    pub key: String,
    pub name: String,
    pub service_plan: String,
    pub space: String,
    /// Broker parameters as a JSON object string.
    #[serde(default)]
    pub json_params: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub replace_on_service_plan_change: bool,
    #[serde(default)]
    pub replace_on_params_change: bool,
    #[serde(default)]
    pub recursive_delete: bool,
}

impl ServiceInstanceEntry {
    pub fn to_spec(&self) -> cfsync_engine::Result<ServiceInstanceSpec> {
        let mut spec = ServiceInstanceSpec::new(&self.name, &self.service_plan, &self.space)
            .with_json_params(&self.json_params)?
            .with_tags(self.tags.clone());
        spec.replace_on_service_plan_change = self.replace_on_service_plan_change;
        spec.replace_on_params_change = self.replace_on_params_change;
        spec.recursive_delete = self.recursive_delete;
        Ok(spec)
    }
}

/// A declared private domain share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainAccessEntry {
    pub key: String,
    pub domain: String,
    pub org: String,
}

impl DomainAccessEntry {
    pub fn to_spec(&self) -> DomainAccessSpec {
        DomainAccessSpec {
            domain: self.domain.clone(),
            org: self.org.clone(),
        }
    }
}

impl Manifest {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Keys must be non-empty and unique across all resource kinds, and
    /// every entry must convert into a valid spec.
    pub fn validate(&self) -> cfsync_engine::Result<()> {
        for entry in &self.service_instances {
            entry.to_spec()?.validate()?;
        }
        for entry in &self.private_domain_access {
            entry.to_spec().validate()?;
        }

        let mut seen = HashSet::new();
        for key in self.keys() {
            if key.trim().is_empty() {
                return Err(EngineError::validation("key", "must not be empty"));
            }
            if !seen.insert(key) {
                return Err(EngineError::validation(
                    "key",
                    format!("duplicate key {:?}", key),
                ));
            }
        }
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.service_instances
            .iter()
            .map(|e| e.key.as_str())
            .chain(self.private_domain_access.iter().map(|e| e.key.as_str()))
    }
}
