//! Remote resource and operation types shared by the poller and reconcilers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of asynchronous operation the control plane runs on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(UnknownValue::new("operation type", other)),
        }
    }
}

/// State of an operation as reported by the control plane.
///
/// "Not found" is not a state the remote reports; the poller models it as
/// [`crate::poller::Observation::Absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::InProgress => "in progress",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" | "pending" => Ok(OperationState::Pending),
            "in progress" => Ok(OperationState::InProgress),
            "succeeded" => Ok(OperationState::Succeeded),
            "failed" => Ok(OperationState::Failed),
            other => Err(UnknownValue::new("operation state", other)),
        }
    }
}

/// A string from the remote that does not map onto a closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// The most recent operation the control plane ran on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOperation {
    pub op_type: OperationType,
    pub state: OperationState,
    pub description: String,
}

/// The control plane's view of a service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub guid: String,
    pub name: String,
    pub space_guid: String,
    pub service_plan_guid: String,
    pub tags: Vec<String>,
    pub last_operation: Option<LastOperation>,
}

/// Result of a mutating call: the resource as accepted, and whether the
/// control plane finishes the work asynchronously.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub resource: RemoteResource,
    pub asynchronous: bool,
}

/// Flags forwarded with a delete request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also delete bindings, keys and routes of the instance.
    pub recursive: bool,
    /// Remove the record without contacting the broker.
    pub purge: bool,
}
