//! cfsync engine: asynchronous resource reconciliation against a Cloud
//! Foundry style control plane.
//!
//! - [`poller`] waits for long-running remote operations
//! - [`reconciler`] sequences create/read/update/delete/import per resource kind
//! - [`diff`] decides between in-place update and replacement
//! - [`identity`] encodes multi-part identities

pub mod client;
pub mod diff;
pub mod error;
pub mod identity;
pub mod poller;
pub mod reconciler;
pub mod types;

pub use client::{ClientError, ClientResult, PrivateDomainClient, RemoteResourceClient};
pub use diff::{ChangePlan, DiffPolicy, FieldPolicy};
pub use error::{EngineError, Result};
pub use poller::{PollConfig, PollOutcome, PollTimeouts, Poller, WaitFor};
pub use reconciler::{
    Accepted, DomainAccessSpec, PrivateDomainAccessReconciler, ResourceReconciler,
    ServiceInstanceReconciler, ServiceInstanceSpec,
};
pub use types::{LastOperation, OperationState, OperationType, RemoteResource};

// Re-export commonly used external types
pub use tokio_util::sync::CancellationToken;
