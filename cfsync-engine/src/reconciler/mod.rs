//! Reconcilers for different resource types.
//!
//! Each reconciler sequences create/read/update/delete/import against the
//! control plane for one resource kind and turns ambiguous remote answers
//! into deterministic local results.

pub mod private_domain_access;
pub mod service_instance;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::diff::ChangePlan;
use crate::error::Result;

pub use private_domain_access::{DomainAccessSpec, DomainAccessState, PrivateDomainAccessReconciler};
pub use service_instance::{ServiceInstanceReconciler, ServiceInstanceSpec, ServiceInstanceState};

/// Identity of a resource whose create the remote has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub id: String,
    /// False while the create still has to be awaited with `settle`.
    pub settled: bool,
}

/// Trait for resource reconcilers.
///
/// The host serializes calls per identity; implementations hold no
/// per-resource state between calls.
#[async_trait]
pub trait ResourceReconciler: Send + Sync {
    /// Desired state declared by the caller.
    type Spec: Send + Sync;
    /// Attributes refreshed from the control plane.
    type State: Send;

    /// Ask the remote to create the resource. Returns as soon as an identity
    /// is assigned, which must be persisted before calling `settle`.
    async fn submit(&self, spec: &Self::Spec) -> Result<Accepted>;

    /// Wait for the create of `id` to finish. Safe to call again on a later
    /// run when a previous wait was interrupted.
    async fn settle(&self, id: &str, cancel: &CancellationToken) -> Result<()>;

    /// Create the resource and return its durable identity.
    async fn create(&self, spec: &Self::Spec, cancel: &CancellationToken) -> Result<String> {
        let accepted = self.submit(spec).await?;
        if !accepted.settled {
            self.settle(&accepted.id, cancel).await?;
        }
        Ok(accepted.id)
    }

    /// Fetch current state. `None` means the resource no longer exists.
    async fn read(&self, id: &str) -> Result<Option<Self::State>>;

    /// Decide how to move from `prior` to `desired`.
    fn plan(&self, prior: &Self::Spec, desired: &Self::Spec) -> ChangePlan;

    /// Mutate in place. Fails with `ReplacementRequired` when the change
    /// cannot be applied in place; nothing is sent to the remote then.
    async fn update(
        &self,
        id: &str,
        prior: &Self::Spec,
        desired: &Self::Spec,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Delete the resource. Already gone counts as deleted.
    async fn delete(&self, id: &str, spec: &Self::Spec, cancel: &CancellationToken) -> Result<()>;

    /// Adopt an existing remote resource, with local-only settings reset.
    async fn import(&self, id: &str) -> Result<Self::Spec>;

    /// Overlay refreshed attributes on a previously applied spec, keeping
    /// fields the remote cannot report.
    fn refresh(&self, prior: &Self::Spec, state: Self::State) -> Self::Spec;
}
