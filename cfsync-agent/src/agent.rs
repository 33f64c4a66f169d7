//! Apply agent - converges the control plane onto a manifest.
//!
//! Each manifest entry is matched with its record in the state file by key.
//! Recorded resources are re-read and refreshed before planning, missing
//! ones are recreated, and records whose key left the manifest are deleted.
//! The state file is saved after every step that changed the remote side,
//! and a create is recorded before its operation settles so that an
//! interrupted wait is resumed by the next run.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use cfsync_engine::reconciler::ResourceReconciler;
use cfsync_engine::{
    CancellationToken, ChangePlan, DomainAccessSpec, EngineError, PollTimeouts,
    PrivateDomainAccessReconciler, PrivateDomainClient, RemoteResourceClient,
    ServiceInstanceReconciler, ServiceInstanceSpec,
};
use tracing::{error, info, warn};

use crate::manifest::Manifest;
use crate::state::{ResourceKind, ResourceRecord, StateStore};

/// What happened to one resource during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    /// The recorded resource was gone remotely and has been created again.
    Recreated,
    Updated,
    Replaced,
    Unchanged,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied(Action),
    Failed(String),
}

/// Per-key results of an apply run, in processing order.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<(String, Outcome)>,
}

impl ApplyReport {
    pub fn get(&self, key: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, Outcome::Failed(_)))
            .count()
    }

    fn push(&mut self, key: &str, result: Result<Action>) -> Result<()> {
        match result {
            Ok(action) => {
                self.outcomes.push((key.to_string(), Outcome::Applied(action)));
                Ok(())
            }
            Err(e) if is_cancelled(&e) => Err(e),
            Err(e) => {
                error!("Failed to apply {}: {:#}", key, e);
                self.outcomes
                    .push((key.to_string(), Outcome::Failed(format!("{:#}", e))));
                Ok(())
            }
        }
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<EngineError>()
        .is_some_and(EngineError::is_cancelled)
}

/// Agent that applies manifests through one control plane client.
pub struct Agent<C> {
    services: ServiceInstanceReconciler<Arc<C>>,
    domains: PrivateDomainAccessReconciler<Arc<C>>,
}

impl<C> Agent<C>
where
    C: RemoteResourceClient + PrivateDomainClient,
{
    pub fn new(client: Arc<C>, timeouts: PollTimeouts, purge_on_delete: bool) -> Self {
        Self {
            services: ServiceInstanceReconciler::new(Arc::clone(&client))
                .with_timeouts(timeouts)
                .with_purge_on_delete(purge_on_delete),
            domains: PrivateDomainAccessReconciler::new(client),
        }
    }

    /// Apply a manifest. Individual failures are reported and the run
    /// continues; cancellation stops the run with an error.
    pub async fn apply(
        &self,
        manifest: &Manifest,
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        info!(
            "Applying manifest (service_instances={}, private_domain_access={})",
            manifest.service_instances.len(),
            manifest.private_domain_access.len()
        );
        let mut report = ApplyReport::default();

        // 1. Service instances
        for entry in &manifest.service_instances {
            ensure_running(cancel)?;
            let result = match entry.to_spec() {
                Ok(desired) => self.apply_service_instance(&entry.key, desired, state, cancel).await,
                Err(e) => Err(e.into()),
            };
            report.push(&entry.key, result)?;
        }

        // 2. Private domain shares
        for entry in &manifest.private_domain_access {
            ensure_running(cancel)?;
            let result = self
                .apply_domain_access(&entry.key, entry.to_spec(), state, cancel)
                .await;
            report.push(&entry.key, result)?;
        }

        // 3. Prune records no longer declared
        let desired: HashSet<&str> = manifest.keys().collect();
        for key in state.keys() {
            if desired.contains(key.as_str()) {
                continue;
            }
            ensure_running(cancel)?;
            info!("Pruning {}", key);
            let result = self.retire(&key, state, cancel).await;
            report.push(&key, result.map(|()| Action::Deleted))?;
        }

        info!(
            "Manifest applied ({} resources, {} failed)",
            report.outcomes.len(),
            report.failed()
        );
        Ok(report)
    }

    /// Adopt an existing remote resource under `key`.
    pub async fn import(
        &self,
        kind: ResourceKind,
        key: &str,
        id: &str,
        state: &mut StateStore,
    ) -> Result<()> {
        if let Some(existing) = state.get(key) {
            bail!("{} is already managed as {}", key, existing.id());
        }

        let record = match kind {
            ResourceKind::ServiceInstance => ResourceRecord::ServiceInstance {
                id: id.to_string(),
                spec: self.services.import(id).await?,
            },
            ResourceKind::PrivateDomainAccess => ResourceRecord::PrivateDomainAccess {
                id: id.to_string(),
                spec: self.domains.import(id).await?,
            },
        };
        state.set(key, record);
        state.save().await?;
        info!("Imported {} as {}", id, key);
        Ok(())
    }

    async fn apply_service_instance(
        &self,
        key: &str,
        desired: ServiceInstanceSpec,
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<Action> {
        let prior = match state.get(key) {
            Some(ResourceRecord::ServiceInstance { id, spec }) => Some((id.clone(), spec.clone())),
            Some(_) => {
                self.retire(key, state, cancel).await?;
                None
            }
            None => None,
        };
        converge(&self.services, key, &desired, prior, service_record, state, cancel).await
    }

    async fn apply_domain_access(
        &self,
        key: &str,
        desired: DomainAccessSpec,
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<Action> {
        let prior = match state.get(key) {
            Some(ResourceRecord::PrivateDomainAccess { id, spec }) => {
                Some((id.clone(), spec.clone()))
            }
            Some(_) => {
                self.retire(key, state, cancel).await?;
                None
            }
            None => None,
        };
        converge(&self.domains, key, &desired, prior, domain_record, state, cancel).await
    }

    /// Delete the resource recorded under `key` and forget it.
    async fn retire(
        &self,
        key: &str,
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match state.get(key) {
            Some(ResourceRecord::ServiceInstance { id, spec }) => {
                self.services.delete(id, spec, cancel).await?
            }
            Some(ResourceRecord::PrivateDomainAccess { id, spec }) => {
                self.domains.delete(id, spec, cancel).await?
            }
            None => return Ok(()),
        }
        state.remove(key);
        state.save().await
    }
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        bail!("Apply cancelled");
    }
    Ok(())
}

fn service_record(id: String, spec: ServiceInstanceSpec) -> ResourceRecord {
    ResourceRecord::ServiceInstance { id, spec }
}

fn domain_record(id: String, spec: DomainAccessSpec) -> ResourceRecord {
    ResourceRecord::PrivateDomainAccess { id, spec }
}

/// Create `desired` under `key`. The identity is recorded as soon as the
/// remote accepts the create, so an interrupted wait is resumed on the next
/// run instead of creating a second resource.
async fn create<R>(
    reconciler: &R,
    key: &str,
    desired: &R::Spec,
    record: fn(String, R::Spec) -> ResourceRecord,
    state: &mut StateStore,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: ResourceReconciler,
    R::Spec: Clone,
{
    let accepted = reconciler.submit(desired).await?;
    state.set(key, record(accepted.id.clone(), desired.clone()));
    state.set_unsettled(key, !accepted.settled);
    state.save().await?;

    if !accepted.settled {
        reconciler.settle(&accepted.id, cancel).await?;
        state.set_unsettled(key, false);
        state.save().await?;
    }
    Ok(())
}

/// Drive one resource from its recorded state to `desired`.
async fn converge<R>(
    reconciler: &R,
    key: &str,
    desired: &R::Spec,
    prior: Option<(String, R::Spec)>,
    record: fn(String, R::Spec) -> ResourceRecord,
    state: &mut StateStore,
    cancel: &CancellationToken,
) -> Result<Action>
where
    R: ResourceReconciler,
    R::Spec: Clone,
{
    let Some((id, prior)) = prior else {
        create(reconciler, key, desired, record, state, cancel).await?;
        return Ok(Action::Created);
    };

    let current = match reconciler.read(&id).await? {
        Some(remote) => reconciler.refresh(&prior, remote),
        None => {
            warn!("{} ({}) no longer exists, recreating", key, id);
            state.remove(key);
            state.save().await?;
            create(reconciler, key, desired, record, state, cancel).await?;
            return Ok(Action::Recreated);
        }
    };

    let resumed = state.is_unsettled(key);
    if resumed {
        info!("Resuming create of {} ({})", key, id);
        match reconciler.settle(&id, cancel).await {
            Ok(()) => {
                state.set_unsettled(key, false);
                state.save().await?;
            }
            Err(e @ EngineError::TerminalFailure { .. }) => {
                warn!("{} ({}) failed to create, recreating: {}", key, id, e);
                reconciler.delete(&id, &current, cancel).await?;
                state.remove(key);
                state.save().await?;
                create(reconciler, key, desired, record, state, cancel).await?;
                return Ok(Action::Recreated);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let action = match reconciler.plan(&current, desired) {
        ChangePlan::Unchanged if resumed => Action::Created,
        ChangePlan::Unchanged => Action::Unchanged,
        ChangePlan::InPlace(_) => {
            // Keep the refreshed spec on record until the update settles.
            state.set(key, record(id.clone(), current.clone()));
            state.save().await?;
            reconciler.update(&id, &current, desired, cancel).await?;
            Action::Updated
        }
        ChangePlan::Replace(fields) => {
            info!("{} requires replacement ({:?})", key, fields);
            reconciler.delete(&id, &current, cancel).await?;
            state.remove(key);
            state.save().await?;
            create(reconciler, key, desired, record, state, cancel).await?;
            return Ok(Action::Replaced);
        }
    };

    state.set(key, record(id, desired.clone()));
    state.save().await?;
    Ok(action)
}
