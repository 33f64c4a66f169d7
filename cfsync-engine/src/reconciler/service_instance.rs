//! Service instance reconciler - provisions managed service instances.
//!
//! Every mutation may be finished asynchronously by the service broker, in
//! which case the instance's last operation is polled until it settles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Accepted, ResourceReconciler};
use crate::client::{CreateRequest, RemoteResourceClient, UpdateRequest};
use crate::diff::{ChangePlan, DiffPolicy, FieldChange, FieldPolicy};
use crate::error::{EngineError, Result};
use crate::poller::{Described, Observation, PollOutcome, PollTimeouts, Poller, WaitFor};
use crate::types::{DeleteOptions, OperationState, OperationType, RemoteResource};

/// Field policies for service instances.
pub const SERVICE_INSTANCE_POLICY: DiffPolicy = DiffPolicy::new(&[
    ("name", FieldPolicy::InPlace),
    ("service_plan", FieldPolicy::ReplaceWhenFlagged),
    ("parameters", FieldPolicy::ReplaceWhenFlagged),
    ("tags", FieldPolicy::InPlace),
    ("space", FieldPolicy::AlwaysReplace),
]);

/// Desired state of a managed service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstanceSpec {
    pub name: String,
    /// Service plan GUID.
    pub service_plan: String,
    /// Space GUID.
    pub space: String,
    /// Broker parameters. Never reported back by the control plane.
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub replace_on_service_plan_change: bool,
    #[serde(default)]
    pub replace_on_params_change: bool,
    #[serde(default)]
    pub recursive_delete: bool,
}

impl ServiceInstanceSpec {
    pub fn new(
        name: impl Into<String>,
        service_plan: impl Into<String>,
        space: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_plan: service_plan.into(),
            space: space.into(),
            parameters: None,
            tags: Vec::new(),
            replace_on_service_plan_change: false,
            replace_on_params_change: false,
            recursive_delete: false,
        }
    }

    /// Set parameters from a JSON document. An empty string means none.
    pub fn with_json_params(mut self, json: &str) -> Result<Self> {
        self.parameters = parse_json_params(json)?;
        Ok(self)
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("service_plan", &self.service_plan),
            ("space", &self.space),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::validation(field, "must not be empty"));
            }
        }
        Ok(())
    }
}

/// Parse broker parameters, which must be a JSON object.
pub fn parse_json_params(json: &str) -> Result<Option<Map<String, Value>>> {
    if json.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(other) => Err(EngineError::validation(
            "json_params",
            format!("expected a JSON object, got {}", json_kind(&other)),
        )),
        Err(e) => Err(EngineError::validation("json_params", e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Attributes the control plane reports for a service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstanceState {
    pub guid: String,
    pub name: String,
    pub service_plan: String,
    pub space: String,
    pub tags: Vec<String>,
}

impl From<RemoteResource> for ServiceInstanceState {
    fn from(r: RemoteResource) -> Self {
        Self {
            guid: r.guid,
            name: r.name,
            service_plan: r.service_plan_guid,
            space: r.space_guid,
            tags: r.tags,
        }
    }
}

/// Service instance reconciler.
pub struct ServiceInstanceReconciler<C> {
    client: C,
    timeouts: PollTimeouts,
    purge_on_delete: bool,
}

impl<C: RemoteResourceClient> ServiceInstanceReconciler<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            timeouts: PollTimeouts::default(),
            purge_on_delete: false,
        }
    }

    pub fn with_timeouts(mut self, timeouts: PollTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Purge instance records on delete instead of asking the broker.
    pub fn with_purge_on_delete(mut self, purge: bool) -> Self {
        self.purge_on_delete = purge;
        self
    }

    async fn await_operation(
        &self,
        guid: &str,
        operation: OperationType,
        wait_for: WaitFor,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome<RemoteResource>> {
        let client = &self.client;
        let poller = Poller::new(operation, guid, self.timeouts.get(operation), cancel);
        poller
            .wait(wait_for, move || async move {
                Observation::of(client.operation_status(guid).await, operation)
            })
            .await
    }
}

fn has_failed(resource: &RemoteResource, operation: OperationType) -> bool {
    resource
        .last_operation
        .as_ref()
        .is_some_and(|op| op.op_type == operation && op.state == OperationState::Failed)
}

/// A synchronous answer can still carry a failed operation.
fn check_settled(resource: &RemoteResource, operation: OperationType) -> Result<()> {
    if !has_failed(resource, operation) {
        return Ok(());
    }
    Err(EngineError::TerminalFailure {
        operation,
        description: resource.description(),
    })
}

#[async_trait]
impl<C: RemoteResourceClient> ResourceReconciler for ServiceInstanceReconciler<C> {
    type Spec = ServiceInstanceSpec;
    type State = ServiceInstanceState;

    async fn submit(&self, spec: &Self::Spec) -> Result<Accepted> {
        spec.validate()?;
        info!(
            "Creating service instance {} (plan {}) in space {}",
            spec.name, spec.service_plan, spec.space
        );

        let submitted = self
            .client
            .create(&CreateRequest {
                space_guid: spec.space.clone(),
                service_plan_guid: spec.service_plan.clone(),
                name: spec.name.clone(),
                parameters: spec.parameters.clone(),
                tags: spec.tags.clone(),
            })
            .await?;
        let resource = submitted.resource;

        // A failed synchronous answer is confirmed through `settle`.
        let settled =
            !submitted.asynchronous && !has_failed(&resource, OperationType::Create);
        if settled {
            info!("Service instance {} created as {}", spec.name, resource.guid);
        } else {
            debug!("Service instance {} accepted as {}", spec.name, resource.guid);
        }
        Ok(Accepted {
            id: resource.guid,
            settled,
        })
    }

    async fn settle(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.await_operation(id, OperationType::Create, WaitFor::SUCCEEDED, cancel)
            .await?;
        info!("Service instance {} created", id);
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<Self::State>> {
        match self.client.read(id).await {
            Ok(resource) => Ok(Some(resource.into())),
            Err(e) if e.is_not_found() => {
                debug!("Service instance {} no longer exists", id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn plan(&self, prior: &Self::Spec, desired: &Self::Spec) -> ChangePlan {
        SERVICE_INSTANCE_POLICY.plan(&[
            FieldChange::new("name", prior.name != desired.name),
            FieldChange::new("service_plan", prior.service_plan != desired.service_plan)
                .forced_by(desired.replace_on_service_plan_change),
            FieldChange::new("parameters", prior.parameters != desired.parameters)
                .forced_by(desired.replace_on_params_change),
            FieldChange::new("tags", prior.tags != desired.tags),
            FieldChange::new("space", prior.space != desired.space),
        ])
    }

    async fn update(
        &self,
        id: &str,
        prior: &Self::Spec,
        desired: &Self::Spec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let changed = match self.plan(prior, desired) {
            ChangePlan::Unchanged => {
                debug!("Service instance {} is up to date", id);
                return Ok(());
            }
            ChangePlan::Replace(fields) => {
                return Err(EngineError::ReplacementRequired { fields });
            }
            ChangePlan::InPlace(fields) => fields,
        };
        desired.validate()?;
        info!("Updating service instance {} ({:?})", id, changed);

        // Cleared parameters are sent as an empty object.
        let parameters = if changed.contains(&"parameters") {
            Some(desired.parameters.clone().unwrap_or_default())
        } else {
            None
        };
        let submitted = self
            .client
            .update(&UpdateRequest {
                guid: id.to_string(),
                name: desired.name.clone(),
                service_plan_guid: desired.service_plan.clone(),
                parameters,
                tags: desired.tags.clone(),
            })
            .await?;

        if submitted.asynchronous {
            self.await_operation(id, OperationType::Update, WaitFor::SUCCEEDED, cancel)
                .await?;
        } else {
            check_settled(&submitted.resource, OperationType::Update)?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str, spec: &Self::Spec, cancel: &CancellationToken) -> Result<()> {
        info!("Deleting service instance {}", id);
        let options = DeleteOptions {
            recursive: spec.recursive_delete,
            purge: self.purge_on_delete,
        };

        let asynchronous = match self.client.delete(id, options).await {
            Ok(asynchronous) => asynchronous,
            Err(e) if e.is_not_found() => {
                info!("Service instance {} already deleted", id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if asynchronous {
            self.await_operation(id, OperationType::Delete, WaitFor::ABSENT, cancel)
                .await?;
        }
        Ok(())
    }

    async fn import(&self, id: &str) -> Result<Self::Spec> {
        let resource = self.client.read(id).await?;
        info!("Importing service instance {} ({})", resource.name, id);

        Ok(ServiceInstanceSpec {
            name: resource.name,
            service_plan: resource.service_plan_guid,
            space: resource.space_guid,
            parameters: None,
            tags: resource.tags,
            replace_on_service_plan_change: false,
            replace_on_params_change: false,
            recursive_delete: false,
        })
    }

    fn refresh(&self, prior: &Self::Spec, state: Self::State) -> Self::Spec {
        ServiceInstanceSpec {
            name: state.name,
            service_plan: state.service_plan,
            space: state.space,
            tags: state.tags,
            ..prior.clone()
        }
    }
}
