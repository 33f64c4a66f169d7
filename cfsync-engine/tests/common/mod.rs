//! Shared test utilities for cfsync-engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use cfsync_engine::client::{CreateRequest, UpdateRequest};
use cfsync_engine::types::{DeleteOptions, Submitted};
use cfsync_engine::{
    ClientError, ClientResult, LastOperation, OperationState, OperationType, PrivateDomainClient,
    RemoteResource, RemoteResourceClient,
};

/// One scripted answer to an operation status query.
#[derive(Debug, Clone)]
pub enum Step {
    Op(OperationType, OperationState, &'static str),
    NotFound,
    Transport,
}

/// A call the fake received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(CreateRequest),
    Read(String),
    Update(UpdateRequest),
    Delete(String, DeleteOptions),
    Status(String),
    Share(String, String),
    ListDomains(String),
    Unshare(String, String),
}

#[derive(Default)]
struct Inner {
    next_guid: u32,
    instances: HashMap<String, RemoteResource>,
    script: VecDeque<Step>,
    asynchronous: bool,
    read_error: Option<ClientError>,
    delete_error: Option<ClientError>,
    shared: HashMap<String, Vec<String>>,
    calls: Vec<Call>,
}

/// Scripted in-memory control plane.
///
/// Mutations are recorded and applied to an in-memory instance table.
/// Status queries replay the script; the last step repeats once the script
/// runs out.
pub struct FakeControlPlane {
    inner: Mutex<Inner>,
}

impl FakeControlPlane {
    /// A control plane whose mutations complete asynchronously.
    pub fn asynchronous() -> Self {
        Self {
            inner: Mutex::new(Inner {
                asynchronous: true,
                ..Default::default()
            }),
        }
    }

    /// A control plane whose mutations complete immediately.
    pub fn synchronous() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn script(&self, steps: Vec<Step>) {
        self.inner.lock().unwrap().script = steps.into();
    }

    pub fn insert_instance(&self, resource: RemoteResource) {
        let mut inner = self.inner.lock().unwrap();
        inner.instances.insert(resource.guid.clone(), resource);
    }

    pub fn fail_reads(&self, error: ClientError) {
        self.inner.lock().unwrap().read_error = Some(error);
    }

    pub fn fail_deletes(&self, error: ClientError) {
        self.inner.lock().unwrap().delete_error = Some(error);
    }

    pub fn share(&self, org: &str, domain: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .shared
            .entry(org.to_string())
            .or_default()
            .push(domain.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Status(_)))
            .count()
    }

    pub fn instance(&self, guid: &str) -> Option<RemoteResource> {
        self.inner.lock().unwrap().instances.get(guid).cloned()
    }

    pub fn shared_domains(&self, org: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .shared
            .get(org)
            .cloned()
            .unwrap_or_default()
    }
}

/// Build a remote resource with an optional last operation.
pub fn instance(guid: &str, name: &str, last: Option<(OperationType, OperationState)>) -> RemoteResource {
    RemoteResource {
        guid: guid.to_string(),
        name: name.to_string(),
        space_guid: "space-1".to_string(),
        service_plan_guid: "plan-small".to_string(),
        tags: vec![],
        last_operation: last.map(|(op_type, state)| LastOperation {
            op_type,
            state,
            description: String::new(),
        }),
    }
}

fn with_operation(
    mut resource: RemoteResource,
    op_type: OperationType,
    state: OperationState,
    description: &str,
) -> RemoteResource {
    resource.last_operation = Some(LastOperation {
        op_type,
        state,
        description: description.to_string(),
    });
    resource
}

#[async_trait]
impl RemoteResourceClient for FakeControlPlane {
    async fn create(&self, request: &CreateRequest) -> ClientResult<Submitted> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Create(request.clone()));
        inner.next_guid += 1;

        let state = if inner.asynchronous {
            OperationState::Pending
        } else {
            OperationState::Succeeded
        };
        let resource = RemoteResource {
            guid: format!("guid-{}", inner.next_guid),
            name: request.name.clone(),
            space_guid: request.space_guid.clone(),
            service_plan_guid: request.service_plan_guid.clone(),
            tags: request.tags.clone(),
            last_operation: Some(LastOperation {
                op_type: OperationType::Create,
                state,
                description: String::new(),
            }),
        };
        inner
            .instances
            .insert(resource.guid.clone(), resource.clone());

        Ok(Submitted {
            resource,
            asynchronous: inner.asynchronous,
        })
    }

    async fn read(&self, guid: &str) -> ClientResult<RemoteResource> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Read(guid.to_string()));
        if let Some(e) = inner.read_error.clone() {
            return Err(e);
        }
        inner
            .instances
            .get(guid)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(guid.to_string()))
    }

    async fn update(&self, request: &UpdateRequest) -> ClientResult<Submitted> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Update(request.clone()));
        let asynchronous = inner.asynchronous;

        let resource = inner
            .instances
            .get_mut(&request.guid)
            .ok_or_else(|| ClientError::NotFound(request.guid.clone()))?;
        resource.name = request.name.clone();
        resource.service_plan_guid = request.service_plan_guid.clone();
        resource.tags = request.tags.clone();
        let state = if asynchronous {
            OperationState::InProgress
        } else {
            OperationState::Succeeded
        };
        let resource = with_operation(resource.clone(), OperationType::Update, state, "");

        Ok(Submitted {
            resource,
            asynchronous,
        })
    }

    async fn delete(&self, guid: &str, options: DeleteOptions) -> ClientResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Delete(guid.to_string(), options));
        if let Some(e) = inner.delete_error.clone() {
            return Err(e);
        }
        if !inner.instances.contains_key(guid) {
            return Err(ClientError::NotFound(guid.to_string()));
        }
        if !inner.asynchronous {
            inner.instances.remove(guid);
        }
        Ok(inner.asynchronous)
    }

    async fn operation_status(&self, guid: &str) -> ClientResult<RemoteResource> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Status(guid.to_string()));

        let step = if inner.script.len() > 1 {
            inner.script.pop_front()
        } else {
            inner.script.front().cloned()
        };
        let base = inner
            .instances
            .get(guid)
            .cloned()
            .unwrap_or_else(|| instance(guid, "unknown", None));

        match step {
            Some(Step::Op(op_type, state, description)) => {
                Ok(with_operation(base, op_type, state, description))
            }
            Some(Step::NotFound) => {
                inner.instances.remove(guid);
                Err(ClientError::NotFound(guid.to_string()))
            }
            Some(Step::Transport) => Err(ClientError::Transport("connection reset".to_string())),
            None => inner
                .instances
                .get(guid)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(guid.to_string())),
        }
    }
}

#[async_trait]
impl PrivateDomainClient for FakeControlPlane {
    async fn share_private_domain(&self, domain_guid: &str, org_guid: &str) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(Call::Share(domain_guid.to_string(), org_guid.to_string()));
        inner
            .shared
            .entry(org_guid.to_string())
            .or_default()
            .push(domain_guid.to_string());
        Ok(())
    }

    async fn private_domains(&self, org_guid: &str) -> ClientResult<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::ListDomains(org_guid.to_string()));
        inner
            .shared
            .get(org_guid)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(org_guid.to_string()))
    }

    async fn unshare_private_domain(
        &self,
        org_guid: &str,
        domain_guid: &str,
    ) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(Call::Unshare(org_guid.to_string(), domain_guid.to_string()));
        let domains = inner
            .shared
            .get_mut(org_guid)
            .ok_or_else(|| ClientError::NotFound(org_guid.to_string()))?;
        let before = domains.len();
        domains.retain(|d| d != domain_guid);
        if domains.len() == before {
            return Err(ClientError::NotFound(domain_guid.to_string()));
        }
        Ok(())
    }
}
