//! Shared test utilities for cfsync-agent integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cfsync_agent::{Agent, Manifest, StateStore};
use cfsync_engine::client::{CreateRequest, UpdateRequest};
use cfsync_engine::types::{DeleteOptions, Submitted};
use cfsync_engine::{
    ClientError, ClientResult, LastOperation, OperationState, OperationType, PollTimeouts,
    PrivateDomainClient, RemoteResource, RemoteResourceClient,
};

#[derive(Default)]
struct Inner {
    next_guid: u32,
    instances: HashMap<String, RemoteResource>,
    shared: HashMap<String, Vec<String>>,
    failing_names: HashSet<String>,
    asynchronous: bool,
    stalled: bool,
    creates: Vec<String>,
    updates: Vec<UpdateRequest>,
    deletes: Vec<String>,
}

/// In-memory Cloud Controller. Operations complete synchronously unless
/// built with [`FakeCloud::asynchronous`].
#[derive(Default)]
pub struct FakeCloud {
    inner: Mutex<Inner>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates are accepted in progress and succeed on the first status
    /// check that is not stalled.
    pub fn asynchronous() -> Arc<Self> {
        let cloud = Self::default();
        cloud.inner.lock().unwrap().asynchronous = true;
        Arc::new(cloud)
    }

    /// While stalled, in-progress operations never complete.
    pub fn stall(&self, stalled: bool) {
        self.inner.lock().unwrap().stalled = stalled;
    }

    /// Fail every operation still in progress.
    pub fn fail_in_flight(&self, description: &str) {
        let mut inner = self.inner.lock().unwrap();
        for resource in inner.instances.values_mut() {
            if let Some(op) = resource.last_operation.as_mut() {
                if op.state == OperationState::InProgress {
                    op.state = OperationState::Failed;
                    op.description = description.to_string();
                }
            }
        }
    }

    /// Creates of instances with this name are rejected by the broker.
    pub fn reject_name(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_names
            .insert(name.to_string());
    }

    pub fn insert_instance(&self, guid: &str, name: &str, plan: &str, space: &str) {
        let resource = RemoteResource {
            guid: guid.to_string(),
            name: name.to_string(),
            space_guid: space.to_string(),
            service_plan_guid: plan.to_string(),
            tags: vec![],
            last_operation: None,
        };
        self.inner
            .lock()
            .unwrap()
            .instances
            .insert(guid.to_string(), resource);
    }

    /// Simulate an out-of-band deletion.
    pub fn remove_instance(&self, guid: &str) {
        self.inner.lock().unwrap().instances.remove(guid);
    }

    /// Simulate an out-of-band rename.
    pub fn rename_instance(&self, guid: &str, name: &str) {
        if let Some(resource) = self.inner.lock().unwrap().instances.get_mut(guid) {
            resource.name = name.to_string();
        }
    }

    pub fn instance(&self, guid: &str) -> Option<RemoteResource> {
        self.inner.lock().unwrap().instances.get(guid).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.lock().unwrap().instances.len()
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

    pub fn creates(&self) -> Vec<String> {
        self.inner.lock().unwrap().creates.clone()
    }

    pub fn updates(&self) -> Vec<UpdateRequest> {
        self.inner.lock().unwrap().updates.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.inner.lock().unwrap().deletes.clone()
    }
}

fn with_operation(
    mut resource: RemoteResource,
    op_type: OperationType,
    state: OperationState,
) -> RemoteResource {
    resource.last_operation = Some(LastOperation {
        op_type,
        state,
        description: String::new(),
    });
    resource
}

fn settled(resource: RemoteResource, op_type: OperationType) -> RemoteResource {
    with_operation(resource, op_type, OperationState::Succeeded)
}

fn not_found(guid: &str) -> ClientError {
    ClientError::NotFound(format!("The service instance could not be found: {}", guid))
}

#[async_trait]
impl RemoteResourceClient for FakeCloud {
    async fn create(&self, request: &CreateRequest) -> ClientResult<Submitted> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_names.contains(&request.name) {
            return Err(ClientError::Api {
                status: 502,
                code: "CF-ServiceBrokerBadResponse".to_string(),
                description: format!("broker rejected {}", request.name),
            });
        }
        inner.next_guid += 1;
        let asynchronous = inner.asynchronous;
        let state = if asynchronous {
            OperationState::InProgress
        } else {
            OperationState::Succeeded
        };
        let resource = with_operation(
            RemoteResource {
                guid: format!("guid-{}", inner.next_guid),
                name: request.name.clone(),
                space_guid: request.space_guid.clone(),
                service_plan_guid: request.service_plan_guid.clone(),
                tags: request.tags.clone(),
                last_operation: None,
            },
            OperationType::Create,
            state,
        );
        inner.creates.push(request.name.clone());
        inner
            .instances
            .insert(resource.guid.clone(), resource.clone());
        Ok(Submitted {
            resource,
            asynchronous,
        })
    }

    async fn read(&self, guid: &str) -> ClientResult<RemoteResource> {
        self.instance(guid).ok_or_else(|| not_found(guid))
    }

    async fn update(&self, request: &UpdateRequest) -> ClientResult<Submitted> {
        let mut inner = self.inner.lock().unwrap();
        inner.updates.push(request.clone());
        let resource = inner
            .instances
            .get_mut(&request.guid)
            .ok_or_else(|| not_found(&request.guid))?;
        resource.name = request.name.clone();
        resource.service_plan_guid = request.service_plan_guid.clone();
        resource.tags = request.tags.clone();
        Ok(Submitted {
            resource: settled(resource.clone(), OperationType::Update),
            asynchronous: false,
        })
    }

    async fn delete(&self, guid: &str, _options: DeleteOptions) -> ClientResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.deletes.push(guid.to_string());
        match inner.instances.remove(guid) {
            Some(_) => Ok(false),
            None => Err(not_found(guid)),
        }
    }

    async fn operation_status(&self, guid: &str) -> ClientResult<RemoteResource> {
        let mut inner = self.inner.lock().unwrap();
        let stalled = inner.stalled;
        let resource = inner
            .instances
            .get_mut(guid)
            .ok_or_else(|| not_found(guid))?;
        if let Some(op) = resource.last_operation.as_mut() {
            if op.state == OperationState::InProgress && !stalled {
                op.state = OperationState::Succeeded;
            }
        }
        Ok(resource.clone())
    }
}

#[async_trait]
impl PrivateDomainClient for FakeCloud {
    async fn share_private_domain(&self, domain_guid: &str, org_guid: &str) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let domains = inner.shared.entry(org_guid.to_string()).or_default();
        if !domains.iter().any(|d| d == domain_guid) {
            domains.push(domain_guid.to_string());
        }
        Ok(())
    }

    async fn private_domains(&self, org_guid: &str) -> ClientResult<Vec<String>> {
        Ok(self.shared_domains(org_guid))
    }

    async fn unshare_private_domain(
        &self,
        org_guid: &str,
        domain_guid: &str,
    ) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(domains) = inner.shared.get_mut(org_guid) {
            domains.retain(|d| d != domain_guid);
        }
        Ok(())
    }
}

pub fn agent(cloud: &Arc<FakeCloud>) -> Agent<FakeCloud> {
    agent_with(cloud, PollTimeouts::default())
}

pub fn agent_with(cloud: &Arc<FakeCloud>, timeouts: PollTimeouts) -> Agent<FakeCloud> {
    Agent::new(Arc::clone(cloud), timeouts, false)
}

pub fn manifest(json: &str) -> Manifest {
    Manifest::from_json(json).unwrap()
}

pub async fn open_state(path: &Path) -> StateStore {
    StateStore::open(path).await.unwrap()
}
