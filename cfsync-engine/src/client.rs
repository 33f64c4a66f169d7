//! Capability traits the reconcilers consume.
//!
//! Implementations talk to the control plane; the engine never knows about
//! the transport. `cfsync-agent` provides an HTTP implementation, the
//! integration tests a scripted fake.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{DeleteOptions, RemoteResource, Submitted};

/// Errors returned by a control plane client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The resource (or operation) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The control plane rejected the request.
    #[error("api error {status} ({code}): {description}")]
    Api {
        status: u16,
        code: String,
        description: String,
    },

    /// The request never produced a response.
    #[error("transport: {0}")]
    Transport(String),

    /// The response body could not be interpreted.
    #[error("decode: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Payload for creating a service instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub space_guid: String,
    pub service_plan_guid: String,
    pub name: String,
    pub parameters: Option<Map<String, Value>>,
    pub tags: Vec<String>,
}

/// Payload for mutating a service instance in place.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub guid: String,
    pub name: String,
    pub service_plan_guid: String,
    pub parameters: Option<Map<String, Value>>,
    pub tags: Vec<String>,
}

/// Client for resources whose mutations run as asynchronous operations.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    /// Request creation. The returned resource carries the remote GUID.
    async fn create(&self, request: &CreateRequest) -> ClientResult<Submitted>;

    /// Fetch the current remote state.
    async fn read(&self, guid: &str) -> ClientResult<RemoteResource>;

    /// Request an in-place update.
    async fn update(&self, request: &UpdateRequest) -> ClientResult<Submitted>;

    /// Request deletion. Returns true when the deletion completes asynchronously.
    async fn delete(&self, guid: &str, options: DeleteOptions) -> ClientResult<bool>;

    /// Fetch the resource together with its last operation.
    async fn operation_status(&self, guid: &str) -> ClientResult<RemoteResource>;
}

/// Client for sharing private domains with organizations.
#[async_trait]
pub trait PrivateDomainClient: Send + Sync {
    async fn share_private_domain(&self, domain_guid: &str, org_guid: &str) -> ClientResult<()>;

    /// GUIDs of the private domains visible to an organization.
    async fn private_domains(&self, org_guid: &str) -> ClientResult<Vec<String>>;

    async fn unshare_private_domain(&self, org_guid: &str, domain_guid: &str)
    -> ClientResult<()>;
}

#[async_trait]
impl<T: RemoteResourceClient + ?Sized> RemoteResourceClient for std::sync::Arc<T> {
    async fn create(&self, request: &CreateRequest) -> ClientResult<Submitted> {
        (**self).create(request).await
    }

    async fn read(&self, guid: &str) -> ClientResult<RemoteResource> {
        (**self).read(guid).await
    }

    async fn update(&self, request: &UpdateRequest) -> ClientResult<Submitted> {
        (**self).update(request).await
    }

    async fn delete(&self, guid: &str, options: DeleteOptions) -> ClientResult<bool> {
        (**self).delete(guid, options).await
    }

    async fn operation_status(&self, guid: &str) -> ClientResult<RemoteResource> {
        (**self).operation_status(guid).await
    }
}

#[async_trait]
impl<T: PrivateDomainClient + ?Sized> PrivateDomainClient for std::sync::Arc<T> {
    async fn share_private_domain(&self, domain_guid: &str, org_guid: &str) -> ClientResult<()> {
        (**self).share_private_domain(domain_guid, org_guid).await
    }

    async fn private_domains(&self, org_guid: &str) -> ClientResult<Vec<String>> {
        (**self).private_domains(org_guid).await
    }

    async fn unshare_private_domain(
        &self,
        org_guid: &str,
        domain_guid: &str,
    ) -> ClientResult<()> {
        (**self).unshare_private_domain(org_guid, domain_guid).await
    }
}
