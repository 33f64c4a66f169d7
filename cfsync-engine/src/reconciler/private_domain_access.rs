//! Private domain access reconciler - shares a private domain with an org.
//!
//! The share has no identifier of its own; its identity is the composite of
//! the org and domain GUIDs. Sharing and unsharing are synchronous.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Accepted, ResourceReconciler};
use crate::client::{ClientError, PrivateDomainClient};
use crate::diff::{ChangePlan, DiffPolicy, FieldChange, FieldPolicy};
use crate::error::{EngineError, Result};
use crate::identity;

const DOMAIN_ACCESS_POLICY: DiffPolicy = DiffPolicy::new(&[
    ("domain", FieldPolicy::AlwaysReplace),
    ("org", FieldPolicy::AlwaysReplace),
]);

/// A private domain that should be usable by an org.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAccessSpec {
    /// Private domain GUID.
    pub domain: String,
    /// Organization GUID.
    pub org: String,
}

impl DomainAccessSpec {
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(EngineError::validation("domain", "must not be empty"));
        }
        if self.org.trim().is_empty() {
            return Err(EngineError::validation("org", "must not be empty"));
        }
        Ok(())
    }
}

/// A share confirmed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainAccessState {
    pub domain: String,
    pub org: String,
}

/// Build the durable identity of a share.
pub fn access_id(org: &str, domain: &str) -> String {
    identity::encode(&[org, domain])
}

/// Split an identity into (org, domain).
pub fn parse_access_id(id: &str) -> Result<(String, String)> {
    let parts = identity::decode(id, 2)?;
    match <[String; 2]>::try_from(parts) {
        Ok([org, domain]) => Ok((org, domain)),
        Err(parts) => Err(EngineError::MalformedIdentity {
            id: id.to_string(),
            reason: format!("expected 2 parts, found {}", parts.len()),
        }),
    }
}

/// Private domain access reconciler.
pub struct PrivateDomainAccessReconciler<C> {
    client: C,
}

impl<C: PrivateDomainClient> PrivateDomainAccessReconciler<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: PrivateDomainClient> ResourceReconciler for PrivateDomainAccessReconciler<C> {
    type Spec = DomainAccessSpec;
    type State = DomainAccessState;

    async fn submit(&self, spec: &Self::Spec) -> Result<Accepted> {
        spec.validate()?;
        info!("Sharing private domain {} with org {}", spec.domain, spec.org);
        self.client
            .share_private_domain(&spec.domain, &spec.org)
            .await?;
        Ok(Accepted {
            id: access_id(&spec.org, &spec.domain),
            settled: true,
        })
    }

    async fn settle(&self, _id: &str, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<Self::State>> {
        let (org, domain) = parse_access_id(id)?;

        let domains = match self.client.private_domains(&org).await {
            Ok(domains) => domains,
            Err(e) if e.is_not_found() => {
                debug!("Org {} no longer exists", org);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if domains.iter().any(|guid| *guid == domain) {
            Ok(Some(DomainAccessState { domain, org }))
        } else {
            debug!("Private domain {} is no longer shared with org {}", domain, org);
            Ok(None)
        }
    }

    fn plan(&self, prior: &Self::Spec, desired: &Self::Spec) -> ChangePlan {
        DOMAIN_ACCESS_POLICY.plan(&[
            FieldChange::new("domain", prior.domain != desired.domain),
            FieldChange::new("org", prior.org != desired.org),
        ])
    }

    async fn update(
        &self,
        _id: &str,
        prior: &Self::Spec,
        desired: &Self::Spec,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        match self.plan(prior, desired) {
            ChangePlan::Replace(fields) => Err(EngineError::ReplacementRequired { fields }),
            _ => Ok(()),
        }
    }

    async fn delete(&self, id: &str, _spec: &Self::Spec, _cancel: &CancellationToken) -> Result<()> {
        let (org, domain) = parse_access_id(id)?;
        info!("Unsharing private domain {} from org {}", domain, org);

        match self.client.unshare_private_domain(&org, &domain).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!("Private domain {} already unshared from org {}", domain, org);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn import(&self, id: &str) -> Result<Self::Spec> {
        match self.read(id).await? {
            Some(state) => Ok(DomainAccessSpec {
                domain: state.domain,
                org: state.org,
            }),
            None => Err(ClientError::NotFound(id.to_string()).into()),
        }
    }

    fn refresh(&self, _prior: &Self::Spec, state: Self::State) -> Self::Spec {
        DomainAccessSpec {
            domain: state.domain,
            org: state.org,
        }
    }
}
