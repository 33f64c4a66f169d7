//! Cloud Controller v2 API client.

use std::time::Duration;

use async_trait::async_trait;
use cfsync_engine::client::{CreateRequest, UpdateRequest};
use cfsync_engine::types::{DeleteOptions, Submitted};
use cfsync_engine::{
    ClientError, ClientResult, LastOperation, OperationState, OperationType, PrivateDomainClient,
    RemoteResource, RemoteResourceClient,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Client for the Cloud Controller REST API.
pub struct CloudControllerClient {
    http: Client,
    api_endpoint: String,
    token: Option<String>,
}

impl CloudControllerClient {
    pub fn new(
        api_endpoint: &str,
        token: Option<String>,
        skip_tls_verify: bool,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(skip_tls_verify)
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_endpoint, path);
        debug!("{} {}", method, url);
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and turn non-success statuses into client errors.
    async fn send(&self, builder: RequestBuilder) -> ClientResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(parse_error(status, &body))
    }

    async fn body(response: Response) -> ClientResult<String> {
        response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn submit(&self, builder: RequestBuilder) -> ClientResult<Submitted> {
        let response = self.send(builder).await?;
        let asynchronous = response.status() == StatusCode::ACCEPTED;
        let resource = parse_instance(&Self::body(response).await?)?;
        Ok(Submitted {
            resource,
            asynchronous,
        })
    }

    async fn get_instance(&self, guid: &str) -> ClientResult<RemoteResource> {
        let path = format!("/v2/service_instances/{}", guid);
        let response = self.send(self.request(Method::GET, &path)).await?;
        parse_instance(&Self::body(response).await?)
    }
}

#[derive(Serialize)]
struct CreateBody<'a> {
    name: &'a str,
    space_guid: &'a str,
    service_plan_guid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a Map<String, Value>>,
    tags: &'a [String],
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    name: &'a str,
    service_plan_guid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a Map<String, Value>>,
    tags: &'a [String],
}

#[derive(Deserialize)]
struct Envelope<T> {
    metadata: Metadata,
    entity: T,
}

#[derive(Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Deserialize)]
struct InstanceEntity {
    name: String,
    space_guid: String,
    service_plan_guid: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    last_operation: Option<LastOperationEntity>,
}

#[derive(Deserialize)]
struct LastOperationEntity {
    #[serde(rename = "type")]
    op_type: String,
    state: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct Page {
    resources: Vec<Envelope<Value>>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    description: String,
    #[serde(default)]
    error_code: String,
}

/// Decode a service instance document.
pub fn parse_instance(body: &str) -> ClientResult<RemoteResource> {
    let envelope: Envelope<InstanceEntity> =
        serde_json::from_str(body).map_err(|e| ClientError::Decode(e.to_string()))?;
    let entity = envelope.entity;

    let last_operation = match entity.last_operation {
        Some(op) => Some(LastOperation {
            op_type: op
                .op_type
                .parse::<OperationType>()
                .map_err(|e| ClientError::Decode(e.to_string()))?,
            state: op
                .state
                .parse::<OperationState>()
                .map_err(|e| ClientError::Decode(e.to_string()))?,
            description: op.description.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(RemoteResource {
        guid: envelope.metadata.guid,
        name: entity.name,
        space_guid: entity.space_guid,
        service_plan_guid: entity.service_plan_guid,
        tags: entity.tags.unwrap_or_default(),
        last_operation,
    })
}

/// Map an unsuccessful response onto a client error.
pub fn parse_error(status: StatusCode, body: &str) -> ClientError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let (description, code) = match parsed {
        Some(e) => (e.description, e.error_code),
        None => (body.trim().to_string(), String::new()),
    };

    if status == StatusCode::NOT_FOUND {
        return ClientError::NotFound(if description.is_empty() {
            status.to_string()
        } else {
            description
        });
    }
    ClientError::Api {
        status: status.as_u16(),
        code,
        description,
    }
}

#[async_trait]
impl RemoteResourceClient for CloudControllerClient {
    async fn create(&self, request: &CreateRequest) -> ClientResult<Submitted> {
        let body = CreateBody {
            name: &request.name,
            space_guid: &request.space_guid,
            service_plan_guid: &request.service_plan_guid,
            parameters: request.parameters.as_ref(),
            tags: &request.tags,
        };
        let builder = self
            .request(Method::POST, "/v2/service_instances")
            .query(&[("accepts_incomplete", "true")])
            .json(&body);
        self.submit(builder).await
    }

    async fn read(&self, guid: &str) -> ClientResult<RemoteResource> {
        self.get_instance(guid).await
    }

    async fn update(&self, request: &UpdateRequest) -> ClientResult<Submitted> {
        let body = UpdateBody {
            name: &request.name,
            service_plan_guid: &request.service_plan_guid,
            parameters: request.parameters.as_ref(),
            tags: &request.tags,
        };
        let path = format!("/v2/service_instances/{}", request.guid);
        let builder = self
            .request(Method::PUT, &path)
            .query(&[("accepts_incomplete", "true")])
            .json(&body);
        self.submit(builder).await
    }

    async fn delete(&self, guid: &str, options: DeleteOptions) -> ClientResult<bool> {
        let path = format!("/v2/service_instances/{}", guid);
        let builder = self.request(Method::DELETE, &path).query(&[
            ("accepts_incomplete", "true"),
            ("recursive", bool_param(options.recursive)),
            ("purge", bool_param(options.purge)),
        ]);
        let response = self.send(builder).await?;
        Ok(response.status() == StatusCode::ACCEPTED)
    }

    async fn operation_status(&self, guid: &str) -> ClientResult<RemoteResource> {
        self.get_instance(guid).await
    }
}

fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[async_trait]
impl PrivateDomainClient for CloudControllerClient {
    async fn share_private_domain(&self, domain_guid: &str, org_guid: &str) -> ClientResult<()> {
        let path = format!(
            "/v2/organizations/{}/private_domains/{}",
            org_guid, domain_guid
        );
        self.send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }

    async fn private_domains(&self, org_guid: &str) -> ClientResult<Vec<String>> {
        let mut guids = Vec::new();
        let mut next = Some(format!("/v2/organizations/{}/private_domains", org_guid));

        while let Some(path) = next {
            let response = self.send(self.request(Method::GET, &path)).await?;
            let page: Page = serde_json::from_str(&Self::body(response).await?)
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            guids.extend(page.resources.into_iter().map(|r| r.metadata.guid));
            next = page.next_url;
        }
        Ok(guids)
    }

    async fn unshare_private_domain(
        &self,
        org_guid: &str,
        domain_guid: &str,
    ) -> ClientResult<()> {
        let path = format!(
            "/v2/organizations/{}/private_domains/{}",
            org_guid, domain_guid
        );
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }
}
