//! REST implementation of the remote API gateway.
//!
//! Writes map onto the collection endpoints:
//!
//! | operation | request                               |
//! |-----------|---------------------------------------|
//! | create    | `POST {base}/{collection}`            |
//! | update    | `PUT {base}/{collection}/{id}`        |
//! | delete    | `DELETE {base}/{collection}/{id}`     |
//!
//! The gateway performs exactly one request per call. Retrying is the queue's
//! job, so nothing here sleeps or resends.

use std::time::Duration;

use async_trait::async_trait;
use civicsync_core::ports::{GatewayError, RemoteApiGateway};
use civicsync_domain::constants::MAX_ERROR_MESSAGE_LENGTH;
use civicsync_domain::{
    CivicSyncError, EntityRecord, EntityType, GatewayConfig, Operation, Result as DomainResult,
    SubmitResult,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::errors::InfraError;

/// [`RemoteApiGateway`] over HTTP
#[derive(Clone)]
pub struct HttpApiGateway {
    client: ReqwestClient,
    base_url: String,
}

impl HttpApiGateway {
    /// Start building a new gateway.
    pub fn builder() -> HttpApiGatewayBuilder {
        HttpApiGatewayBuilder::default()
    }

    /// Gateway configured from the `gateway` config section.
    pub fn from_config(config: &GatewayConfig) -> DomainResult<Self> {
        let mut builder = Self::builder()
            .base_url(&config.base_url)
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)));
        if let Some(token) = &config.api_token {
            builder = builder.api_token(token);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(
        &self,
        entity_type: EntityType,
        operation: Operation,
        payload: &Value,
    ) -> Result<(Method, String), GatewayError> {
        let collection = format!("{}/{}", self.base_url, entity_type.collection());
        match operation {
            Operation::Create => Ok((Method::POST, collection)),
            Operation::Update | Operation::Delete => {
                let id = payload_id(payload).ok_or_else(|| {
                    GatewayError::InvalidRequest(format!(
                        "{operation} of a {entity_type} needs a server id in the payload"
                    ))
                })?;
                let method = if operation == Operation::Update { Method::PUT } else { Method::DELETE };
                Ok((method, format!("{collection}/{id}")))
            }
        }
    }
}

#[async_trait]
impl RemoteApiGateway for HttpApiGateway {
    #[instrument(skip(self, payload))]
    async fn submit(
        &self,
        entity_type: EntityType,
        operation: Operation,
        payload: &Value,
    ) -> Result<SubmitResult, GatewayError> {
        let (method, url) = self.endpoint(entity_type, operation, payload)?;
        debug!(%method, %url, "submitting write");

        let mut request = self.client.request(method.clone(), &url);
        if operation != Operation::Delete {
            request = request.json(payload);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() || err.is_request() => {
                let mapped = CivicSyncError::from(InfraError::from(err));
                debug!(%method, %url, error = %mapped, "request did not reach the backend");
                return Ok(SubmitResult::TransientError { message: mapped.to_string() });
            }
            Err(err) => {
                return Err(GatewayError::InvalidRequest(
                    CivicSyncError::from(InfraError::from(err)).to_string(),
                ))
            }
        };

        let status = response.status();
        debug!(%method, %url, %status, "received response");
        classify_response(entity_type, operation, payload, response).await
    }
}

async fn classify_response(
    entity_type: EntityType,
    operation: Operation,
    payload: &Value,
    response: Response,
) -> Result<SubmitResult, GatewayError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    if status.is_success() {
        return match success_server_id(operation, payload, &body) {
            Some(server_id) => Ok(SubmitResult::Success { server_id }),
            None => Err(GatewayError::UnexpectedResponse {
                status: status.as_u16(),
                message: "success response without an entity id".into(),
            }),
        };
    }

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Ok(SubmitResult::ValidationError { message: error_message(status, &body) })
        }
        StatusCode::CONFLICT => match serde_json::from_str::<Value>(&body) {
            Ok(existing) if payload_id(&existing).is_some() => Ok(SubmitResult::Conflict {
                existing_entity: EntityRecord::from_server_value(entity_type, existing),
            }),
            _ => Err(GatewayError::UnexpectedResponse {
                status: status.as_u16(),
                message: "conflict response without the existing entity".into(),
            }),
        },
        StatusCode::TOO_MANY_REQUESTS => {
            Ok(SubmitResult::RateLimited { retry_after_seconds: retry_after })
        }
        StatusCode::REQUEST_TIMEOUT => {
            Ok(SubmitResult::TransientError { message: error_message(status, &body) })
        }
        status if status.is_server_error() => {
            Ok(SubmitResult::TransientError { message: error_message(status, &body) })
        }
        status => {
            warn!(%status, "unclassified backend response");
            Err(GatewayError::UnexpectedResponse {
                status: status.as_u16(),
                message: error_message(status, &body),
            })
        }
    }
}

/// Server id acknowledged by a 2xx answer
///
/// Updates and deletes already address an existing entity, so an empty body
/// confirms the id they were sent with. A create must be answered with the
/// new id.
fn success_server_id(operation: Operation, payload: &Value, body: &str) -> Option<String> {
    let from_body = serde_json::from_str::<Value>(body).ok().as_ref().and_then(payload_id);
    match operation {
        Operation::Create => from_body,
        Operation::Update | Operation::Delete => from_body.or_else(|| payload_id(payload)),
    }
}

/// Entity id from a JSON object, accepting string or numeric ids
fn payload_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Human readable message from an error body, falling back to the status line
fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
    });

    let message = from_json
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .map(|detail| format!("HTTP {}: {}", status.as_u16(), detail))
        .unwrap_or_else(|| {
            format!("HTTP {} {}", status.as_u16(), status.canonical_reason().unwrap_or("unknown status"))
        });

    message.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect()
}

/// Builder for [`HttpApiGateway`].
#[derive(Debug)]
pub struct HttpApiGatewayBuilder {
    base_url: String,
    timeout: Duration,
    user_agent: Option<String>,
    api_token: Option<String>,
}

impl Default for HttpApiGatewayBuilder {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            base_url: defaults.base_url,
            timeout: Duration::from_secs(defaults.timeout_seconds),
            user_agent: None,
            api_token: None,
        }
    }
}

impl HttpApiGatewayBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Bearer token sent with every request.
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn build(self) -> DomainResult<HttpApiGateway> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(CivicSyncError::Config("gateway base url is empty".into()));
        }

        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        let agent = self
            .user_agent
            .unwrap_or_else(|| format!("civicsync/{}", env!("CARGO_PKG_VERSION")));
        builder = builder.user_agent(agent);

        if let Some(token) = self.api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| CivicSyncError::Config("api token is not a valid header".into()))?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| {
            let infra: InfraError = err.into();
            CivicSyncError::from(infra)
        })?;

        Ok(HttpApiGateway { client, base_url })
    }
}
