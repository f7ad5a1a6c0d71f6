//! JSON-over-HTTP generation backend
//!
//! Wire protocol:
//! - `POST {endpoint}/generate` answers `{"text"}`, `{"uri", "mime_type"}` or
//!   `{"operation"}`
//! - `GET {endpoint}/operations/{name}` answers
//!   `{"done", "uri"?, "mime_type"?, "text"?, "error"?: {"code", "message"}}`
//! - `POST {endpoint}/operations/{name}:cancel`

use crate::backend::{
    Artifact, BackendRequest, BackendShape, DispatchOutcome, GenerationBackend, OperationHandle,
    OperationStatus,
};
use crate::error::BackendError;
use crate::types::ResourceType;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Settings for one HTTP backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Base URL, e.g. `https://gen.example.com/v1`
    pub endpoint: String,

    /// Overrides the resource's default shape
    #[serde(default)]
    pub shape: Option<BackendShape>,

    /// Model name forwarded in every request
    #[serde(default)]
    pub model: Option<String>,

    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl HttpBackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            shape: None,
            model: None,
            api_key_env: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequestBody<'a> {
    resource: ResourceType,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    parameters: &'a BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaBody<'a>>,
}

#[derive(Serialize)]
struct MediaBody<'a> {
    url: &'a str,
    mime_type: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponseBody {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    operation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationResponseBody {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    progress: Option<f32>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<OperationErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Generation backend reached over HTTP
pub struct HttpGenerationBackend {
    client: Client,
    name: String,
    endpoint: String,
    shape: BackendShape,
    model: Option<String>,
    api_key: Option<String>,
}

impl HttpGenerationBackend {
    pub fn new(resource: ResourceType, config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BackendError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                BackendError::Permanent(format!("API key variable {} is not set", var))
            })?),
            None => None,
        };

        Ok(Self {
            client,
            name: format!("http:{}", resource),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            shape: config
                .shape
                .unwrap_or_else(|| BackendShape::for_resource(resource)),
            model: config.model,
            api_key,
        })
    }

    fn operation_url(&self, handle: &OperationHandle, suffix: &str) -> String {
        let name = handle.name.trim_start_matches("operations/");
        format!("{}/operations/{}{}", self.endpoint, name, suffix)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Classify a non-success HTTP status
pub fn classify_status(status: u16, body: &str) -> BackendError {
    let detail = format!("HTTP {}: {}", status, body.trim());
    match status {
        429 => BackendError::RateLimited(detail),
        502..=504 => BackendError::Unavailable(detail),
        400 | 422 => BackendError::InvalidInput(detail),
        _ => BackendError::Permanent(detail),
    }
}

/// Classify an error reported inside a finished operation
pub fn classify_operation_error(code: Option<&str>, message: &str) -> BackendError {
    let detail = match code {
        Some(code) => format!("{}: {}", code, message),
        None => message.to_string(),
    };
    match code {
        Some("RESOURCE_EXHAUSTED") => BackendError::RateLimited(detail),
        Some("UNAVAILABLE") => BackendError::Unavailable(detail),
        Some("INVALID_ARGUMENT") => BackendError::InvalidInput(detail),
        _ => BackendError::Permanent(detail),
    }
}

/// Errors from `POST /generate`. Only a failed connection proves the
/// request never reached the backend; a timed-out dispatch may already be
/// running remotely and must not be sent again.
fn map_dispatch_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Permanent(format!("Dispatch timed out, not resent: {}", error))
    } else {
        map_http_error(error)
    }
}

fn map_http_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Unavailable(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        BackendError::Unavailable(format!("Connection error: {}", error))
    } else if let Some(status) = error.status() {
        classify_status(status.as_u16(), &error.to_string())
    } else {
        BackendError::Permanent(format!("HTTP error: {}", error))
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(classify_status(status.as_u16(), &body))
}

fn media_artifact(uri: String, mime_type: Option<String>) -> Artifact {
    Artifact::Locator { uri, mime_type }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn shape(&self) -> BackendShape {
        self.shape
    }

    async fn dispatch(&self, request: &BackendRequest) -> Result<DispatchOutcome, BackendError> {
        let body = GenerateRequestBody {
            resource: request.resource,
            prompt: &request.prompt,
            model: self.model.as_deref(),
            parameters: &request.parameters,
            media: request.media.as_ref().map(|media| MediaBody {
                url: &media.url,
                mime_type: &media.mime_type,
            }),
        };

        let url = format!("{}/generate", self.endpoint);
        debug!(backend = %self.name, job_id = %request.job_id, url = %url, "Dispatching");
        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(map_dispatch_error)?;
        let response = check_status(response).await?;

        let parsed: GenerateResponseBody = response
            .json()
            .await
            .map_err(|e| BackendError::Permanent(format!("Failed to parse response: {}", e)))?;

        if let Some(operation) = parsed.operation {
            return Ok(DispatchOutcome::Pending(OperationHandle::new(operation)));
        }
        if let Some(uri) = parsed.uri {
            return Ok(DispatchOutcome::Immediate(media_artifact(uri, parsed.mime_type)));
        }
        if let Some(text) = parsed.text {
            return Ok(DispatchOutcome::Immediate(Artifact::Text(text)));
        }
        Err(BackendError::Permanent(
            "Response carried no text, uri or operation".to_string(),
        ))
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, BackendError> {
        let url = self.operation_url(handle, "");
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        let parsed: OperationResponseBody = response.json().await.map_err(|e| {
            BackendError::Permanent(format!("Failed to parse operation status: {}", e))
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_else(|| "operation failed".to_string());
            return Ok(OperationStatus::Failed(classify_operation_error(
                error.code.as_deref(),
                &message,
            )));
        }
        if !parsed.done {
            return Ok(OperationStatus::Running {
                progress: parsed.progress,
            });
        }
        if let Some(uri) = parsed.uri {
            return Ok(OperationStatus::Done(media_artifact(uri, parsed.mime_type)));
        }
        if let Some(text) = parsed.text {
            return Ok(OperationStatus::Done(Artifact::Text(text)));
        }
        Ok(OperationStatus::Failed(BackendError::Permanent(format!(
            "Operation {} finished without a result",
            handle
        ))))
    }

    async fn cancel_operation(&self, handle: &OperationHandle) -> Result<(), BackendError> {
        let url = self.operation_url(handle, ":cancel");
        let response = self
            .authorize(self.client.post(&url))
            .send()
            .await
            .map_err(map_http_error)?;
        check_status(response).await?;
        Ok(())
    }
}
