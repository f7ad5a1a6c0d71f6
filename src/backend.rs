//! Generation Backend Abstraction
//!
//! One polymorphic capability for every content generator. A backend either
//! answers a dispatch immediately (text, image) or hands back a long-running
//! operation handle that is polled to completion (video). Vendor specifics live
//! behind the trait; the orchestrator never special-cases a model version.

use crate::error::BackendError;
use crate::types::{JobId, ResourceType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub mod http;
pub mod scripted;

pub use http::{HttpBackendConfig, HttpGenerationBackend};
pub use scripted::ScriptedBackend;

/// How a backend answers a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendShape {
    ImmediateText,
    ImmediateImage,
    LongRunningVideo,
}

impl BackendShape {
    /// Default shape for a resource type
    pub fn for_resource(resource: ResourceType) -> Self {
        match resource {
            ResourceType::Text => BackendShape::ImmediateText,
            ResourceType::Image => BackendShape::ImmediateImage,
            ResourceType::Video => BackendShape::LongRunningVideo,
        }
    }

    pub fn is_long_running(self) -> bool {
        matches!(self, BackendShape::LongRunningVideo)
    }
}

impl fmt::Display for BackendShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendShape::ImmediateText => f.write_str("immediate_text"),
            BackendShape::ImmediateImage => f.write_str("immediate_image"),
            BackendShape::LongRunningVideo => f.write_str("long_running_video"),
        }
    }
}

/// Media attached to a request as multimodal input (caption sub-step)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub url: String,
    pub mime_type: String,
    /// Inline bytes, when the primary artifact was returned inline
    pub data: Option<Vec<u8>>,
}

/// Input handed to a backend dispatch
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub job_id: JobId,
    pub resource: ResourceType,
    pub prompt: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub media: Option<MediaReference>,
}

/// Raw generation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Text(String),
    Bytes { data: Vec<u8>, mime_type: String },
    Locator { uri: String, mime_type: Option<String> },
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Text(_) => "text",
            Artifact::Bytes { .. } => "bytes",
            Artifact::Locator { .. } => "locator",
        }
    }
}

/// Handle to a remote long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub name: String,
}

impl OperationHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Result of a dispatch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Immediate(Artifact),
    Pending(OperationHandle),
}

/// Result of one poll of an operation
///
/// `Failed` means the remote operation itself finished with an error. A
/// failure of the poll call is reported as `Err` from `poll_operation`.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Running { progress: Option<f32> },
    Done(Artifact),
    Failed(BackendError),
}

/// Generation backend trait
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    fn shape(&self) -> BackendShape;

    /// Start a generation
    async fn dispatch(&self, request: &BackendRequest) -> Result<DispatchOutcome, BackendError>;

    /// Query a long-running operation
    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, BackendError>;

    /// Ask the backend to abandon an operation. Best effort.
    async fn cancel_operation(&self, _handle: &OperationHandle) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Backends keyed by the resource type they generate
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<ResourceType, Arc<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one for the resource
    pub fn register(&mut self, resource: ResourceType, backend: Arc<dyn GenerationBackend>) {
        self.backends.insert(resource, backend);
    }

    pub fn with(mut self, resource: ResourceType, backend: Arc<dyn GenerationBackend>) -> Self {
        self.register(resource, backend);
        self
    }

    pub fn get(&self, resource: ResourceType) -> Option<Arc<dyn GenerationBackend>> {
        self.backends.get(&resource).cloned()
    }

    pub fn contains(&self, resource: ResourceType) -> bool {
        self.backends.contains_key(&resource)
    }

    /// Registered resource types in `ResourceType::ALL` order
    pub fn resources(&self) -> Vec<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(|resource| self.backends.contains_key(resource))
            .collect()
    }

    /// Build HTTP backends for every configured resource
    pub fn from_config(
        configs: &BTreeMap<ResourceType, HttpBackendConfig>,
    ) -> Result<Self, BackendError> {
        let mut registry = Self::new();
        for (resource, config) in configs {
            let backend = HttpGenerationBackend::new(*resource, config.clone())?;
            registry.register(*resource, Arc::new(backend));
        }
        Ok(registry)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for resource in self.resources() {
            if let Some(backend) = self.backends.get(&resource) {
                map.entry(&resource.as_str(), &backend.name());
            }
        }
        map.finish()
    }
}
