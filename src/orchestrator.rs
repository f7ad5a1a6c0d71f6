//! Generation Job Orchestrator
//!
//! Admits a request against the quota ledger, drives the backend call to a
//! terminal state, and resolves the reservation exactly once:
//!
//! - terminal backend failure or deadline expiry: refund, then report
//! - success: commit, publish, caption, record the post
//!
//! Once the generation succeeded the credit is kept, even if publishing or
//! recording fails afterwards. Each job runs in its own task, so a caller that
//! stops waiting does not stop the refund.

pub mod caption;
pub mod driver;
pub mod job;
pub mod retry;

pub use job::{GenerationJob, JobState};
pub use retry::{PollingPolicy, RetryPolicy};

use crate::backend::{Artifact, BackendRegistry, BackendRequest, MediaReference};
use crate::error::{BackendError, CreditState, GenerateError};
use crate::ledger::{QuotaLedger, Reservation};
use crate::posts::{PostRecord, PostRecordStore, PostSource, PostStatus};
use crate::publisher::{ArtifactPublisher, PublishContext, PublishedMedia};
use crate::types::{AccountId, JobId, MediaType, PostId, ResourceType};
use chrono::Utc;
use driver::{DriveFailure, Driver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Whether manual uploads consume a media credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualPostPolicy {
    #[default]
    Charge,
    Free,
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub polling: PollingPolicy,

    /// Longest accepted prompt, in characters
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Budget for the whole caption sub-step
    #[serde(default = "default_caption_timeout_ms")]
    pub caption_timeout_ms: u64,

    #[serde(default)]
    pub manual_post_policy: ManualPostPolicy,

    /// Platforms used when a request names none
    #[serde(default)]
    pub default_platforms: Vec<String>,
}

fn default_max_prompt_chars() -> usize {
    2_000
}

fn default_caption_timeout_ms() -> u64 {
    120_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            polling: PollingPolicy::default(),
            max_prompt_chars: default_max_prompt_chars(),
            caption_timeout_ms: default_caption_timeout_ms(),
            manual_post_policy: ManualPostPolicy::default(),
            default_platforms: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn caption_timeout(&self) -> Duration {
        Duration::from_millis(self.caption_timeout_ms)
    }

    /// Longest a job can hold its reservation, given the per-dispatch timeout
    pub fn worst_case_job_duration(&self, dispatch_timeout: Duration) -> Duration {
        self.retry.worst_case_backoff()
            + dispatch_timeout * self.retry.max_attempts.max(1)
            + self.polling.deadline()
            + self.polling.interval()
            + self.caption_timeout()
    }
}

/// What to generate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Theme or prompt text
    pub prompt: String,

    /// Generate a caption for media results
    #[serde(default = "default_caption")]
    pub caption: bool,

    #[serde(default)]
    pub platforms: Vec<String>,

    /// Backend-specific options, forwarded untouched
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

fn default_caption() -> bool {
    true
}

impl JobSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            caption: true,
            platforms: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn without_caption(mut self) -> Self {
        self.caption = false;
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// A generation request at the caller boundary
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub account_id: AccountId,
    pub resource: ResourceType,
    pub spec: JobSpec,
}

impl GenerateRequest {
    pub fn new(account_id: AccountId, resource: ResourceType, spec: JobSpec) -> Self {
        Self {
            account_id,
            resource,
            spec,
        }
    }
}

/// Successful outcome reported to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub job_id: JobId,
    pub account_id: AccountId,
    pub resource: ResourceType,
    pub text: String,
    pub media_url: Option<String>,
    pub media_type: Option<MediaType>,
    pub mime_type: Option<String>,
    /// Set once the post record was written
    pub post_id: Option<PostId>,
    pub status: PostStatus,
    /// The caption is the placeholder because captioning failed
    pub caption_degraded: bool,
    /// Dispatches issued for the primary result
    pub attempts: u32,
}

/// A user upload queued as a post
#[derive(Debug, Clone)]
pub struct ManualPost {
    pub account_id: AccountId,
    pub text: String,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub platforms: Vec<String>,
    /// Record as posted instead of pending
    pub post_now: bool,
}

/// Quota-gated generation service
#[derive(Clone)]
pub struct Orchestrator {
    ledger: Arc<QuotaLedger>,
    backends: BackendRegistry,
    publisher: Arc<dyn ArtifactPublisher>,
    posts: Arc<dyn PostRecordStore>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<QuotaLedger>,
        backends: BackendRegistry,
        publisher: Arc<dyn ArtifactPublisher>,
        posts: Arc<dyn PostRecordStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            backends,
            publisher,
            posts,
            config: Arc::new(config),
        }
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Generate content for an account.
    ///
    /// Validation failures and insufficient credits are reported before any
    /// credit is reserved. Every error states what happened to the credit.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GeneratedContent, GenerateError> {
        self.validate(&request)?;

        let reservation = self
            .ledger
            .reserve(&request.account_id, request.resource)
            .map_err(GenerateError::from_admission)?;

        let job_id = JobId::new();
        info!(
            job_id = %job_id,
            account_id = %request.account_id,
            resource = %request.resource,
            reservation_id = %reservation.id,
            "Generation admitted"
        );

        let this = self.clone();
        Self::run_detached(job_id, async move {
            this.run_job(job_id, reservation, request).await
        })
        .await
    }

    /// Publish and record an uploaded file.
    ///
    /// Media type comes from the MIME type (`image/*` or `video/*`). Under the
    /// `charge` policy one credit of that type is reserved and refunded if the
    /// upload cannot be published or recorded.
    pub async fn submit_manual_post(&self, post: ManualPost) -> Result<GeneratedContent, GenerateError> {
        let media_type = MediaType::from_mime(&post.mime_type).ok_or_else(|| {
            GenerateError::InvalidInput {
                message: format!("Unsupported upload type: {}", post.mime_type),
                credit: CreditState::NotCharged,
            }
        })?;
        if post.data.is_empty() {
            return Err(GenerateError::InvalidInput {
                message: "Upload is empty".to_string(),
                credit: CreditState::NotCharged,
            });
        }

        let reservation = match self.config.manual_post_policy {
            ManualPostPolicy::Charge => Some(
                self.ledger
                    .reserve(&post.account_id, media_type.resource_type())
                    .map_err(GenerateError::from_admission)?,
            ),
            ManualPostPolicy::Free => None,
        };

        let job_id = JobId::new();
        let this = self.clone();
        Self::run_detached(job_id, async move {
            this.run_manual(job_id, reservation, media_type, post).await
        })
        .await
    }

    fn validate(&self, request: &GenerateRequest) -> Result<(), GenerateError> {
        let invalid = |message: String| GenerateError::InvalidInput {
            message,
            credit: CreditState::NotCharged,
        };

        let prompt = request.spec.prompt.trim();
        if prompt.is_empty() {
            return Err(invalid("Prompt is empty".to_string()));
        }
        let chars = prompt.chars().count();
        if chars > self.config.max_prompt_chars {
            return Err(invalid(format!(
                "Prompt has {} characters, limit is {}",
                chars, self.config.max_prompt_chars
            )));
        }
        if !self.backends.contains(request.resource) {
            return Err(invalid(format!(
                "No backend configured for {} generation",
                request.resource
            )));
        }
        Ok(())
    }

    /// Run a job on its own task and wait for it
    async fn run_detached<F>(job_id: JobId, job: F) -> Result<GeneratedContent, GenerateError>
    where
        F: Future<Output = Result<GeneratedContent, GenerateError>> + Send + 'static,
    {
        match tokio::spawn(job).await {
            Ok(result) => result,
            Err(e) => {
                error!(job_id = %job_id, error = %e, reconcile = true, "Generation task aborted");
                Err(GenerateError::BackendFailed {
                    job_id,
                    message: format!("Generation task aborted: {}", e),
                    attempts: 0,
                    exhausted_transient: false,
                    credit: CreditState::RefundPending,
                })
            }
        }
    }

    async fn run_job(
        &self,
        job_id: JobId,
        reservation: Reservation,
        request: GenerateRequest,
    ) -> Result<GeneratedContent, GenerateError> {
        let resource = request.resource;
        let backend = match self.backends.get(resource) {
            Some(backend) => backend,
            None => {
                let credit = self.refund(&reservation, job_id);
                return Err(GenerateError::InvalidInput {
                    message: format!("No backend configured for {} generation", resource),
                    credit,
                });
            }
        };

        let prompt = request.spec.prompt.trim().to_string();
        let backend_request = BackendRequest {
            job_id,
            resource,
            prompt: match resource {
                ResourceType::Text => caption::caption_prompt(&prompt),
                _ => prompt.clone(),
            },
            parameters: request.spec.parameters.clone(),
            media: None,
        };

        let mut job = GenerationJob::new(job_id, resource);
        let driver = Driver::new(backend.as_ref(), &self.config.retry, &self.config.polling);
        let outcome = driver
            .drive(&mut job, &backend_request)
            .await
            .and_then(|artifact| check_artifact(resource, artifact, job.attempts));

        let artifact = match outcome {
            Ok(artifact) => artifact,
            Err(failure) => {
                let credit = self.refund(&reservation, job_id);
                let err = failure_to_error(job_id, failure, credit);
                warn!(
                    job_id = %job_id,
                    account_id = %request.account_id,
                    kind = ?err.kind(),
                    credit = %credit,
                    error = %err,
                    "Generation failed"
                );
                return Err(err);
            }
        };

        // Paid from here on
        if let Err(e) = self.ledger.commit(&reservation) {
            error!(
                job_id = %job_id,
                reservation_id = %reservation.id,
                error = %e,
                reconcile = true,
                "Commit failed after successful generation"
            );
        }

        let platforms = if request.spec.platforms.is_empty() {
            self.config.default_platforms.clone()
        } else {
            request.spec.platforms.clone()
        };

        let mut content = GeneratedContent {
            job_id,
            account_id: request.account_id.clone(),
            resource,
            text: String::new(),
            media_url: None,
            media_type: None,
            mime_type: None,
            post_id: None,
            status: PostStatus::Pending,
            caption_degraded: false,
            attempts: job.attempts,
        };

        match (resource.media_type(), artifact) {
            (None, Artifact::Text(text)) => content.text = text,
            (Some(media_type), artifact) => {
                let context = PublishContext {
                    account_id: request.account_id.clone(),
                    job_id: Some(job_id),
                    media_type,
                };
                let published = match self.publisher.publish(&artifact, &context).await {
                    Ok(published) => published,
                    Err(e) => {
                        error!(
                            job_id = %job_id,
                            account_id = %request.account_id,
                            error = %e,
                            reconcile = true,
                            "Publishing failed after successful generation"
                        );
                        return Err(GenerateError::PublishFailed {
                            job_id,
                            message: e.to_string(),
                            credit: CreditState::Charged,
                        });
                    }
                };

                if request.spec.caption {
                    let inline = match &artifact {
                        Artifact::Bytes { data, .. } => Some(data.clone()),
                        _ => None,
                    };
                    let (text, degraded) = self.caption(job_id, &prompt, &published, inline).await;
                    content.text = text;
                    content.caption_degraded = degraded;
                }
                content.media_url = Some(published.url);
                content.media_type = Some(media_type);
                content.mime_type = Some(published.mime_type);
            }
            // check_artifact rejected every other combination
            (None, _) => {}
        }

        let record = PostRecord {
            account_id: request.account_id.clone(),
            text: content.text.clone(),
            media_url: content.media_url.clone(),
            media_type: content.media_type,
            platforms,
            status: PostStatus::Pending,
            source: PostSource::Generated,
            job_id: Some(job_id),
            prompt: Some(prompt),
            created_at: Utc::now(),
        };
        self.record(content, record, CreditState::Charged)
    }

    async fn run_manual(
        &self,
        job_id: JobId,
        reservation: Option<Reservation>,
        media_type: MediaType,
        post: ManualPost,
    ) -> Result<GeneratedContent, GenerateError> {
        let refund = |this: &Self| match &reservation {
            Some(reservation) => this.refund(reservation, job_id),
            None => CreditState::NotCharged,
        };

        let context = PublishContext {
            account_id: post.account_id.clone(),
            job_id: None,
            media_type,
        };
        let artifact = Artifact::Bytes {
            data: post.data,
            mime_type: post.mime_type.clone(),
        };
        let published = match self.publisher.publish(&artifact, &context).await {
            Ok(published) => published,
            Err(e) => {
                let credit = refund(self);
                warn!(job_id = %job_id, account_id = %post.account_id, error = %e, credit = %credit, "Manual upload failed");
                return Err(GenerateError::PublishFailed {
                    job_id,
                    message: e.to_string(),
                    credit,
                });
            }
        };

        let status = if post.post_now {
            PostStatus::Posted
        } else {
            PostStatus::Pending
        };
        let record = PostRecord {
            account_id: post.account_id.clone(),
            text: post.text.clone(),
            media_url: Some(published.url.clone()),
            media_type: Some(media_type),
            platforms: post.platforms,
            status,
            source: PostSource::Manual,
            job_id: None,
            prompt: None,
            created_at: Utc::now(),
        };
        let content = GeneratedContent {
            job_id,
            account_id: post.account_id,
            resource: media_type.resource_type(),
            text: post.text,
            media_url: Some(published.url),
            media_type: Some(media_type),
            mime_type: Some(published.mime_type),
            post_id: None,
            status,
            caption_degraded: false,
            attempts: 0,
        };

        match self.posts.create(record) {
            Ok(post_id) => {
                if let Some(reservation) = &reservation {
                    if let Err(e) = self.ledger.commit(reservation) {
                        error!(job_id = %job_id, error = %e, reconcile = true, "Commit failed for manual post");
                    }
                }
                info!(job_id = %job_id, post_id = %post_id, status = %status, "Manual post recorded");
                Ok(GeneratedContent {
                    post_id: Some(post_id),
                    ..content
                })
            }
            Err(e) => {
                let credit = refund(self);
                error!(job_id = %job_id, error = %e, credit = %credit, "Recording manual post failed");
                Err(GenerateError::RecordingFailed {
                    job_id,
                    message: e.to_string(),
                    content: Box::new(content),
                    credit,
                })
            }
        }
    }

    fn record(
        &self,
        content: GeneratedContent,
        record: PostRecord,
        credit: CreditState,
    ) -> Result<GeneratedContent, GenerateError> {
        match self.posts.create(record) {
            Ok(post_id) => {
                info!(
                    job_id = %content.job_id,
                    account_id = %content.account_id,
                    resource = %content.resource,
                    post_id = %post_id,
                    attempts = content.attempts,
                    caption_degraded = content.caption_degraded,
                    "Generation succeeded"
                );
                Ok(GeneratedContent {
                    post_id: Some(post_id),
                    ..content
                })
            }
            Err(e) => {
                error!(
                    job_id = %content.job_id,
                    account_id = %content.account_id,
                    error = %e,
                    reconcile = true,
                    "Recording post failed after successful generation"
                );
                Err(GenerateError::RecordingFailed {
                    job_id: content.job_id,
                    message: e.to_string(),
                    content: Box::new(content),
                    credit,
                })
            }
        }
    }

    /// Caption sub-step. Shares the primary reservation; failures degrade to
    /// the placeholder caption.
    async fn caption(
        &self,
        job_id: JobId,
        theme: &str,
        published: &PublishedMedia,
        inline: Option<Vec<u8>>,
    ) -> (String, bool) {
        let Some(backend) = self.backends.get(ResourceType::Text) else {
            warn!(job_id = %job_id, "No text backend for captions, using placeholder");
            return (caption::placeholder_caption(theme), true);
        };

        let request = BackendRequest {
            job_id,
            resource: ResourceType::Text,
            prompt: caption::caption_prompt(theme),
            parameters: BTreeMap::new(),
            media: Some(MediaReference {
                url: published.url.clone(),
                mime_type: published.mime_type.clone(),
                data: inline,
            }),
        };
        let mut job = GenerationJob::new(job_id, ResourceType::Text);
        let driver = Driver::new(backend.as_ref(), &self.config.retry, &self.config.polling);

        let outcome = tokio::time::timeout(
            self.config.caption_timeout(),
            driver.drive(&mut job, &request),
        )
        .await;
        match outcome {
            Ok(Ok(Artifact::Text(text))) if !text.trim().is_empty() => {
                debug!(job_id = %job_id, attempts = job.attempts, "Caption generated");
                (text.trim().to_string(), false)
            }
            Ok(Ok(other)) => {
                warn!(job_id = %job_id, artifact = other.kind(), "Caption backend returned no text, using placeholder");
                (caption::placeholder_caption(theme), true)
            }
            Ok(Err(failure)) => {
                warn!(job_id = %job_id, failure = ?failure, "Caption failed, using placeholder");
                (caption::placeholder_caption(theme), true)
            }
            Err(_) => {
                warn!(job_id = %job_id, "Caption timed out, using placeholder");
                (caption::placeholder_caption(theme), true)
            }
        }
    }

    fn refund(&self, reservation: &Reservation, job_id: JobId) -> CreditState {
        match self.ledger.refund(reservation) {
            Ok(()) if reservation.metered => CreditState::Refunded,
            Ok(()) => CreditState::NotCharged,
            Err(e) => {
                error!(
                    job_id = %job_id,
                    reservation_id = %reservation.id,
                    error = %e,
                    reconcile = true,
                    "Refund failed"
                );
                CreditState::RefundPending
            }
        }
    }
}

/// Reject results whose shape does not match the resource
fn check_artifact(
    resource: ResourceType,
    artifact: Artifact,
    attempts: u32,
) -> Result<Artifact, DriveFailure> {
    let matches = match (&artifact, resource) {
        (Artifact::Text(text), ResourceType::Text) => !text.trim().is_empty(),
        (Artifact::Text(_), _) => false,
        (_, ResourceType::Text) => false,
        _ => true,
    };
    if matches {
        Ok(artifact)
    } else {
        Err(DriveFailure::Backend {
            error: BackendError::Permanent(format!(
                "Backend returned {} for a {} job",
                artifact.kind(),
                resource
            )),
            attempts,
            exhausted_transient: false,
        })
    }
}

fn failure_to_error(job_id: JobId, failure: DriveFailure, credit: CreditState) -> GenerateError {
    match failure {
        DriveFailure::Backend {
            error: BackendError::InvalidInput(message),
            ..
        } => GenerateError::InvalidInput { message, credit },
        DriveFailure::Backend {
            error,
            attempts,
            exhausted_transient,
        } => GenerateError::BackendFailed {
            job_id,
            message: error.to_string(),
            attempts,
            exhausted_transient,
            credit,
        },
        DriveFailure::TimedOut { operation, elapsed } => GenerateError::BackendTimedOut {
            job_id,
            operation: operation.name,
            elapsed,
            credit,
        },
    }
}
