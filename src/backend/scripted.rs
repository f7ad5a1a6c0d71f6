//! Scripted in-process backend
//!
//! Replays queued dispatch and poll responses in order. Used by tests, the
//! benchmark and `mediamgr generate --dry-run`.

use crate::backend::{
    Artifact, BackendRequest, BackendShape, DispatchOutcome, GenerationBackend, OperationHandle,
    OperationStatus,
};
use crate::error::BackendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Backend that answers from a script
pub struct ScriptedBackend {
    name: String,
    shape: BackendShape,
    dispatches: Mutex<VecDeque<Result<DispatchOutcome, BackendError>>>,
    polls: Mutex<VecDeque<Result<OperationStatus, BackendError>>>,
    /// Answer once the dispatch script runs dry
    repeat_dispatch: Option<DispatchOutcome>,
    dispatch_delay: Duration,
    poll_delay: Duration,
    cancel_result: Result<(), BackendError>,
    requests: Mutex<Vec<BackendRequest>>,
    dispatch_calls: AtomicU32,
    poll_calls: AtomicU32,
    cancel_calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>, shape: BackendShape) -> Self {
        Self {
            name: name.into(),
            shape,
            dispatches: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            repeat_dispatch: None,
            dispatch_delay: Duration::ZERO,
            poll_delay: Duration::ZERO,
            cancel_result: Ok(()),
            requests: Mutex::new(Vec::new()),
            dispatch_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
        }
    }

    /// Text backend that always answers with `text`
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("scripted-text", BackendShape::ImmediateText)
            .repeat(DispatchOutcome::Immediate(Artifact::Text(text.into())))
    }

    /// Image backend that always answers with the given inline bytes
    pub fn image(data: Vec<u8>, mime_type: &str) -> Self {
        Self::new("scripted-image", BackendShape::ImmediateImage).repeat(DispatchOutcome::Immediate(
            Artifact::Bytes {
                data,
                mime_type: mime_type.to_string(),
            },
        ))
    }

    /// Queue the next dispatch response
    pub fn then_dispatch(self, response: Result<DispatchOutcome, BackendError>) -> Self {
        self.dispatches.lock().push_back(response);
        self
    }

    /// Queue the next poll response. With an empty poll script the operation
    /// keeps running forever.
    pub fn then_poll(self, response: Result<OperationStatus, BackendError>) -> Self {
        self.polls.lock().push_back(response);
        self
    }

    pub fn repeat(mut self, outcome: DispatchOutcome) -> Self {
        self.repeat_dispatch = Some(outcome);
        self
    }

    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn with_cancel_result(mut self, result: Result<(), BackendError>) -> Self {
        self.cancel_result = result;
        self
    }

    pub fn dispatch_calls(&self) -> u32 {
        self.dispatch_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in dispatch order
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn shape(&self) -> BackendShape {
        self.shape
    }

    async fn dispatch(&self, request: &BackendRequest) -> Result<DispatchOutcome, BackendError> {
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if !self.dispatch_delay.is_zero() {
            tokio::time::sleep(self.dispatch_delay).await;
        }

        let next = self.dispatches.lock().pop_front();
        match (next, &self.repeat_dispatch) {
            (Some(response), _) => response,
            (None, Some(outcome)) => Ok(outcome.clone()),
            (None, None) => Err(BackendError::Permanent(format!(
                "{}: no scripted dispatch response left",
                self.name
            ))),
        }
    }

    async fn poll_operation(&self, _handle: &OperationHandle) -> Result<OperationStatus, BackendError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }

        let next = self.polls.lock().pop_front();
        next.unwrap_or(Ok(OperationStatus::Running { progress: None }))
    }

    async fn cancel_operation(&self, _handle: &OperationHandle) -> Result<(), BackendError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_result.clone()
    }
}
