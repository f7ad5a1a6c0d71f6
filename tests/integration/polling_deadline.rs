//! Long-running video operations: polling, deadlines, cancellation

use super::test_utils::{fast_config, TestEnv};
use mediamgr::backend::{
    Artifact, BackendRegistry, BackendShape, DispatchOutcome, OperationHandle, OperationStatus,
    ScriptedBackend,
};
use mediamgr::error::{BackendError, CreditState, ErrorKind, GenerateError};
use mediamgr::orchestrator::{GenerateRequest, JobSpec, OrchestratorConfig};
use mediamgr::types::{AccountId, MediaType, ResourceType, Role};
use std::sync::Arc;
use std::time::Duration;

fn video_backend() -> ScriptedBackend {
    ScriptedBackend::new("video", BackendShape::LongRunningVideo)
        .then_dispatch(Ok(DispatchOutcome::Pending(OperationHandle::new(
            "operations/video-1",
        ))))
}

fn video_done() -> OperationStatus {
    OperationStatus::Done(Artifact::Locator {
        uri: "gs://media-bucket/videos/clip.mp4".to_string(),
        mime_type: Some("video/mp4".to_string()),
    })
}

fn registry(video: Arc<ScriptedBackend>) -> BackendRegistry {
    BackendRegistry::new()
        .with(ResourceType::Video, video)
        .with(ResourceType::Text, Arc::new(ScriptedBackend::text("Action! #film")))
}

fn video_request(account_id: &AccountId) -> GenerateRequest {
    GenerateRequest::new(account_id.clone(), ResourceType::Video, JobSpec::new("a timelapse"))
}

#[tokio::test(start_paused = true)]
async fn test_video_completes_after_polling() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 0, 2);
    let video = Arc::new(
        video_backend()
            .then_poll(Ok(OperationStatus::Running { progress: Some(0.2) }))
            .then_poll(Ok(OperationStatus::Running { progress: Some(0.8) }))
            .then_poll(Ok(video_done())),
    );
    let orchestrator = env.orchestrator(registry(video.clone()), OrchestratorConfig::default());

    let started = tokio::time::Instant::now();
    let content = orchestrator.generate(video_request(&account_id)).await.unwrap();

    assert_eq!(video.dispatch_calls(), 1);
    assert_eq!(video.poll_calls(), 3);
    // Three 10s poll intervals
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(content.media_type, Some(MediaType::Video));
    assert_eq!(
        content.media_url.as_deref(),
        Some("https://storage.googleapis.com/media-bucket/videos/clip.mp4")
    );
    assert_eq!(content.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(content.text, "Action! #film");
    assert_eq!(env.balance(&account_id, ResourceType::Video), 1);
    assert_eq!(env.posts.len(), 1);
    env.assert_no_outstanding();
}

#[tokio::test(start_paused = true)]
async fn test_never_completing_operation_times_out() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 0, 1);
    let video = Arc::new(video_backend());
    let orchestrator = env.orchestrator(registry(video.clone()), OrchestratorConfig::default());

    let started = tokio::time::Instant::now();
    let err = orchestrator.generate(video_request(&account_id)).await.unwrap_err();
    let elapsed = started.elapsed();

    match &err {
        GenerateError::BackendTimedOut {
            operation, credit, ..
        } => {
            assert_eq!(operation, "operations/video-1");
            assert_eq!(*credit, CreditState::Refunded);
        }
        other => panic!("expected BackendTimedOut, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert!(elapsed >= Duration::from_secs(300));
    assert!(elapsed < Duration::from_secs(320));
    assert_eq!(video.dispatch_calls(), 1);
    assert_eq!(video.cancel_calls(), 1);
    assert_eq!(env.balance(&account_id, ResourceType::Video), 1);
    assert!(env.posts.is_empty());
    env.assert_no_outstanding();
}

#[tokio::test(start_paused = true)]
async fn test_failed_cancel_still_refunds() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 0, 1);
    let video = Arc::new(
        video_backend().with_cancel_result(Err(BackendError::Unavailable("503".to_string()))),
    );
    let orchestrator = env.orchestrator(registry(video.clone()), fast_config());

    let err = orchestrator.generate(video_request(&account_id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendTimedOut);
    assert_eq!(err.credit_state(), CreditState::Refunded);
    assert_eq!(env.balance(&account_id, ResourceType::Video), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_errors_do_not_consume_dispatch_budget() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 0, 1);
    let mut backend = video_backend();
    for _ in 0..5 {
        backend = backend.then_poll(Err(BackendError::Unavailable("502".to_string())));
    }
    let video = Arc::new(backend.then_poll(Ok(video_done())));
    let orchestrator = env.orchestrator(registry(video.clone()), fast_config());

    let content = orchestrator.generate(video_request(&account_id)).await.unwrap();

    assert_eq!(content.attempts, 1);
    assert_eq!(video.dispatch_calls(), 1);
    assert_eq!(video.poll_calls(), 6);
    assert_eq!(env.balance(&account_id, ResourceType::Video), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_operation_is_not_redispatched() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 0, 1);
    let video = Arc::new(
        video_backend()
            .then_poll(Ok(OperationStatus::Running { progress: None }))
            .then_poll(Ok(OperationStatus::Failed(BackendError::Permanent(
                "content policy violation".to_string(),
            )))),
    );
    let orchestrator = env.orchestrator(registry(video.clone()), fast_config());

    let err = orchestrator.generate(video_request(&account_id)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendFailed);
    assert_eq!(err.credit_state(), CreditState::Refunded);
    assert_eq!(video.dispatch_calls(), 1);
    assert_eq!(video.cancel_calls(), 0);
    assert_eq!(env.balance(&account_id, ResourceType::Video), 1);
    assert!(env.posts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_poll_bounded_by_deadline() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 0, 1);
    let video = Arc::new(
        video_backend()
            .with_poll_delay(Duration::from_secs(3_600))
            .then_poll(Ok(video_done())),
    );
    let orchestrator = env.orchestrator(registry(video.clone()), fast_config());

    let started = tokio::time::Instant::now();
    let err = orchestrator.generate(video_request(&account_id)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendTimedOut);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(env.balance(&account_id, ResourceType::Video), 1);
    env.assert_no_outstanding();
}

#[tokio::test(start_paused = true)]
async fn test_video_insufficient_credits() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 10, 10, 0);
    let video = Arc::new(video_backend());
    let orchestrator = env.orchestrator(registry(video.clone()), fast_config());

    let err = orchestrator.generate(video_request(&account_id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientCredits);
    assert_eq!(video.dispatch_calls(), 0);
}
