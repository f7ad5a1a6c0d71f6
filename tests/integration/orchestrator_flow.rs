//! End-to-end generation flows: admission, retry, refund, post-success failures

use super::test_utils::{fast_config, FailingPostStore, FailingPublisher, TestEnv};
use mediamgr::backend::{
    Artifact, BackendRegistry, BackendShape, DispatchOutcome, ScriptedBackend,
};
use mediamgr::error::{BackendError, CreditState, ErrorKind, GenerateError};
use mediamgr::orchestrator::{caption, GenerateRequest, JobSpec, ManualPost, OrchestratorConfig};
use mediamgr::posts::{PostRecordStore, PostSource, PostStatus};
use mediamgr::types::{MediaType, ResourceType, Role};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn png_backend() -> ScriptedBackend {
    ScriptedBackend::image(b"\x89PNG\r\n\x1a\nfox".to_vec(), "image/png")
}

fn registry(image: Arc<ScriptedBackend>, text: Arc<ScriptedBackend>) -> BackendRegistry {
    BackendRegistry::new()
        .with(ResourceType::Image, image)
        .with(ResourceType::Text, text)
}

fn image_request(account_id: &mediamgr::types::AccountId) -> GenerateRequest {
    GenerateRequest::new(account_id.clone(), ResourceType::Image, JobSpec::new("a red fox"))
}

#[tokio::test]
async fn test_permanent_error_refunds_exactly_once() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 3, 0);
    let image = Arc::new(
        ScriptedBackend::new("image", BackendShape::ImmediateImage)
            .then_dispatch(Err(BackendError::Permanent("model exploded".to_string()))),
    );
    let orchestrator = env.orchestrator(
        registry(image.clone(), Arc::new(ScriptedBackend::text("unused"))),
        fast_config(),
    );

    let err = orchestrator.generate(image_request(&account_id)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendFailed);
    assert_eq!(err.credit_state(), CreditState::Refunded);
    assert!(!err.is_retryable());
    assert_eq!(image.dispatch_calls(), 1);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 3);
    assert!(env.posts.is_empty());
    env.assert_no_outstanding();
}

#[tokio::test(start_paused = true)]
async fn test_two_rate_limits_then_success() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 2, 0);
    let image = Arc::new(
        png_backend()
            .then_dispatch(Err(BackendError::RateLimited("429".to_string())))
            .then_dispatch(Err(BackendError::RateLimited("429".to_string()))),
    );
    let text = Arc::new(ScriptedBackend::text("Sly and swift #fox #wildlife"));
    let orchestrator = env.orchestrator(registry(image.clone(), text), OrchestratorConfig::default());

    let content = orchestrator.generate(image_request(&account_id)).await.unwrap();

    assert_eq!(content.attempts, 3);
    assert_eq!(image.dispatch_calls(), 3);
    assert_eq!(content.media_type, Some(MediaType::Image));
    assert!(content.media_url.as_deref().unwrap().starts_with("http://cdn.test/media/"));
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
    assert_eq!(env.posts.len(), 1);
    env.assert_no_outstanding();
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_transient_failures_are_retryable() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 1, 0);
    let image = Arc::new(
        ScriptedBackend::new("image", BackendShape::ImmediateImage)
            .then_dispatch(Err(BackendError::Unavailable("503".to_string())))
            .then_dispatch(Err(BackendError::Unavailable("503".to_string())))
            .then_dispatch(Err(BackendError::RateLimited("429".to_string()))),
    );
    let orchestrator = env.orchestrator(
        registry(image.clone(), Arc::new(ScriptedBackend::text("unused"))),
        OrchestratorConfig::default(),
    );

    let err = orchestrator.generate(image_request(&account_id)).await.unwrap_err();

    match &err {
        GenerateError::BackendFailed {
            attempts,
            exhausted_transient,
            ..
        } => {
            assert_eq!(*attempts, 3);
            assert!(*exhausted_transient);
        }
        other => panic!("expected BackendFailed, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert_eq!(image.dispatch_calls(), 3);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
    env.assert_no_outstanding();
}

#[tokio::test]
async fn test_admin_generates_without_credits() {
    let env = TestEnv::new();
    let account_id = env.account("root", Role::Admin, 0, 0, 0);
    let orchestrator = env.orchestrator(
        registry(Arc::new(png_backend()), Arc::new(ScriptedBackend::text("Admin post #ops"))),
        fast_config(),
    );

    let content = orchestrator.generate(image_request(&account_id)).await.unwrap();

    assert_eq!(content.text, "Admin post #ops");
    assert_eq!(env.balance(&account_id, ResourceType::Image), 0);
    env.assert_no_outstanding();
}

#[tokio::test]
async fn test_admin_failure_reports_not_charged() {
    let env = TestEnv::new();
    let account_id = env.account("root", Role::Admin, 0, 0, 0);
    let image = Arc::new(
        ScriptedBackend::new("image", BackendShape::ImmediateImage)
            .then_dispatch(Err(BackendError::Permanent("boom".to_string()))),
    );
    let orchestrator = env.orchestrator(
        registry(image, Arc::new(ScriptedBackend::text("unused"))),
        fast_config(),
    );

    let err = orchestrator.generate(image_request(&account_id)).await.unwrap_err();
    assert_eq!(err.credit_state(), CreditState::NotCharged);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 0);
}

#[tokio::test]
async fn test_insufficient_credits_never_dispatches() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 5, 0, 0);
    let image = Arc::new(png_backend());
    let orchestrator = env.orchestrator(
        registry(image.clone(), Arc::new(ScriptedBackend::text("unused"))),
        fast_config(),
    );

    let err = orchestrator.generate(image_request(&account_id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientCredits);
    assert_eq!(err.credit_state(), CreditState::NotCharged);
    assert_eq!(image.dispatch_calls(), 0);
}

#[tokio::test]
async fn test_caption_failure_uses_placeholder_and_keeps_credit() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 5, 2, 0);
    let text = Arc::new(
        ScriptedBackend::new("text", BackendShape::ImmediateText)
            .then_dispatch(Err(BackendError::Permanent("caption model down".to_string()))),
    );
    let orchestrator = env.orchestrator(registry(Arc::new(png_backend()), text), fast_config());

    let content = orchestrator.generate(image_request(&account_id)).await.unwrap();

    assert!(content.caption_degraded);
    assert_eq!(content.text, caption::placeholder_caption("a red fox"));
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
    // Captions are not metered separately
    assert_eq!(env.balance(&account_id, ResourceType::Text), 5);
    assert_eq!(env.posts.len(), 1);
    env.assert_no_outstanding();
}

#[tokio::test]
async fn test_caption_prompt_sent_to_text_backend() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 1, 0);
    let text = Arc::new(ScriptedBackend::text("Foxy #fox #nature"));
    let orchestrator = env.orchestrator(registry(Arc::new(png_backend()), text.clone()), fast_config());

    orchestrator.generate(image_request(&account_id)).await.unwrap();

    let requests = text.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("a red fox"));
    assert!(requests[0].prompt.contains("hashtags"));
}

#[tokio::test]
async fn test_skip_caption_leaves_text_empty() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 1, 0);
    let text = Arc::new(ScriptedBackend::text("unused"));
    let orchestrator = env.orchestrator(registry(Arc::new(png_backend()), text.clone()), fast_config());

    let content = orchestrator
        .generate(GenerateRequest::new(
            account_id.clone(),
            ResourceType::Image,
            JobSpec::new("a red fox").without_caption(),
        ))
        .await
        .unwrap();

    assert!(content.text.is_empty());
    assert_eq!(text.dispatch_calls(), 0);
}

#[tokio::test]
async fn test_publish_failure_keeps_credit() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 2, 0);
    let publisher = Arc::new(FailingPublisher::default());
    let orchestrator = env.orchestrator_with(
        registry(Arc::new(png_backend()), Arc::new(ScriptedBackend::text("unused"))),
        publisher.clone(),
        env.posts.clone(),
        fast_config(),
    );

    let err = orchestrator.generate(image_request(&account_id)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PublishFailed);
    assert_eq!(err.credit_state(), CreditState::Charged);
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
    assert!(env.posts.is_empty());
    env.assert_no_outstanding();
}

#[tokio::test]
async fn test_record_failure_returns_content() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 2, 0);
    let orchestrator = env.orchestrator_with(
        registry(Arc::new(png_backend()), Arc::new(ScriptedBackend::text("Fox #fox"))),
        env.publisher(),
        Arc::new(FailingPostStore),
        fast_config(),
    );

    let err = orchestrator.generate(image_request(&account_id)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RecordingFailed);
    assert_eq!(err.credit_state(), CreditState::Charged);
    match err {
        GenerateError::RecordingFailed { content, .. } => {
            assert_eq!(content.text, "Fox #fox");
            assert!(content.media_url.is_some());
            assert!(content.post_id.is_none());
        }
        other => panic!("expected RecordingFailed, got {:?}", other),
    }
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
    env.assert_no_outstanding();
}

#[tokio::test]
async fn test_republishing_identical_bytes_yields_same_url() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 2, 0);
    let orchestrator = env.orchestrator(
        registry(Arc::new(png_backend()), Arc::new(ScriptedBackend::text("Fox"))),
        fast_config(),
    );

    let first = orchestrator.generate(image_request(&account_id)).await.unwrap();
    let second = orchestrator.generate(image_request(&account_id)).await.unwrap();
    assert_eq!(first.media_url, second.media_url);
    assert_ne!(first.post_id, second.post_id);
}

#[tokio::test]
async fn test_text_generation_records_post() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 1, 0, 0);
    let text = Arc::new(ScriptedBackend::text("Fall is here #autumn #leaves"));
    let orchestrator = env.orchestrator(
        BackendRegistry::new().with(ResourceType::Text, text),
        fast_config(),
    );

    let content = orchestrator
        .generate(GenerateRequest::new(
            account_id.clone(),
            ResourceType::Text,
            JobSpec::new("autumn").with_platforms(vec!["instagram".to_string()]),
        ))
        .await
        .unwrap();

    assert_eq!(content.media_url, None);
    let post = env.posts.get(content.post_id.unwrap()).unwrap().unwrap();
    assert_eq!(post.text, "Fall is here #autumn #leaves");
    assert_eq!(post.platforms, vec!["instagram".to_string()]);
    assert_eq!(post.status, PostStatus::Pending);
    assert_eq!(post.source, PostSource::Generated);
    assert_eq!(env.balance(&account_id, ResourceType::Text), 0);
}

#[tokio::test]
async fn test_empty_prompt_rejected_before_reserve() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 1, 0, 0);
    let orchestrator = env.orchestrator(
        BackendRegistry::new().with(ResourceType::Text, Arc::new(ScriptedBackend::text("x"))),
        fast_config(),
    );

    let err = orchestrator
        .generate(GenerateRequest::new(account_id.clone(), ResourceType::Text, JobSpec::new("   ")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(err.credit_state(), CreditState::NotCharged);
    assert_eq!(env.balance(&account_id, ResourceType::Text), 1);
}

#[tokio::test]
async fn test_manual_post_refunded_when_publish_fails() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 1, 0);
    let orchestrator = env.orchestrator_with(
        BackendRegistry::new(),
        Arc::new(FailingPublisher::default()),
        env.posts.clone(),
        fast_config(),
    );

    let err = orchestrator
        .submit_manual_post(ManualPost {
            account_id: account_id.clone(),
            text: "My own photo".to_string(),
            data: b"\x89PNG...".to_vec(),
            mime_type: "image/png".to_string(),
            platforms: Vec::new(),
            post_now: true,
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PublishFailed);
    assert_eq!(err.credit_state(), CreditState::Refunded);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
    env.assert_no_outstanding();
}

#[tokio::test]
async fn test_dispatch_returns_wrong_artifact_kind() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 1, 0);
    let image = Arc::new(
        ScriptedBackend::new("image", BackendShape::ImmediateImage)
            .repeat(DispatchOutcome::Immediate(Artifact::Text("not an image".to_string()))),
    );
    let orchestrator = env.orchestrator(
        registry(image, Arc::new(ScriptedBackend::text("unused"))),
        fast_config(),
    );

    let err = orchestrator.generate(image_request(&account_id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendFailed);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
}
