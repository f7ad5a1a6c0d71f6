//! Jobs outlive their callers: dropped futures and panicking tasks

use super::test_utils::{fast_config, TestEnv};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use mediamgr::backend::{
    BackendRegistry, BackendRequest, BackendShape, DispatchOutcome, GenerationBackend,
    OperationHandle, OperationStatus, ScriptedBackend,
};
use mediamgr::error::{BackendError, CreditState, ErrorKind};
use mediamgr::orchestrator::{GenerateRequest, JobSpec};
use mediamgr::types::{ResourceType, Role};
use std::sync::Arc;
use std::time::Duration;

/// Backend whose dispatch panics
struct PanickingBackend;

#[async_trait]
impl GenerationBackend for PanickingBackend {
    fn name(&self) -> &str {
        "panicking"
    }

    fn shape(&self) -> BackendShape {
        BackendShape::ImmediateImage
    }

    async fn dispatch(&self, _request: &BackendRequest) -> Result<DispatchOutcome, BackendError> {
        panic!("backend exploded");
    }

    async fn poll_operation(&self, _handle: &OperationHandle) -> Result<OperationStatus, BackendError> {
        Ok(OperationStatus::Running { progress: None })
    }
}

#[tokio::test(start_paused = true)]
async fn test_dropped_caller_still_refunds() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 0, 5);
    let video = Arc::new(
        ScriptedBackend::new("video", BackendShape::LongRunningVideo).then_dispatch(Ok(
            DispatchOutcome::Pending(OperationHandle::new("operations/never-done")),
        )),
    );
    let orchestrator = env.orchestrator(
        BackendRegistry::new().with(ResourceType::Video, video.clone()),
        fast_config(),
    );

    let request = GenerateRequest::new(account_id.clone(), ResourceType::Video, JobSpec::new("tide"));
    let waited = tokio::time::timeout(Duration::from_millis(1_500), orchestrator.generate(request)).await;
    assert!(waited.is_err());

    // The caller is gone but the job still holds its credit
    assert_eq!(env.balance(&account_id, ResourceType::Video), 4);
    assert_eq!(env.ledger.outstanding().unwrap().len(), 1);

    // Past the polling deadline the detached job times out and refunds
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(env.balance(&account_id, ResourceType::Video), 5);
    assert_eq!(video.cancel_calls(), 1);
    env.assert_no_outstanding();
    assert!(env.posts.is_empty());
}

#[tokio::test]
async fn test_panicking_job_leaves_refund_pending() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 3, 0);
    let orchestrator = env.orchestrator(
        BackendRegistry::new().with(ResourceType::Image, Arc::new(PanickingBackend)),
        fast_config(),
    );

    let request = GenerateRequest::new(account_id.clone(), ResourceType::Image, JobSpec::new("dunes"));
    let err = orchestrator.generate(request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendFailed);
    assert_eq!(err.credit_state(), CreditState::RefundPending);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 2);
    assert_eq!(env.ledger.outstanding().unwrap().len(), 1);
    assert!(env.posts.is_empty());

    // Reconciliation returns the stranded credit exactly once
    let later = Utc::now() + ChronoDuration::hours(1);
    let report = env
        .ledger
        .reconcile_at(later, ChronoDuration::minutes(15), ChronoDuration::days(7))
        .unwrap();
    assert_eq!(report.refunded.len(), 1);
    assert_eq!(env.balance(&account_id, ResourceType::Image), 3);
    env.assert_no_outstanding();
}
