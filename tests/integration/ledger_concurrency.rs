//! Concurrent reserve/commit/refund against shared balances

use super::test_utils::{empty_catalog, open_account, TestEnv};
use mediamgr::backend::{BackendRegistry, ScriptedBackend};
use mediamgr::error::{ErrorKind, LedgerError};
use mediamgr::ledger::{QuotaLedger, SledLedgerStore};
use mediamgr::orchestrator::{GenerateRequest, JobSpec, OrchestratorConfig};
use mediamgr::types::{ResourceType, Role};
use std::sync::Arc;
use tempfile::TempDir;

fn race_reserves(ledger: &Arc<QuotaLedger>, threads: usize, balance: i64) {
    let account_id = open_account(ledger, "racer", Role::User, 0, balance, 0);

    let successes: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let ledger = Arc::clone(ledger);
                let account_id = account_id.clone();
                scope.spawn(move || ledger.reserve(&account_id, ResourceType::Image))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|result| match result {
                Ok(_) => true,
                Err(LedgerError::InsufficientCredits { .. }) => false,
                Err(e) => panic!("unexpected error: {}", e),
            })
            .count()
    });

    let expected = threads.min(balance as usize);
    assert_eq!(successes, expected);
    assert_eq!(
        ledger.balance(&account_id, ResourceType::Image).unwrap(),
        balance - expected as i64
    );
    assert_eq!(ledger.outstanding().unwrap().len(), expected);
}

#[test]
fn test_concurrent_reserves_in_memory() {
    let env = TestEnv::new();
    race_reserves(&env.ledger, 32, 5);
}

#[test]
fn test_concurrent_reserves_more_credits_than_callers() {
    let env = TestEnv::new();
    race_reserves(&env.ledger, 8, 20);
}

#[test]
fn test_concurrent_reserves_sled() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledLedgerStore::new(temp_dir.path().join("db")).unwrap();
    let ledger = Arc::new(QuotaLedger::with_catalog(Arc::new(store), empty_catalog()));
    race_reserves(&ledger, 16, 3);
}

#[test]
fn test_concurrent_refunds_restore_balance() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 10, 0);
    let reservations: Vec<_> = (0..10)
        .map(|_| env.ledger.reserve(&account_id, ResourceType::Image).unwrap())
        .collect();
    assert_eq!(env.balance(&account_id, ResourceType::Image), 0);

    std::thread::scope(|scope| {
        for (i, reservation) in reservations.iter().enumerate() {
            let ledger = Arc::clone(&env.ledger);
            scope.spawn(move || {
                if i % 2 == 0 {
                    ledger.refund(reservation).unwrap();
                } else {
                    ledger.commit(reservation).unwrap();
                }
            });
        }
    });

    assert_eq!(env.balance(&account_id, ResourceType::Image), 5);
    env.assert_no_outstanding();
}

#[test]
fn test_racing_double_refund_applies_once() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 1, 0);
    let reservation = env.ledger.reserve(&account_id, ResourceType::Image).unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&env.ledger);
                let reservation = reservation.clone();
                scope.spawn(move || ledger.refund(&reservation))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::InvalidReservationState { .. })));
    assert_eq!(env.balance(&account_id, ResourceType::Image), 1);
}

#[test]
fn test_resources_are_independent() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 1, 0, 1);

    assert!(matches!(
        env.ledger.reserve(&account_id, ResourceType::Image),
        Err(LedgerError::InsufficientCredits { .. })
    ));
    env.ledger.reserve(&account_id, ResourceType::Video).unwrap();
    assert_eq!(env.balance(&account_id, ResourceType::Text), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_generates_one_credit() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 0, 1, 0);
    let backends = BackendRegistry::new()
        .with(
            ResourceType::Image,
            Arc::new(ScriptedBackend::image(b"\x89PNG".to_vec(), "image/png")),
        )
        .with(ResourceType::Text, Arc::new(ScriptedBackend::text("Golden hour #autumn")));
    let orchestrator = env.orchestrator(backends, OrchestratorConfig::default());

    let first = orchestrator.generate(GenerateRequest::new(
        account_id.clone(),
        ResourceType::Image,
        JobSpec::new("autumn"),
    ));
    let second = orchestrator.generate(GenerateRequest::new(
        account_id.clone(),
        ResourceType::Image,
        JobSpec::new("autumn"),
    ));
    let (first, second) = tokio::join!(first, second);

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(err.kind(), ErrorKind::InsufficientCredits);

    assert_eq!(env.balance(&account_id, ResourceType::Image), 0);
    assert_eq!(env.posts.len(), 1);
    env.assert_no_outstanding();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_generates_bounded_by_balance() {
    let env = TestEnv::new();
    let account_id = env.account("alice", Role::User, 3, 0, 0);
    let backends = BackendRegistry::new()
        .with(ResourceType::Text, Arc::new(ScriptedBackend::text("Morning light #coffee")));
    let orchestrator = env.orchestrator(backends, OrchestratorConfig::default());

    let jobs = (0..10).map(|i| {
        orchestrator.generate(GenerateRequest::new(
            account_id.clone(),
            ResourceType::Text,
            JobSpec::new(format!("coffee {}", i)),
        ))
    });
    let results = futures::future::join_all(jobs).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::InsufficientCredits));
    assert_eq!(env.balance(&account_id, ResourceType::Text), 0);
    assert_eq!(env.posts.len(), 3);
    env.assert_no_outstanding();
}
