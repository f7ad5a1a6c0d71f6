//! Property-based tests for retry backoff bounds

use mediamgr::orchestrator::RetryPolicy;
use mediamgr::types::JobId;
use proptest::prelude::*;
use std::time::Duration;

fn policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..8, 0u64..5_000, 0u64..10_000, 0u64..60_000, any::<bool>()).prop_map(
        |(max_attempts, multiplier_ms, floor_ms, extra_ms, jitter)| RetryPolicy {
            max_attempts,
            multiplier_ms,
            floor_ms,
            ceiling_ms: floor_ms + extra_ms,
            jitter,
        },
    )
}

#[test]
fn test_delay_within_bounds_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(policy_strategy(), 1u32..8), |(policy, retry)| {
            let job_id = JobId::new();
            let delay = policy.delay_for(retry, &job_id);
            let floor = Duration::from_millis(policy.floor_ms);
            let ceiling = Duration::from_millis(policy.ceiling_ms);

            prop_assert!(delay >= floor);
            prop_assert!(delay <= ceiling);

            // Same job, same retry: same delay
            prop_assert_eq!(delay, policy.delay_for(retry, &job_id));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_worst_case_covers_actual_backoff_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&policy_strategy(), |policy| {
            let job_id = JobId::new();
            let actual: Duration = (1..policy.max_attempts)
                .map(|retry| policy.delay_for(retry, &job_id))
                .sum();
            prop_assert!(actual <= policy.worst_case_backoff());
            Ok(())
        })
        .unwrap();
}
