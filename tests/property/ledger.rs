//! Property-based tests for credit conservation

use mediamgr::error::LedgerError;
use mediamgr::ledger::{CreditAllocation, CreditCatalog, MemoryLedgerStore, QuotaLedger, Reservation};
use mediamgr::types::{AccountId, ResourceType, Role};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Reserve,
    Commit(usize),
    Refund(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Reserve),
        2 => any::<usize>().prop_map(Op::Commit),
        2 => any::<usize>().prop_map(Op::Refund),
    ]
}

fn ledger_with(image: i64) -> (QuotaLedger, AccountId) {
    let mut catalog = CreditCatalog::default();
    catalog
        .plans
        .insert("fixed".to_string(), CreditAllocation::new(0, image, 0));
    catalog.default_plan = "fixed".to_string();
    let ledger = QuotaLedger::with_catalog(Arc::new(MemoryLedgerStore::new()), catalog);
    let account_id = AccountId::new("prop");
    ledger.open_account(&account_id, Role::User, None).unwrap();
    (ledger, account_id)
}

/// balance = initial - committed - outstanding, and never negative
#[test]
fn test_credit_conservation_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(0i64..8, prop::collection::vec(op_strategy(), 0..60)),
            |(initial, ops)| {
                let (ledger, account_id) = ledger_with(initial);
                let mut live: Vec<Reservation> = Vec::new();
                let mut resolved: Vec<Reservation> = Vec::new();
                let mut committed = 0i64;

                for op in ops {
                    match op {
                        Op::Reserve => match ledger.reserve(&account_id, ResourceType::Image) {
                            Ok(reservation) => live.push(reservation),
                            Err(LedgerError::InsufficientCredits { .. }) => {
                                prop_assert_eq!(initial - committed - live.len() as i64, 0);
                            }
                            Err(e) => return Err(TestCaseError::fail(e.to_string())),
                        },
                        Op::Commit(i) if !live.is_empty() => {
                            let reservation = live.remove(i % live.len());
                            ledger.commit(&reservation).unwrap();
                            committed += 1;
                            resolved.push(reservation);
                        }
                        Op::Refund(i) if !live.is_empty() => {
                            let reservation = live.remove(i % live.len());
                            ledger.refund(&reservation).unwrap();
                            resolved.push(reservation);
                        }
                        Op::Commit(i) | Op::Refund(i) if !resolved.is_empty() => {
                            // Resolving twice must fail and change nothing
                            let reservation = &resolved[i % resolved.len()];
                            let refund_rejected = matches!(
                                ledger.refund(reservation),
                                Err(LedgerError::InvalidReservationState { .. })
                            );
                            let commit_rejected = matches!(
                                ledger.commit(reservation),
                                Err(LedgerError::InvalidReservationState { .. })
                            );
                            prop_assert!(refund_rejected, "second refund was accepted");
                            prop_assert!(commit_rejected, "second commit was accepted");
                        }
                        Op::Commit(_) | Op::Refund(_) => {}
                    }

                    let balance = ledger.balance(&account_id, ResourceType::Image).unwrap();
                    prop_assert!(balance >= 0);
                    prop_assert_eq!(balance, initial - committed - live.len() as i64);
                    prop_assert_eq!(ledger.outstanding().unwrap().len(), live.len());
                }

                // Other resources are never touched
                prop_assert_eq!(ledger.balance(&account_id, ResourceType::Text).unwrap(), 0);
                prop_assert_eq!(ledger.balance(&account_id, ResourceType::Video).unwrap(), 0);
                Ok(())
            },
        )
        .unwrap();
}

/// Admin reservations never move a balance, whatever the sequence
#[test]
fn test_admin_unmetered_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&prop::collection::vec(any::<bool>(), 1..30), |commits| {
            let ledger = QuotaLedger::with_catalog(
                Arc::new(MemoryLedgerStore::new()),
                CreditCatalog::default(),
            );
            let admin = AccountId::new("root");
            let before = ledger.open_account(&admin, Role::Admin, None).unwrap();

            for commit in commits {
                let reservation = ledger.reserve(&admin, ResourceType::Video).unwrap();
                prop_assert!(!reservation.metered);
                if commit {
                    ledger.commit(&reservation).unwrap();
                } else {
                    ledger.refund(&reservation).unwrap();
                }
            }

            let after = ledger.account(&admin).unwrap();
            prop_assert_eq!(before.balances, after.balances);
            Ok(())
        })
        .unwrap();
}
