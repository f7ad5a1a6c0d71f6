//! Quota Ledger
//!
//! Per-account, per-resource credit balances with an atomic reserve / commit /
//! refund primitive. A reservation debits one credit up front; it is later
//! resolved exactly once, either by `commit` (the debit stands) or by `refund`
//! (the debit is reversed). Admin accounts are never debited.
//!
//! Every balance mutation runs under a lock scoped to one account + resource
//! key. The lock only spans the read-check-write on the store, never the
//! downstream generation.

pub mod catalog;
pub mod persistence;
pub mod store;
pub mod sweeper;

pub use catalog::{CreditAllocation, CreditCatalog};
pub use persistence::SledLedgerStore;
pub use store::{BalanceEntry, LedgerStore, LedgerWrite, MemoryLedgerStore};
pub use sweeper::{ReservationSweeper, SweeperHandle};

use crate::concurrency::KeyLockManager;
use crate::error::LedgerError;
use crate::types::{AccountId, ReservationId, ResourceType, Role};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stored account attributes (balances are kept per resource key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account_id: AccountId,
    pub role: Role,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

impl AccountProfile {
    pub fn new(account_id: AccountId, role: Role, plan: &str) -> Self {
        Self {
            account_id,
            role,
            plan: plan.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Account view: profile plus current balances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub role: Role,
    pub plan: String,
    pub balances: BTreeMap<ResourceType, i64>,
}

impl Account {
    pub fn balance(&self, resource: ResourceType) -> i64 {
        self.balances.get(&resource).copied().unwrap_or(0)
    }
}

/// Lifecycle state of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Reserved,
    Committed,
    Refunded,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Reserved => f.write_str("reserved"),
            ReservationState::Committed => f.write_str("committed"),
            ReservationState::Refunded => f.write_str("refunded"),
        }
    }
}

/// Ledger-side record of a reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub account_id: AccountId,
    pub resource: ResourceType,
    /// False for admin reservations (no balance was touched)
    pub metered: bool,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Token for a provisionally debited credit, handed to the caller of `reserve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub account_id: AccountId,
    pub resource: ResourceType,
    pub metered: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&ReservationRecord> for Reservation {
    fn from(record: &ReservationRecord) -> Self {
        Self {
            id: record.id,
            account_id: record.account_id.clone(),
            resource: record.resource,
            metered: record.metered,
            created_at: record.created_at,
        }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Stale reservations force-refunded by this pass
    pub refunded: Vec<ReservationId>,
    /// Stale reservations resolved concurrently while the pass ran
    pub raced: usize,
    /// Resolved records dropped after the retention window
    pub pruned: usize,
    /// Reservations that could not be refunded (left for the next pass)
    pub failures: Vec<(ReservationId, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Commit,
    Refund,
}

type BalanceKey = (AccountId, ResourceType);

/// Quota ledger service
pub struct QuotaLedger {
    store: Arc<dyn LedgerStore>,
    locks: KeyLockManager<BalanceKey>,
    catalog: CreditCatalog,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_catalog(store, CreditCatalog::default())
    }

    pub fn with_catalog(store: Arc<dyn LedgerStore>, catalog: CreditCatalog) -> Self {
        Self {
            store,
            locks: KeyLockManager::new(),
            catalog,
        }
    }

    /// In-memory ledger with the default catalog
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()))
    }

    pub fn catalog(&self) -> &CreditCatalog {
        &self.catalog
    }

    /// Provision an account with the allocation of `plan` (or the default plan)
    pub fn open_account(
        &self,
        account_id: &AccountId,
        role: Role,
        plan: Option<&str>,
    ) -> Result<Account, LedgerError> {
        let plan_name = plan.unwrap_or(&self.catalog.default_plan);
        let allocation = *self
            .catalog
            .plan(plan_name)
            .ok_or_else(|| LedgerError::UnknownPlan(plan_name.to_string()))?;

        let locks = self.account_locks(account_id);
        let _guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();

        if self.store.get_account(account_id)?.is_some() {
            return Err(LedgerError::AccountExists(account_id.clone()));
        }

        let profile = AccountProfile::new(account_id.clone(), role, plan_name);
        let mut write = LedgerWrite::default().account(profile);
        for resource in ResourceType::ALL {
            write = write.balance(account_id, resource, allocation.get(resource));
        }
        self.store.write(write)?;

        info!(account_id = %account_id, role = %role, plan = %plan_name, "Opened account");
        self.account(account_id)
    }

    /// Current account view
    pub fn account(&self, account_id: &AccountId) -> Result<Account, LedgerError> {
        let profile = self.profile(account_id)?;
        let mut balances = BTreeMap::new();
        for resource in ResourceType::ALL {
            let balance = self.store.get_balance(account_id, resource)?.unwrap_or(0);
            balances.insert(resource, balance);
        }
        Ok(Account {
            account_id: profile.account_id,
            role: profile.role,
            plan: profile.plan,
            balances,
        })
    }

    pub fn accounts(&self) -> Result<Vec<AccountProfile>, LedgerError> {
        Ok(self.store.list_accounts()?)
    }

    /// Current balance for one resource
    pub fn balance(&self, account_id: &AccountId, resource: ResourceType) -> Result<i64, LedgerError> {
        self.profile(account_id)?;
        Ok(self.store.get_balance(account_id, resource)?.unwrap_or(0))
    }

    /// Debit one credit and hand back a reservation.
    ///
    /// Fails with `InsufficientCredits` when the balance is absent or not
    /// positive. Admin reservations always succeed and leave the balance alone.
    pub fn reserve(
        &self,
        account_id: &AccountId,
        resource: ResourceType,
    ) -> Result<Reservation, LedgerError> {
        let profile = self.profile(account_id)?;
        let metered = !profile.role.is_admin();

        let lock = self.locks.get_lock(&(account_id.clone(), resource));
        let _guard = lock.lock();

        let record = ReservationRecord {
            id: ReservationId::new(),
            account_id: account_id.clone(),
            resource,
            metered,
            state: ReservationState::Reserved,
            created_at: Utc::now(),
            resolved_at: None,
        };

        let write = if metered {
            let balance = self.store.get_balance(account_id, resource)?.unwrap_or(0);
            if balance <= 0 {
                debug!(account_id = %account_id, resource = %resource, balance, "Reserve rejected");
                return Err(LedgerError::InsufficientCredits {
                    account_id: account_id.clone(),
                    resource,
                });
            }
            LedgerWrite::default()
                .balance(account_id, resource, balance - 1)
                .reservation(record.clone())
        } else {
            LedgerWrite::default().reservation(record.clone())
        };
        self.store.write(write)?;

        debug!(
            reservation_id = %record.id,
            account_id = %account_id,
            resource = %resource,
            metered,
            "Reserved credit"
        );
        Ok(Reservation::from(&record))
    }

    /// Resolve a reservation as spent. The balance is not touched.
    pub fn commit(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        self.resolve(
            &reservation.id,
            &reservation.account_id,
            reservation.resource,
            Resolution::Commit,
        )
    }

    /// Return a reserved credit. Fails with `InvalidReservationState` if the
    /// reservation was already committed or refunded.
    pub fn refund(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        self.resolve(
            &reservation.id,
            &reservation.account_id,
            reservation.resource,
            Resolution::Refund,
        )
    }

    /// Add credits (add-on purchase). Returns the new balance.
    pub fn grant(
        &self,
        account_id: &AccountId,
        resource: ResourceType,
        amount: i64,
    ) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        self.profile(account_id)?;

        let lock = self.locks.get_lock(&(account_id.clone(), resource));
        let _guard = lock.lock();

        let balance = self.store.get_balance(account_id, resource)?.unwrap_or(0) + amount;
        self.store
            .write(LedgerWrite::default().balance(account_id, resource, balance))?;

        info!(account_id = %account_id, resource = %resource, amount, balance, "Granted credits");
        Ok(balance)
    }

    /// Apply a named add-on pack
    pub fn grant_addon(&self, account_id: &AccountId, pack: &str) -> Result<Account, LedgerError> {
        let allocation = *self
            .catalog
            .addon(pack)
            .ok_or_else(|| LedgerError::UnknownPlan(pack.to_string()))?;
        for (resource, amount) in allocation.entries() {
            self.grant(account_id, resource, amount)?;
        }
        self.account(account_id)
    }

    /// Reset every balance to the allocation of `plan`
    ///
    /// Credits held by outstanding reservations count against the new
    /// allocation, since resolving them later returns or keeps them.
    pub fn apply_plan(&self, account_id: &AccountId, plan: &str) -> Result<Account, LedgerError> {
        let allocation = *self
            .catalog
            .plan(plan)
            .ok_or_else(|| LedgerError::UnknownPlan(plan.to_string()))?;

        let locks = self.account_locks(account_id);
        let _guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();

        let mut profile = self.profile(account_id)?;
        profile.plan = plan.to_string();

        let held = self
            .store
            .list_reservations()?
            .into_iter()
            .filter(|record| {
                record.account_id == *account_id
                    && record.metered
                    && record.state == ReservationState::Reserved
            })
            .fold(BTreeMap::new(), |mut held, record| {
                *held.entry(record.resource).or_insert(0i64) += 1;
                held
            });

        let mut write = LedgerWrite::default().account(profile);
        for resource in ResourceType::ALL {
            let pending = held.get(&resource).copied().unwrap_or(0);
            let balance = (allocation.get(resource) - pending).max(0);
            write = write.balance(account_id, resource, balance);
        }
        self.store.write(write)?;

        info!(account_id = %account_id, plan, "Applied plan");
        self.account(account_id)
    }

    /// Reservations that are still unresolved, oldest first
    pub fn outstanding(&self) -> Result<Vec<ReservationRecord>, LedgerError> {
        let mut records: Vec<_> = self
            .store
            .list_reservations()?
            .into_iter()
            .filter(|record| record.state == ReservationState::Reserved)
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    pub fn reservation(&self, id: &ReservationId) -> Result<Option<ReservationRecord>, LedgerError> {
        Ok(self.store.get_reservation(id)?)
    }

    /// Force-refund reservations older than `max_age` and prune resolved
    /// records older than `retention`.
    pub fn reconcile(
        &self,
        max_age: ChronoDuration,
        retention: ChronoDuration,
    ) -> Result<ReconcileReport, LedgerError> {
        self.reconcile_at(Utc::now(), max_age, retention)
    }

    /// [`QuotaLedger::reconcile`] against an explicit clock reading
    pub fn reconcile_at(
        &self,
        now: DateTime<Utc>,
        max_age: ChronoDuration,
        retention: ChronoDuration,
    ) -> Result<ReconcileReport, LedgerError> {
        let mut report = ReconcileReport::default();

        for record in self.store.list_reservations()? {
            match record.state {
                ReservationState::Reserved if record.created_at + max_age <= now => {
                    match self.resolve(
                        &record.id,
                        &record.account_id,
                        record.resource,
                        Resolution::Refund,
                    ) {
                        Ok(()) => {
                            warn!(
                                reservation_id = %record.id,
                                account_id = %record.account_id,
                                resource = %record.resource,
                                created_at = %record.created_at,
                                "Force-refunded stale reservation"
                            );
                            report.refunded.push(record.id);
                        }
                        Err(LedgerError::InvalidReservationState { .. }) => report.raced += 1,
                        Err(e) => report.failures.push((record.id, e.to_string())),
                    }
                }
                ReservationState::Committed | ReservationState::Refunded => {
                    let resolved_at = record.resolved_at.unwrap_or(record.created_at);
                    if resolved_at + retention <= now {
                        self.store.remove_reservation(&record.id)?;
                        report.pruned += 1;
                    }
                }
                ReservationState::Reserved => {}
            }
        }

        let idle_locks = self.locks.prune_idle();
        debug!(idle_locks, "Pruned idle balance locks");

        if !report.refunded.is_empty() || !report.failures.is_empty() {
            info!(
                refunded = report.refunded.len(),
                raced = report.raced,
                pruned = report.pruned,
                failures = report.failures.len(),
                "Reconciliation pass finished"
            );
        }
        Ok(report)
    }

    fn profile(&self, account_id: &AccountId) -> Result<AccountProfile, LedgerError> {
        self.store
            .get_account(account_id)?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))
    }

    fn account_locks(&self, account_id: &AccountId) -> Vec<Arc<parking_lot::Mutex<()>>> {
        ResourceType::ALL
            .iter()
            .map(|resource| self.locks.get_lock(&(account_id.clone(), *resource)))
            .collect()
    }

    fn resolve(
        &self,
        id: &ReservationId,
        account_id: &AccountId,
        resource: ResourceType,
        resolution: Resolution,
    ) -> Result<(), LedgerError> {
        let lock = self.locks.get_lock(&(account_id.clone(), resource));
        let _guard = lock.lock();

        let mut record = self.store.get_reservation(id)?.ok_or_else(|| {
            LedgerError::InvalidReservationState {
                id: *id,
                state: "unknown".to_string(),
            }
        })?;
        if record.state != ReservationState::Reserved {
            return Err(LedgerError::InvalidReservationState {
                id: *id,
                state: record.state.to_string(),
            });
        }

        let mut write = LedgerWrite::default();
        match resolution {
            Resolution::Commit => record.state = ReservationState::Committed,
            Resolution::Refund => {
                record.state = ReservationState::Refunded;
                if record.metered {
                    let balance = self
                        .store
                        .get_balance(&record.account_id, record.resource)?
                        .unwrap_or(0);
                    write = write.balance(&record.account_id, record.resource, balance + 1);
                }
            }
        }
        record.resolved_at = Some(Utc::now());
        let state = record.state;
        self.store.write(write.reservation(record))?;

        debug!(reservation_id = %id, account_id = %account_id, resource = %resource, state = %state, "Resolved reservation");
        Ok(())
    }
}
