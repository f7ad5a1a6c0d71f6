//! Ledger storage interface and the in-memory implementation.

use crate::error::StorageError;
use crate::ledger::{AccountProfile, ReservationRecord};
use crate::types::{AccountId, ReservationId, ResourceType};
use parking_lot::RwLock;
use std::collections::HashMap;

/// One balance assignment inside a [`LedgerWrite`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    pub account_id: AccountId,
    pub resource: ResourceType,
    pub balance: i64,
}

/// A group of ledger mutations applied atomically
#[derive(Debug, Clone, Default)]
pub struct LedgerWrite {
    pub account: Option<AccountProfile>,
    pub balances: Vec<BalanceEntry>,
    pub reservation: Option<ReservationRecord>,
}

impl LedgerWrite {
    pub fn balance(mut self, account_id: &AccountId, resource: ResourceType, balance: i64) -> Self {
        self.balances.push(BalanceEntry {
            account_id: account_id.clone(),
            resource,
            balance,
        });
        self
    }

    pub fn reservation(mut self, record: ReservationRecord) -> Self {
        self.reservation = Some(record);
        self
    }

    pub fn account(mut self, profile: AccountProfile) -> Self {
        self.account = Some(profile);
        self
    }
}

/// Ledger store interface
///
/// Implementations must apply each [`LedgerWrite`] atomically: either every
/// entry is visible afterwards or none is. Callers serialize writes per
/// account + resource key.
pub trait LedgerStore: Send + Sync {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountProfile>, StorageError>;
    fn list_accounts(&self) -> Result<Vec<AccountProfile>, StorageError>;
    fn get_balance(
        &self,
        account_id: &AccountId,
        resource: ResourceType,
    ) -> Result<Option<i64>, StorageError>;
    fn get_reservation(&self, id: &ReservationId) -> Result<Option<ReservationRecord>, StorageError>;
    fn list_reservations(&self) -> Result<Vec<ReservationRecord>, StorageError>;
    fn remove_reservation(&self, id: &ReservationId) -> Result<(), StorageError>;
    fn write(&self, write: LedgerWrite) -> Result<(), StorageError>;
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, AccountProfile>,
    balances: HashMap<(AccountId, ResourceType), i64>,
    reservations: HashMap<ReservationId, ReservationRecord>,
}

/// Process-local ledger store
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountProfile>, StorageError> {
        Ok(self.state.read().accounts.get(account_id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<AccountProfile>, StorageError> {
        let mut accounts: Vec<_> = self.state.read().accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(accounts)
    }

    fn get_balance(
        &self,
        account_id: &AccountId,
        resource: ResourceType,
    ) -> Result<Option<i64>, StorageError> {
        Ok(self
            .state
            .read()
            .balances
            .get(&(account_id.clone(), resource))
            .copied())
    }

    fn get_reservation(&self, id: &ReservationId) -> Result<Option<ReservationRecord>, StorageError> {
        Ok(self.state.read().reservations.get(id).cloned())
    }

    fn list_reservations(&self) -> Result<Vec<ReservationRecord>, StorageError> {
        Ok(self.state.read().reservations.values().cloned().collect())
    }

    fn remove_reservation(&self, id: &ReservationId) -> Result<(), StorageError> {
        self.state.write().reservations.remove(id);
        Ok(())
    }

    fn write(&self, write: LedgerWrite) -> Result<(), StorageError> {
        let mut state = self.state.write();
        if let Some(profile) = write.account {
            state.accounts.insert(profile.account_id.clone(), profile);
        }
        for entry in write.balances {
            state
                .balances
                .insert((entry.account_id, entry.resource), entry.balance);
        }
        if let Some(record) = write.reservation {
            state.reservations.insert(record.id, record);
        }
        Ok(())
    }
}
