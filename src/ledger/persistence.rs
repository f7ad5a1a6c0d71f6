//! Sled-backed ledger store

use crate::error::StorageError;
use crate::ledger::store::{LedgerStore, LedgerWrite};
use crate::ledger::{AccountProfile, ReservationRecord};
use crate::types::{AccountId, ReservationId, ResourceType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::Tree;
use std::path::Path;

const ACCOUNTS_TREE: &str = "accounts";
const BALANCES_TREE: &str = "balances";
const RESERVATIONS_TREE: &str = "reservations";

/// Ledger store persisted in a sled database.
///
/// Accounts, balances and reservation records live in separate trees. Every
/// [`LedgerWrite`] is one multi-tree transaction, so a crash can never leave a
/// decremented balance without its reservation record (or the reverse).
pub struct SledLedgerStore {
    db: sled::Db,
    accounts: Tree,
    balances: Tree,
    reservations: Tree,
}

impl SledLedgerStore {
    /// Open (or create) a ledger database at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Build on an already-open database (shared with other stores)
    pub fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let accounts = db.open_tree(ACCOUNTS_TREE)?;
        let balances = db.open_tree(BALANCES_TREE)?;
        let reservations = db.open_tree(RESERVATIONS_TREE)?;
        Ok(Self {
            db,
            accounts,
            balances,
            reservations,
        })
    }

    /// Get the underlying sled database
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn balance_key(account_id: &AccountId, resource: ResourceType) -> Vec<u8> {
    let mut key = Vec::with_capacity(account_id.as_str().len() + 8);
    key.extend_from_slice(account_id.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(resource.as_str().as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Decode(e.to_string()))
}

fn decode_balance(bytes: &[u8]) -> Result<i64, StorageError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Decode(format!("balance has {} bytes, expected 8", bytes.len())))?;
    Ok(i64::from_be_bytes(raw))
}

impl LedgerStore for SledLedgerStore {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountProfile>, StorageError> {
        match self.accounts.get(account_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn list_accounts(&self) -> Result<Vec<AccountProfile>, StorageError> {
        let mut accounts = Vec::new();
        for item in self.accounts.iter() {
            let (_, value) = item?;
            accounts.push(decode(&value)?);
        }
        Ok(accounts)
    }

    fn get_balance(
        &self,
        account_id: &AccountId,
        resource: ResourceType,
    ) -> Result<Option<i64>, StorageError> {
        match self.balances.get(balance_key(account_id, resource))? {
            Some(value) => Ok(Some(decode_balance(&value)?)),
            None => Ok(None),
        }
    }

    fn get_reservation(&self, id: &ReservationId) -> Result<Option<ReservationRecord>, StorageError> {
        match self.reservations.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn list_reservations(&self) -> Result<Vec<ReservationRecord>, StorageError> {
        let mut records = Vec::new();
        for item in self.reservations.iter() {
            let (_, value) = item?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    fn remove_reservation(&self, id: &ReservationId) -> Result<(), StorageError> {
        self.reservations.remove(id.as_bytes())?;
        Ok(())
    }

    fn write(&self, write: LedgerWrite) -> Result<(), StorageError> {
        // Encode up front; the transaction closure may run more than once.
        let account = match &write.account {
            Some(profile) => Some((
                profile.account_id.as_str().as_bytes().to_vec(),
                encode(profile)?,
            )),
            None => None,
        };
        let balances: Vec<(Vec<u8>, [u8; 8])> = write
            .balances
            .iter()
            .map(|entry| {
                (
                    balance_key(&entry.account_id, entry.resource),
                    entry.balance.to_be_bytes(),
                )
            })
            .collect();
        let reservation = match &write.reservation {
            Some(record) => Some((record.id.as_bytes().to_vec(), encode(record)?)),
            None => None,
        };

        let result: Result<(), TransactionError<()>> =
            (&self.accounts, &self.balances, &self.reservations).transaction(
                |(accounts, balances_tree, reservations)| {
                    if let Some((key, value)) = &account {
                        accounts.insert(key.as_slice(), value.as_slice())?;
                    }
                    for (key, value) in &balances {
                        balances_tree.insert(key.as_slice(), &value[..])?;
                    }
                    if let Some((key, value)) = &reservation {
                        reservations.insert(key.as_slice(), value.as_slice())?;
                    }
                    Ok::<(), ConflictableTransactionError<()>>(())
                },
            );

        result.map_err(|e| match e {
            TransactionError::Abort(()) => {
                StorageError::Backend("ledger transaction aborted".to_string())
            }
            TransactionError::Storage(err) => StorageError::from(err),
        })
    }
}
