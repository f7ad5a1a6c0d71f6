//! Persistence layer for post records

use crate::error::StorageError;
use crate::posts::{PostRecord, PostRecordStore, PostStatus, StoredPost};
use crate::types::{AccountId, PostId};
use sled::Tree;
use std::path::Path;

const POSTS_TREE: &str = "posts";

/// Sled-based implementation of PostRecordStore
///
/// Keys are big-endian ids from `sled::Db::generate_id`, so iteration follows
/// creation order.
pub struct SledPostStore {
    db: sled::Db,
    posts: Tree,
}

impl SledPostStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Build on an already-open database (shared with the ledger store)
    pub fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let posts = db.open_tree(POSTS_TREE)?;
        Ok(Self { db, posts })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn scan(&self, keep: impl Fn(&PostRecord) -> bool) -> Result<Vec<StoredPost>, StorageError> {
        let mut posts = Vec::new();
        for item in self.posts.iter() {
            let (key, value) = item?;
            let record: PostRecord = bincode::deserialize(&value)
                .map_err(|e| StorageError::Decode(format!("post record: {}", e)))?;
            if keep(&record) {
                let raw: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    StorageError::Decode(format!("post key has {} bytes, expected 8", key.len()))
                })?;
                posts.push(StoredPost {
                    id: PostId(u64::from_be_bytes(raw)),
                    record,
                });
            }
        }
        Ok(posts)
    }
}

impl PostRecordStore for SledPostStore {
    fn create(&self, record: PostRecord) -> Result<PostId, StorageError> {
        let value = bincode::serialize(&record)
            .map_err(|e| StorageError::Encode(format!("post record: {}", e)))?;
        let id = self.db.generate_id()? + 1;
        self.posts.insert(id.to_be_bytes(), value)?;
        Ok(PostId(id))
    }

    fn get(&self, id: PostId) -> Result<Option<PostRecord>, StorageError> {
        match self.posts.get(id.0.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value).map_err(|e| {
                StorageError::Decode(format!("post record: {}", e))
            })?)),
            None => Ok(None),
        }
    }

    fn list_by_status(&self, status: PostStatus) -> Result<Vec<StoredPost>, StorageError> {
        self.scan(|record| record.status == status)
    }

    fn list_for_account(&self, account_id: &AccountId) -> Result<Vec<StoredPost>, StorageError> {
        self.scan(|record| &record.account_id == account_id)
    }
}
