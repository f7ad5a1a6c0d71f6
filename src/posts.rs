//! Post Record Store
//!
//! Durable, append-only queue of generated (or uploaded) content awaiting
//! approval and publishing.

pub mod persistence;

pub use persistence::SledPostStore;

use crate::error::StorageError;
use crate::types::{AccountId, JobId, MediaType, PostId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Approval status of a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Posted,
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostStatus::Pending => f.write_str("pending"),
            PostStatus::Posted => f.write_str("posted"),
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(PostStatus::Pending),
            "posted" => Ok(PostStatus::Posted),
            other => Err(format!("Unknown post status: {}", other)),
        }
    }
}

/// Where a post's content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostSource {
    Generated,
    Manual,
}

impl fmt::Display for PostSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostSource::Generated => f.write_str("generated"),
            PostSource::Manual => f.write_str("manual"),
        }
    }
}

/// Content queued for approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub account_id: AccountId,
    pub text: String,
    pub media_url: Option<String>,
    pub media_type: Option<MediaType>,
    pub platforms: Vec<String>,
    pub status: PostStatus,
    pub source: PostSource,
    pub job_id: Option<JobId>,
    /// Theme the content was generated from
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A record together with its store-assigned id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPost {
    pub id: PostId,
    #[serde(flatten)]
    pub record: PostRecord,
}

/// Post record store interface
pub trait PostRecordStore: Send + Sync {
    /// Append a record and return its id
    fn create(&self, record: PostRecord) -> Result<PostId, StorageError>;
    fn get(&self, id: PostId) -> Result<Option<PostRecord>, StorageError>;
    /// Records with the given status, in creation order
    fn list_by_status(&self, status: PostStatus) -> Result<Vec<StoredPost>, StorageError>;
    /// Records of one account, in creation order
    fn list_for_account(&self, account_id: &AccountId) -> Result<Vec<StoredPost>, StorageError>;
}

/// Process-local post store
#[derive(Default)]
pub struct MemoryPostStore {
    posts: RwLock<Vec<PostRecord>>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.posts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, keep: impl Fn(&PostRecord) -> bool) -> Vec<StoredPost> {
        self.posts
            .read()
            .iter()
            .enumerate()
            .filter(|(_, record)| keep(record))
            .map(|(index, record)| StoredPost {
                id: PostId(index as u64 + 1),
                record: record.clone(),
            })
            .collect()
    }
}

impl PostRecordStore for MemoryPostStore {
    fn create(&self, record: PostRecord) -> Result<PostId, StorageError> {
        let mut posts = self.posts.write();
        posts.push(record);
        Ok(PostId(posts.len() as u64))
    }

    fn get(&self, id: PostId) -> Result<Option<PostRecord>, StorageError> {
        let index = match (id.0 as usize).checked_sub(1) {
            Some(index) => index,
            None => return Ok(None),
        };
        Ok(self.posts.read().get(index).cloned())
    }

    fn list_by_status(&self, status: PostStatus) -> Result<Vec<StoredPost>, StorageError> {
        Ok(self.filtered(|record| record.status == status))
    }

    fn list_for_account(&self, account_id: &AccountId) -> Result<Vec<StoredPost>, StorageError> {
        Ok(self.filtered(|record| &record.account_id == account_id))
    }
}

#[cfg(test)]
pub(crate) fn sample_post(account: &str, status: PostStatus) -> PostRecord {
    PostRecord {
        account_id: AccountId::new(account),
        text: "Fresh autumn colours".to_string(),
        media_url: Some("http://cdn.test/ab/abcd.png".to_string()),
        media_type: Some(MediaType::Image),
        platforms: vec!["instagram".to_string()],
        status,
        source: PostSource::Generated,
        job_id: Some(JobId::new()),
        prompt: Some("autumn".to_string()),
        created_at: Utc::now(),
    }
}
