//! Artifact Publisher
//!
//! Turns a raw generation result (inline bytes or a storage locator) into a
//! caller-facing URL. Inline bytes are stored content-addressed, so publishing
//! the same bytes twice yields the same object. Locators are rewritten to
//! their public form.

use crate::backend::Artifact;
use crate::error::PublishError;
use crate::types::{AccountId, JobId, MediaType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Who and what a publish call is for
#[derive(Debug, Clone)]
pub struct PublishContext {
    pub account_id: AccountId,
    /// None for manual uploads
    pub job_id: Option<JobId>,
    pub media_type: MediaType,
}

/// A published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedMedia {
    pub url: String,
    pub media_type: MediaType,
    pub mime_type: String,
}

/// Artifact publisher trait
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Publish an artifact and return its URL. Must be idempotent for the same
    /// bytes or locator.
    async fn publish(
        &self,
        artifact: &Artifact,
        context: &PublishContext,
    ) -> Result<PublishedMedia, PublishError>;
}

/// Publisher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Directory holding published files
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// URL prefix under which `root` is served
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Public prefix replacing `gs://` in storage locators
    #[serde(default = "default_storage_public_base")]
    pub storage_public_base: String,

    /// Only accept storage locators from this bucket
    #[serde(default)]
    pub storage_bucket: Option<String>,

    /// Secret for signed URLs; unsigned permanent URLs when absent
    #[serde(default)]
    pub signing_secret: Option<String>,

    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/media".to_string()
}

fn default_storage_public_base() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_signed_url_ttl_secs() -> u64 {
    3600
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            root: None,
            base_url: default_base_url(),
            storage_public_base: default_storage_public_base(),
            storage_bucket: None,
            signing_secret: None,
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
        }
    }
}

/// Signs and verifies time-limited URLs with a blake3 keyed hash
#[derive(Clone)]
pub struct UrlSigner {
    key: [u8; 32],
    ttl: Duration,
}

impl UrlSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            key: blake3::derive_key("mediamgr 2024 signed media urls", secret.as_bytes()),
            ttl,
        }
    }

    fn signature(&self, path: &str, expires: u64) -> String {
        let message = format!("{}\n{}", path, expires);
        hex::encode(blake3::keyed_hash(&self.key, message.as_bytes()).as_bytes())
    }

    /// Append `expires` and `signature` query parameters
    pub fn sign(&self, url: &str, now_unix: u64) -> String {
        let expires = now_unix + self.ttl.as_secs();
        let separator = if url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}expires={}&signature={}",
            url,
            separator,
            expires,
            self.signature(url, expires)
        )
    }

    /// Check a signed URL against the clock
    pub fn verify(&self, signed_url: &str, now_unix: u64) -> bool {
        let Some((url, query)) = signed_url.rsplit_once("?expires=") else {
            return false;
        };
        let Some((expires, signature)) = query.split_once("&signature=") else {
            return false;
        };
        let Ok(expires) = expires.parse::<u64>() else {
            return false;
        };
        if expires < now_unix {
            return false;
        }
        let expected = self.signature(url, expires);
        // Compare through blake3::Hash for a constant-time check
        match (hex_to_hash(&expected), hex_to_hash(signature)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

fn hex_to_hash(value: &str) -> Option<blake3::Hash> {
    let bytes = hex::decode(value).ok()?;
    let array: [u8; 32] = bytes.try_into().ok()?;
    Some(blake3::Hash::from(array))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// File extension for a MIME type
fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "bin",
    }
}

/// Guess a MIME type from a locator's file extension
fn mime_from_locator(uri: &str, media_type: MediaType) -> String {
    let ext = uri
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match (ext.as_deref(), media_type) {
        (Some("png"), _) => "image/png".to_string(),
        (Some("jpg") | Some("jpeg"), _) => "image/jpeg".to_string(),
        (Some("webp"), _) => "image/webp".to_string(),
        (Some("gif"), _) => "image/gif".to_string(),
        (Some("webm"), _) => "video/webm".to_string(),
        (Some("mov"), _) => "video/quicktime".to_string(),
        (_, MediaType::Video) => "video/mp4".to_string(),
        (_, MediaType::Image) => "image/png".to_string(),
    }
}

/// Content-addressed file publisher
///
/// Bytes are written to `{root}/{hash[0..2]}/{hash}.{ext}` where `hash` is the
/// blake3 digest of the content, and served from `{base_url}/{hash[0..2]}/...`.
pub struct LocalPublisher {
    root: PathBuf,
    base_url: String,
    storage_public_base: String,
    storage_bucket: Option<String>,
    signer: Option<UrlSigner>,
}

impl LocalPublisher {
    pub fn new<P: AsRef<Path>>(root: P, base_url: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            storage_public_base: default_storage_public_base(),
            storage_bucket: None,
            signer: None,
        }
    }

    /// Build from configuration, using `default_root` when none is configured
    pub fn from_config(config: &PublisherConfig, default_root: &Path) -> Self {
        let root = config.root.clone().unwrap_or_else(|| default_root.to_path_buf());
        let mut publisher = Self::new(root, config.base_url.clone())
            .with_storage_public_base(config.storage_public_base.clone());
        publisher.storage_bucket = config.storage_bucket.clone();
        if let Some(secret) = &config.signing_secret {
            publisher = publisher.with_signer(UrlSigner::new(
                secret,
                Duration::from_secs(config.signed_url_ttl_secs),
            ));
        }
        publisher
    }

    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_storage_public_base(mut self, base: impl Into<String>) -> Self {
        self.storage_public_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_storage_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.storage_bucket = Some(bucket.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative object path for some bytes
    fn object_name(data: &[u8], mime_type: &str) -> String {
        let hash = blake3::hash(data).to_hex();
        format!("{}/{}.{}", &hash[..2], hash, extension_for(mime_type))
    }

    async fn store_bytes(&self, data: &[u8], mime_type: &str) -> Result<String, PublishError> {
        let object = Self::object_name(data, mime_type);
        let path = self.root.join(&object);

        if tokio::fs::try_exists(&path).await? {
            debug!(object = %object, "Object already published");
            return Ok(object);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Concurrent publishes of the same bytes each stage their own temp file
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&temp_path, data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(PublishError::IoError(e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!(object = %object, "Object published concurrently");
                return Ok(object);
            }
            return Err(PublishError::IoError(e));
        }
        Ok(object)
    }

    /// Map a storage locator to its public URL
    pub fn rewrite_locator(&self, uri: &str) -> Result<String, PublishError> {
        if uri.starts_with("https://") || uri.starts_with("http://") {
            return Ok(uri.to_string());
        }
        let Some(rest) = uri.strip_prefix("gs://") else {
            return Err(PublishError::UnsupportedLocator(uri.to_string()));
        };
        let (bucket, object) = rest
            .split_once('/')
            .filter(|(bucket, object)| !bucket.is_empty() && !object.is_empty())
            .ok_or_else(|| PublishError::UnsupportedLocator(uri.to_string()))?;
        if let Some(expected) = &self.storage_bucket {
            if bucket != expected {
                return Err(PublishError::UnsupportedLocator(uri.to_string()));
            }
        }
        Ok(format!("{}/{}/{}", self.storage_public_base, bucket, object))
    }

    /// Verify a URL this publisher signed
    pub fn verify(&self, url: &str) -> bool {
        match &self.signer {
            Some(signer) => signer.verify(url, unix_now()),
            None => true,
        }
    }
}

#[async_trait]
impl ArtifactPublisher for LocalPublisher {
    async fn publish(
        &self,
        artifact: &Artifact,
        context: &PublishContext,
    ) -> Result<PublishedMedia, PublishError> {
        match artifact {
            Artifact::Text(_) => Err(PublishError::NothingToPublish(
                "text results have no media".to_string(),
            )),
            Artifact::Bytes { data, mime_type } => {
                if data.is_empty() {
                    return Err(PublishError::NothingToPublish("empty media".to_string()));
                }
                let object = self.store_bytes(data, mime_type).await?;
                let url = format!("{}/{}", self.base_url, object);
                let url = match &self.signer {
                    Some(signer) => signer.sign(&url, unix_now()),
                    None => url,
                };
                debug!(
                    account_id = %context.account_id,
                    media_type = %context.media_type,
                    url = %url,
                    "Published media bytes"
                );
                Ok(PublishedMedia {
                    url,
                    media_type: context.media_type,
                    mime_type: mime_type.clone(),
                })
            }
            Artifact::Locator { uri, mime_type } => {
                let url = self.rewrite_locator(uri)?;
                let mime_type = mime_type
                    .clone()
                    .unwrap_or_else(|| mime_from_locator(uri, context.media_type));
                Ok(PublishedMedia {
                    url,
                    media_type: context.media_type,
                    mime_type,
                })
            }
        }
    }
}
