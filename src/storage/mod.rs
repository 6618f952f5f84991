//! Object storage for text artifacts and page images.
//!
//! A store is one bucket: keys map to a body plus a small string map of
//! inline metadata. Metadata size is capped per object, mirroring the limits
//! of hosted object stores; callers that may exceed it must fall back to a
//! separate metadata object (see `pipeline::artifact`).

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Settings;

/// Inline object metadata. Ordered so sidecars serialize deterministically.
pub type Metadata = BTreeMap<String, String>;

/// Metadata cap used when none is configured.
pub const DEFAULT_MAX_METADATA_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("Bucket {0} does not exist. Please create it (filingtext init)")]
    MissingBucket(String),
    #[error("Metadata too large: {size} bytes (limit {limit})")]
    MetadataTooLarge { size: usize, limit: usize },
    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A fetched object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: Metadata,
}

/// Size of a metadata map as hosted stores count it: key plus value bytes.
pub fn metadata_size(metadata: &Metadata) -> usize {
    metadata.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Reject metadata over `limit` bytes.
pub fn check_metadata(metadata: &Metadata, limit: usize) -> Result<(), ObjectStoreError> {
    let size = metadata_size(metadata);
    if size > limit {
        return Err(ObjectStoreError::MetadataTooLarge { size, limit });
    }
    Ok(())
}

/// Reject keys that could escape the bucket or collide with internal files.
pub(crate) fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == ".." || part.starts_with('.'));
    if bad {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// One bucket of an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Write an object, replacing any existing one with the same key.
    async fn put(&self, key: &str, body: &[u8], metadata: Metadata)
        -> Result<(), ObjectStoreError>;

    /// Fetch body and metadata.
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError>;

    /// Fetch only the metadata, `None` if the object does not exist.
    async fn head(&self, key: &str) -> Result<Option<Metadata>, ObjectStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.head(key).await?.is_some())
    }

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    /// Remove an object. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, ObjectStoreError>;
}

/// The text and image buckets named by the settings.
#[derive(Clone)]
pub struct BucketSet {
    pub text: Arc<dyn ObjectStore>,
    pub images: Arc<dyn ObjectStore>,
}

impl BucketSet {
    /// Open both buckets. A missing bucket is a configuration error.
    pub async fn open(settings: &Settings) -> Result<Self, ObjectStoreError> {
        let root = &settings.object_store_dir;
        let limit = settings.max_metadata_bytes;
        let text: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::open(root, &settings.text_bucket, limit).await?);
        let images: Arc<dyn ObjectStore> = if settings.image_bucket() == settings.text_bucket {
            text.clone()
        } else {
            Arc::new(FsObjectStore::open(root, settings.image_bucket(), limit).await?)
        };
        Ok(Self { text, images })
    }

    /// Create both buckets if missing.
    pub async fn create(settings: &Settings) -> Result<(), ObjectStoreError> {
        FsObjectStore::create(&settings.object_store_dir, &settings.text_bucket).await?;
        FsObjectStore::create(&settings.object_store_dir, settings.image_bucket()).await
    }
}
