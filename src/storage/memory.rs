//! In-memory object store for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    check_metadata, validate_key, Metadata, ObjectStore, ObjectStoreError, StoredObject,
    DEFAULT_MAX_METADATA_BYTES,
};

pub struct MemoryObjectStore {
    bucket: String,
    max_metadata_bytes: usize,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self::with_metadata_limit(bucket, DEFAULT_MAX_METADATA_BYTES)
    }

    pub fn with_metadata_limit(bucket: &str, max_metadata_bytes: usize) -> Self {
        Self {
            bucket: bucket.to_string(),
            max_metadata_bytes,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(
        &self,
        key: &str,
        body: &[u8],
        metadata: Metadata,
    ) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        check_metadata(&metadata, self.max_metadata_bytes)?;
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })
    }

    async fn head(&self, key: &str) -> Result<Option<Metadata>, ObjectStoreError> {
        Ok(self
            .objects
            .read()
            .await
            .get(key)
            .map(|o| o.metadata.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.objects.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_stops_at_prefix_boundary() {
        let store = MemoryObjectStore::new("text");
        for key in ["meta/1.json", "text/1.txt", "text/2.txt", "tz"] {
            store.put(key, b"x", Metadata::new()).await.unwrap();
        }

        assert_eq!(
            store.list("text/").await.unwrap(),
            vec!["text/1.txt".to_string(), "text/2.txt".to_string()]
        );
        assert_eq!(store.len().await, 4);
    }

    #[tokio::test]
    async fn test_metadata_limit() {
        let store = MemoryObjectStore::with_metadata_limit("text", 4);
        let mut meta = Metadata::new();
        meta.insert("ab".to_string(), "cde".to_string());

        assert!(matches!(
            store.put("k", b"", meta).await,
            Err(ObjectStoreError::MetadataTooLarge { size: 5, limit: 4 })
        ));
        assert!(store.is_empty().await);
    }
}
