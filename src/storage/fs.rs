//! Filesystem object store.
//!
//! Layout under the store root:
//! - `<bucket>/<key>` holds the body
//! - `<bucket>/.metadata/<key>.json` holds the metadata map
//!
//! Bodies and sidecars are written to a temp file and renamed into place, so
//! readers never see a partial object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{check_metadata, validate_key, Metadata, ObjectStore, ObjectStoreError, StoredObject};

const METADATA_DIR: &str = ".metadata";

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    bucket: String,
    dir: PathBuf,
    max_metadata_bytes: usize,
}

impl FsObjectStore {
    /// Create the bucket directory if needed.
    pub async fn create(root: &Path, bucket: &str) -> Result<(), ObjectStoreError> {
        fs::create_dir_all(root.join(bucket).join(METADATA_DIR)).await?;
        Ok(())
    }

    /// Open an existing bucket.
    pub async fn open(
        root: &Path,
        bucket: &str,
        max_metadata_bytes: usize,
    ) -> Result<Self, ObjectStoreError> {
        let dir = root.join(bucket);
        if !fs::try_exists(&dir).await? {
            return Err(ObjectStoreError::MissingBucket(bucket.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            dir,
            max_metadata_bytes,
        })
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.dir.join(METADATA_DIR).join(format!("{}.json", key))
    }

    fn not_found(&self, key: &str) -> ObjectStoreError {
        ObjectStoreError::NotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    async fn read_metadata(&self, key: &str) -> Result<Metadata, ObjectStoreError> {
        match fs::read(self.metadata_path(key)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            // Objects written without metadata have no sidecar
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `data` to a sibling temp file, then rename it over `path`.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ObjectStoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| ObjectStoreError::InvalidKey(path.display().to_string()))?;
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.tmp-{}", file_name, Uuid::new_v4().simple()));

    let mut file = fs::File::create(&temp).await?;
    if let Err(e) = file.write_all(data).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    file.flush().await?;
    drop(file);

    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
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

        // Sidecar first: a visible body always has its metadata.
        write_atomic(&self.metadata_path(key), &serde_json::to_vec(&metadata)?).await?;
        write_atomic(&self.body_path(key), body).await
    }

    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        validate_key(key)?;
        let body = match fs::read(self.body_path(key)).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.not_found(key));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = self.read_metadata(key).await?;
        Ok(StoredObject { body, metadata })
    }

    async fn head(&self, key: &str) -> Result<Option<Metadata>, ObjectStoreError> {
        validate_key(key)?;
        if !fs::try_exists(self.body_path(key)).await? {
            return Ok(None);
        }
        Ok(Some(self.read_metadata(key).await?))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.dir.clone(), String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                // Skips the sidecar dir and in-flight temp files
                if name.starts_with('.') {
                    continue;
                }
                let key = format!("{}{}", key_prefix, name);
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), format!("{}/", key)));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool, ObjectStoreError> {
        validate_key(key)?;
        let existed = match fs::remove_file(self.body_path(key)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(self.metadata_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, FsObjectStore) {
        let dir = TempDir::new().unwrap();
        FsObjectStore::create(dir.path(), "text").await.unwrap();
        let store = FsObjectStore::open(dir.path(), "text", 64).await.unwrap();
        (dir, store)
    }

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let dir = TempDir::new().unwrap();
        let result = FsObjectStore::open(dir.path(), "nope", 64).await;
        assert!(matches!(result, Err(ObjectStoreError::MissingBucket(b)) if b == "nope"));
    }

    #[tokio::test]
    async fn test_put_get_head() {
        let (_dir, store) = setup().await;
        store
            .put("text/1.txt", b"hello", meta(&[("status", "public")]))
            .await
            .unwrap();

        let object = store.get("text/1.txt").await.unwrap();
        assert_eq!(object.body, b"hello");
        assert_eq!(object.metadata, meta(&[("status", "public")]));
        assert_eq!(
            store.head("text/1.txt").await.unwrap(),
            Some(meta(&[("status", "public")]))
        );
        assert!(store.exists("text/1.txt").await.unwrap());
        assert_eq!(store.head("text/2.txt").await.unwrap(), None);
        assert!(matches!(
            store.get("text/2.txt").await,
            Err(ObjectStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_replaces_metadata() {
        let (_dir, store) = setup().await;
        store
            .put("a", b"1", meta(&[("status", "failed")]))
            .await
            .unwrap();
        store.put("a", b"2", Metadata::new()).await.unwrap();

        let object = store.get("a").await.unwrap();
        assert_eq!(object.body, b"2");
        assert!(object.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_limit_enforced() {
        let (_dir, store) = setup().await;
        let big = "x".repeat(100);
        let result = store.put("a", b"1", meta(&[("k", &big)])).await;
        assert!(matches!(
            result,
            Err(ObjectStoreError::MetadataTooLarge { size: 101, limit: 64 })
        ));
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let (_dir, store) = setup().await;
        for key in ["text/2.txt", "text/1.txt", "meta/1.json", "1/page-1.jpg"] {
            store.put(key, b"x", Metadata::new()).await.unwrap();
        }

        assert_eq!(
            store.list("text/").await.unwrap(),
            vec!["text/1.txt".to_string(), "text/2.txt".to_string()]
        );
        assert_eq!(store.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = setup().await;
        store
            .put("text/1.txt", b"x", meta(&[("a", "b")]))
            .await
            .unwrap();

        assert!(store.delete("text/1.txt").await.unwrap());
        assert!(!store.delete("text/1.txt").await.unwrap());
        assert!(store.list("").await.unwrap().is_empty());
    }
}
