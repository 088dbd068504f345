//! Object storage behind the upload relay.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Directory under the storage root that holds metadata sidecars.
const META_DIR: &str = ".meta";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub content_type: String,
    /// Free-form key/value pairs stored alongside the object.
    pub custom: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: usize,
    /// Hex SHA-256 of the body.
    pub etag: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn put(&self, key: &str, body: Bytes, metadata: ObjectMetadata) -> Result<StoredObject, AppError>;

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMetadata)>, AppError>;
}

/// Reject keys that could escape the storage root or collide with sidecars.
pub fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() {
        return Err(AppError::Validation("Object path must not be empty".into()));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(AppError::Validation(format!("Unsafe object path '{key}'")));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(AppError::Validation(format!("Unsafe object path '{key}'")));
        }
    }
    if key.split('/').next() == Some(META_DIR) {
        return Err(AppError::Validation(format!("Reserved object path '{key}'")));
    }
    Ok(())
}

fn etag(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Filesystem
// ============================================================================

/// Stores objects as plain files under `root`, metadata as JSON sidecars.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{key}.json"))
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn put(&self, key: &str, body: Bytes, metadata: ObjectMetadata) -> Result<StoredObject, AppError> {
        validate_key(key)?;
        let meta = serde_json::to_vec_pretty(&metadata)?;

        write_file(&self.object_path(key), &body)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write object '{key}': {e}")))?;
        write_file(&self.meta_path(key), &meta)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write metadata for '{key}': {e}")))?;

        Ok(StoredObject {
            key: key.to_string(),
            size: body.len(),
            etag: etag(&body),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMetadata)>, AppError> {
        validate_key(key)?;
        let body = match tokio::fs::read(self.object_path(key)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta = tokio::fs::read(self.meta_path(key)).await?;
        let metadata: ObjectMetadata = serde_json::from_slice(&meta)?;
        Ok(Some((Bytes::from(body), metadata)))
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Bytes, ObjectMetadata)>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, body: Bytes, metadata: ObjectMetadata) -> Result<StoredObject, AppError> {
        validate_key(key)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AppError::Storage("injected put failure".into()));
        }
        let stored = StoredObject {
            key: key.to_string(),
            size: body.len(),
            etag: etag(&body),
        };
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (body, metadata));
        Ok(stored)
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMetadata)>, AppError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ObjectMetadata {
        ObjectMetadata {
            content_type: "image/png".into(),
            custom: BTreeMap::from([("originalName".to_string(), "a.png".to_string())]),
        }
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("personas/p1/main.jpg").is_ok());
        for bad in ["", "/etc/passwd", "a/../b", "..", "a\\b", "a//b", "./a", ".meta/x"] {
            assert!(
                matches!(validate_key(bad), Err(AppError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_fs_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let stored = store
            .put("personas/p1/main.png", Bytes::from_static(b"\x89PNG"), meta())
            .await
            .unwrap();
        assert_eq!(stored.size, 4);
        assert_eq!(stored.etag.len(), 64);
        assert!(dir.path().join("personas/p1/main.png").is_file());

        let (body, metadata) = store.get("personas/p1/main.png").await.unwrap().unwrap();
        assert_eq!(&body[..], b"\x89PNG");
        assert_eq!(metadata, meta());
        assert!(store.get("personas/none.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("objects"));
        let err = store
            .put("../escape.txt", Bytes::from_static(b"x"), meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryObjectStore::new();
        store.fail_puts(true);
        assert!(matches!(
            store.put("a.jpg", Bytes::new(), meta()).await,
            Err(AppError::Storage(_))
        ));
        store.fail_puts(false);
        store.put("a.jpg", Bytes::new(), meta()).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
