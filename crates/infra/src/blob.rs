//! Blob storage for logos and product images.
//!
//! Uploads happen before the database transaction opens. A failed upload never rolls
//! back catalog data; callers turn it into a warning.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid upload: {0}")]
    Invalid(String),
}

/// One file to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub folder: String,
    pub tags: Vec<String>,
}

impl Upload {
    pub fn new(folder: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            folder: folder.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Stores a file and returns its public URL.
#[async_trait::async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(&self, upload: Upload) -> Result<String, BlobError>;
}

/// In-memory blob storage (tests/dev).
#[derive(Debug)]
pub struct InMemoryBlobStorage {
    base_url: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl Default for InMemoryBlobStorage {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

impl InMemoryBlobStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make uploads fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn upload(&self, upload: Upload) -> Result<String, BlobError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("in-memory blob storage switched off".into()));
        }
        if upload.file_name.trim().is_empty() {
            return Err(BlobError::Invalid("file name is empty".into()));
        }
        let path = format!("{}/{}", upload.folder.trim_matches('/'), upload.file_name.trim());
        let mut objects = self
            .objects
            .write()
            .map_err(|_| BlobError::Unavailable("blob index poisoned".into()))?;
        objects.insert(path.clone(), upload.bytes);
        Ok(format!("{}/{}", self.base_url, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_returns_url_under_folder() {
        let blobs = InMemoryBlobStorage::default();
        let url = blobs
            .upload(Upload::new("brands/", "maggi.png", vec![1, 2, 3]).with_tags(["brand"]))
            .await
            .unwrap();
        assert_eq!(url, "memory://blobs/brands/maggi.png");
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_storage_fails_uploads() {
        let blobs = InMemoryBlobStorage::default();
        blobs.set_unavailable(true);
        let err = blobs.upload(Upload::new("products", "a.png", vec![])).await.unwrap_err();
        assert!(matches!(err, BlobError::Unavailable(_)));
        assert!(blobs.is_empty());
    }
}
