//! # Blob Storage
//!
//! Named byte streams for run inputs and outputs. The state machine only ever
//! holds the key/URL a blob was stored under.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    #[error("Blob storage unavailable: {reason}")]
    Unavailable { reason: String },
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Storage collaborator for run artifacts
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the URL the blob is reachable at
    async fn put(&self, key: &str, bytes: Vec<u8>) -> BlobResult<String>;

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>>;

    /// Whether `key` has been stored
    async fn exists(&self, key: &str) -> BlobResult<bool>;
}

/// Process-local blob store, URLs use the `memory://` scheme
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    pub const URL_SCHEME: &'static str = "memory://";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn url_for(key: &str) -> String {
        format!("{}{key}", Self::URL_SCHEME)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> BlobResult<String> {
        self.blobs.insert(key.to_string(), bytes);
        Ok(Self::url_for(key))
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        self.blobs
            .get(key)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        Ok(self.blobs.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryBlobStore::new();
        let url = store.put("p/r/inputs/a.csv", b"a,b\n1,2\n".to_vec()).await.unwrap();

        assert_eq!(url, "memory://p/r/inputs/a.csv");
        assert!(store.exists("p/r/inputs/a.csv").await.unwrap());
        assert_eq!(store.get("p/r/inputs/a.csv").await.unwrap(), b"a,b\n1,2\n".to_vec());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = InMemoryBlobStore::new();
        assert!(store.is_empty());
        assert_eq!(
            store.get("missing").await.unwrap_err(),
            BlobError::NotFound {
                key: "missing".to_string()
            }
        );
    }
}
