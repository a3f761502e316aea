// In-process object store
//
// Holds objects in a map. Used by the test suites as a stand-in for S3 and
// counts calls so tests can assert which operations reached the store.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{ObjectStore, StoreError};

/// Map-backed `ObjectStore`
#[derive(Debug, Default)]
pub struct MemoryStore {
    bucket: String,
    objects: RwLock<HashMap<String, Bytes>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Seed an object without counting it as a PUT
    pub async fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.objects.write().await.insert(key.into(), body.into());
    }

    /// Current object at `key`, bypassing call accounting
    pub async fn peek(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn head_bucket(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::new("test-bucket");
        store.put("ac/abc", Bytes::from_static(b"payload")).await.unwrap();

        assert_eq!(store.get("ac/abc").await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.get_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = MemoryStore::new("test-bucket");
        match store.get("cas/missing").await {
            Err(StoreError::NotFound(key)) => assert_eq!(key, "cas/missing"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_is_not_counted() {
        let store = MemoryStore::new("test-bucket");
        store.insert("k", "v").await;

        assert_eq!(store.put_count(), 0);
        assert_eq!(store.peek("k").await, Some(Bytes::from_static(b"v")));
        assert_eq!(store.bucket(), "test-bucket");
    }
}
