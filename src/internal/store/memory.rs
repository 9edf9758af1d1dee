//! In-memory key/value backend, used by tests and by repositories configured
//! without durable storage.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::errors::DogmaError;
use crate::internal::store::KvStore;

/// A process-memory [`KvStore`] over a concurrent map.
#[derive(Default, Debug)]
pub struct MemKvStore {
    map: DashMap<Vec<u8>, Bytes>,
}

impl MemKvStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DogmaError> {
        self.map
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, DogmaError> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    async fn contains(&self, key: &[u8]) -> Result<bool, DogmaError> {
        Ok(self.map.contains_key(key))
    }

    async fn remove(&self, key: &[u8]) -> Result<(), DogmaError> {
        self.map.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, DogmaError> {
        Ok(self
            .map
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}
