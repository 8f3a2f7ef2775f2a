//! In-memory object client.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bloomstore_core::{BloomResult, StorageError};

use super::ObjectClient;

/// Object client backed by an ordered in-process map.
///
/// Contents are lost when the client is dropped. Intended for tests and for
/// single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryObjectClient {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectClient for InMemoryObjectClient {
    async fn put_object(&self, key: &str, data: Vec<u8>) -> BloomResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> BloomResult<Vec<u8>> {
        let objects = self.objects.read().map_err(|_| StorageError::LockPoisoned)?;
        objects.get(key).cloned().ok_or_else(|| {
            StorageError::ObjectNotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    async fn list(&self, prefix: &str) -> BloomResult<Vec<String>> {
        let objects = self.objects.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
