//! Object storage clients.
//!
//! Every schema period owns one [`ObjectClient`]. The store only needs
//! put/get/list; listing returns keys sorted by byte order, which is the
//! order refs come back from resolution.

pub mod filesystem;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bloomstore_core::{BloomResult, ConfigError, ObjectType, PeriodConfig, StorageConfig};

pub use filesystem::FilesystemObjectClient;
pub use memory::InMemoryObjectClient;

/// Object storage backend for one schema period.
///
/// Implementations must be safe to share across tasks. Reads after writes
/// within one process are expected to observe the write.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Store `data` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, data: Vec<u8>) -> BloomResult<()>;

    /// Read the object at `key`.
    ///
    /// Missing objects yield `StorageError::ObjectNotFound`.
    async fn get_object(&self, key: &str) -> BloomResult<Vec<u8>>;

    /// List every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> BloomResult<Vec<String>>;
}

/// Builds the object client for a schema period.
pub trait ObjectClientFactory: Send + Sync {
    fn create(
        &self,
        period: &PeriodConfig,
        storage: &StorageConfig,
    ) -> BloomResult<Arc<dyn ObjectClient>>;
}

/// Factory for the backends shipped with this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultObjectClientFactory;

impl ObjectClientFactory for DefaultObjectClientFactory {
    fn create(
        &self,
        period: &PeriodConfig,
        storage: &StorageConfig,
    ) -> BloomResult<Arc<dyn ObjectClient>> {
        match period.object_type {
            ObjectType::InMemory => Ok(Arc::new(InMemoryObjectClient::new())),
            ObjectType::Filesystem => {
                let fs = storage.filesystem.as_ref().ok_or_else(|| ConfigError::MissingRequired {
                    field: "storage.filesystem.directory".to_string(),
                })?;
                Ok(Arc::new(FilesystemObjectClient::new(&fs.directory)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloomstore_core::{BloomShipperConfig, BloomStoreError};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn period(object_type: ObjectType) -> PeriodConfig {
        PeriodConfig::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            object_type,
            "a_",
            Duration::from_secs(86_400),
        )
    }

    #[test]
    fn test_factory_requires_filesystem_section() {
        let storage = StorageConfig::new(BloomShipperConfig::new("/tmp/wd"));
        let err = DefaultObjectClientFactory
            .create(&period(ObjectType::Filesystem), &storage)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BloomStoreError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_factory_builds_in_memory_client() {
        let storage = StorageConfig::new(BloomShipperConfig::new("/tmp/wd"));
        assert!(DefaultObjectClientFactory
            .create(&period(ObjectType::InMemory), &storage)
            .is_ok());
    }
}
