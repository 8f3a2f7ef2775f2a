//! BLOOMSTORE Test Utilities
//!
//! Shared test infrastructure for the bloom store workspace:
//! - Proptest generators for bounds, intervals and refs
//! - A counting object client for asserting storage traffic
//! - Fixtures that build a two-period store and seed it with metas/blocks
//! - Assertions for error messages

pub use bloomstore_core::{
    BlockRef, BloomResult, BloomStoreError, FingerprintBounds, Interval, Meta, MetaRef,
    MetaSearchParams, PeriodConfig, Ref, Timestamp,
};
pub use bloomstore_storage::{BloomStore, ObjectClient};

// ============================================================================
// OBJECT CLIENT DOUBLES
// ============================================================================

pub mod doubles {
    //! Object client wrappers that record traffic.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bloomstore_core::{BloomResult, PeriodConfig, StorageConfig};
    use bloomstore_storage::{InMemoryObjectClient, ObjectClient, ObjectClientFactory};

    /// In-memory client counting every call.
    #[derive(Debug, Default)]
    pub struct CountingObjectClient {
        inner: InMemoryObjectClient,
        gets: AtomicUsize,
        puts: AtomicUsize,
        lists: AtomicUsize,
    }

    impl CountingObjectClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        pub fn puts(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        pub fn lists(&self) -> usize {
            self.lists.load(Ordering::SeqCst)
        }

        pub fn reset(&self) {
            self.gets.store(0, Ordering::SeqCst);
            self.puts.store(0, Ordering::SeqCst);
            self.lists.store(0, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ObjectClient for CountingObjectClient {
        async fn put_object(&self, key: &str, data: Vec<u8>) -> BloomResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put_object(key, data).await
        }

        async fn get_object(&self, key: &str) -> BloomResult<Vec<u8>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_object(key).await
        }

        async fn list(&self, prefix: &str) -> BloomResult<Vec<String>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list(prefix).await
        }
    }

    /// Factory handing out one counting client per period, keeping handles
    /// so tests can inspect them after the store is built.
    #[derive(Debug, Default)]
    pub struct CountingClientFactory {
        clients: Mutex<Vec<Arc<CountingObjectClient>>>,
    }

    impl CountingClientFactory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Clients in period order.
        pub fn clients(&self) -> Vec<Arc<CountingObjectClient>> {
            self.clients.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Sum of `get_object` calls across every period.
        pub fn total_gets(&self) -> usize {
            self.clients().iter().map(|c| c.gets()).sum()
        }

        pub fn reset(&self) {
            for client in self.clients() {
                client.reset();
            }
        }
    }

    impl ObjectClientFactory for CountingClientFactory {
        fn create(
            &self,
            _period: &PeriodConfig,
            _storage: &StorageConfig,
        ) -> BloomResult<Arc<dyn ObjectClient>> {
            let client = Arc::new(CountingObjectClient::new());
            if let Ok(mut clients) = self.clients.lock() {
                clients.push(client.clone());
            }
            Ok(client)
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for bloom store value types.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    /// Generate valid bounds (`min <= max`).
    pub fn arb_bounds() -> impl Strategy<Value = FingerprintBounds> {
        (any::<u64>(), any::<u64>()).prop_map(|(a, b)| FingerprintBounds::new(a.min(b), a.max(b)))
    }

    /// Generate a millisecond-precision timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800_000i64..1_893_456_000_000i64)
            .prop_map(|ms| DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default())
    }

    /// Generate a possibly empty interval up to a week long.
    pub fn arb_interval() -> impl Strategy<Value = Interval> {
        (arb_timestamp(), 0i64..7 * 86_400_000).prop_map(|(start, len)| {
            Interval::new(start, start + chrono::Duration::milliseconds(len))
        })
    }

    /// Generate a tenant id usable as a key segment.
    pub fn arb_tenant() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    /// Generate a ref bound to a table.
    pub fn arb_ref() -> impl Strategy<Value = Ref> {
        (arb_tenant(), "[a-z_]{1,8}[0-9]{1,6}", arb_bounds(), arb_interval()).prop_map(
            |(tenant, table, bounds, interval)| {
                Ref::new(tenant, bounds, interval.start, interval.end).with_table(table)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and seeded content for scenario tests.

    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
    use prometheus::Registry;
    use tempfile::TempDir;

    use super::doubles::CountingClientFactory;
    use super::*;
    use bloomstore_core::{
        BloomShipperConfig, CacheConfig, DownloadingQueueConfig, ObjectType, StorageConfig,
    };
    use bloomstore_storage::{
        new_blocks_cache, new_metas_cache, pack_files, BLOOM_FILE_NAME, SERIES_FILE_NAME,
    };

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Length of seeded metas and blocks.
    pub const ARTIFACT_SPAN_HOURS: i64 = 12;

    /// Parse `YYYY-MM-DD` as midnight UTC.
    pub fn parse_day_time(s: &str) -> Timestamp {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .unwrap_or_else(|e| panic!("bad date {s:?}: {e}"));
        Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
    }

    /// Parse `YYYY-MM-DD HH:MM` as UTC.
    pub fn parse_time(s: &str) -> Timestamp {
        let t = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
            .unwrap_or_else(|e| panic!("bad time {s:?}: {e}"));
        Utc.from_utc_datetime(&t)
    }

    /// Two in-memory periods with daily tables: `schema_a_table_` from
    /// 2024-01-01 and `schema_b_table_` from 2024-02-01.
    pub fn two_period_configs() -> Vec<PeriodConfig> {
        vec![
            PeriodConfig::new(
                parse_day_time("2024-01-01").date_naive(),
                ObjectType::InMemory,
                "schema_a_table_",
                DAY,
            ),
            PeriodConfig::new(
                parse_day_time("2024-02-01").date_naive(),
                ObjectType::InMemory,
                "schema_b_table_",
                DAY,
            ),
        ]
    }

    /// One download worker, blocks cache of 1000 items for an hour.
    pub fn test_storage_config(working_dir: &Path) -> StorageConfig {
        let mut shipper = BloomShipperConfig::new(working_dir);
        shipper.blocks_downloading_queue = DownloadingQueueConfig::new().with_workers(1);
        shipper.blocks_cache = CacheConfig::new()
            .with_max_items(1000)
            .with_ttl(Duration::from_secs(3600));
        StorageConfig::new(shipper)
    }

    /// A store over counting clients, plus handles for inspection.
    pub struct TestStore {
        pub store: BloomStore,
        pub clients: Arc<CountingClientFactory>,
        pub registry: Registry,
    }

    /// Build the two-period store with its working directory at `working_dir`.
    pub fn new_test_store(working_dir: &Path) -> BloomResult<TestStore> {
        new_test_store_with(test_storage_config(working_dir))
    }

    /// Build the two-period store over custom storage settings.
    pub fn new_test_store_with(storage: StorageConfig) -> BloomResult<TestStore> {
        let registry = Registry::new();
        let clients = Arc::new(CountingClientFactory::new());
        let shipper = &storage.bloom_shipper;
        let store = BloomStore::with_client_factory(
            two_period_configs(),
            &storage,
            &registry,
            Arc::new(new_metas_cache(shipper.metas_cache.clone())),
            Arc::new(new_blocks_cache(shipper.blocks_cache.clone())),
            clients.as_ref(),
        )?;
        Ok(TestStore {
            store,
            clients,
            registry,
        })
    }

    /// Build the two-period store over a fresh temporary working directory.
    ///
    /// Keep the returned `TempDir` alive for as long as the store.
    pub fn new_temp_store() -> BloomResult<(TempDir, TestStore)> {
        let wd = TempDir::new().map_err(|e| bloomstore_core::StorageError::LocalIo {
            path: "tempdir".to_string(),
            reason: e.to_string(),
        })?;
        let store = new_test_store(wd.path())?;
        Ok((wd, store))
    }

    fn artifact_ref(tenant: &str, start: Timestamp, min: u64, max: u64) -> Ref {
        Ref::new(
            tenant,
            FingerprintBounds::new(min, max),
            start,
            start + chrono::Duration::hours(ARTIFACT_SPAN_HOURS),
        )
    }

    /// Write a meta with no blocks covering `[start, start + 12h)`.
    pub async fn create_meta_in_storage(
        store: &BloomStore,
        tenant: &str,
        start: Timestamp,
        min: u64,
        max: u64,
    ) -> BloomResult<Meta> {
        let meta = Meta::new(artifact_ref(tenant, start, min, max).into(), Vec::new());
        let meta_ref = store.put_meta(&meta).await?;
        Ok(Meta::new(meta_ref, Vec::new()))
    }

    /// Write a block archive with small bloom and series files.
    pub async fn create_block_in_storage(
        store: &BloomStore,
        tenant: &str,
        start: Timestamp,
        min: u64,
        max: u64,
    ) -> BloomResult<BlockRef> {
        let block_ref: BlockRef = artifact_ref(tenant, start, min, max).into();
        let bloom = format!("bloom {min:016x}-{max:016x}");
        let series = format!("series {tenant}");
        let archive = pack_files(&[
            (BLOOM_FILE_NAME, bloom.as_bytes()),
            (SERIES_FILE_NAME, series.as_bytes()),
        ])?;
        store.put_block(&block_ref, archive).await
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for bloom store results.

    use std::path::{Path, PathBuf};

    use super::*;

    fn collect_staging_dirs(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with(".extract-") {
                out.push(path);
            } else if path.is_dir() {
                collect_staging_dirs(&path, out);
            }
        }
    }

    /// Assert that no block extraction left a staging directory under `root`.
    #[track_caller]
    pub fn assert_no_staging_dirs(root: &Path) {
        let mut found = Vec::new();
        collect_staging_dirs(root, &mut found);
        assert!(found.is_empty(), "Leftover staging directories: {found:?}");
    }

    /// Assert that a result is an error whose message contains `needle`.
    #[track_caller]
    pub fn assert_err_contains<T>(result: &BloomResult<T>, needle: &str) {
        match result {
            Err(e) => assert!(
                e.to_string().contains(needle),
                "Expected error containing {needle:?}, got: {e}"
            ),
            Ok(_) => panic!("Expected error containing {needle:?}, got Ok"),
        }
    }
}
