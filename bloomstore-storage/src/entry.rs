//! One schema period: its start, object client, table scheme and fetcher.

use std::sync::Arc;

use bloomstore_core::{
    format_duration, table_for, tables_for_range, BlockRef, BloomResult, Interval, Meta, MetaRef,
    MetaSearchParams, PeriodConfig, Ref, RefError, StorageError, Timestamp,
};
use tracing::debug;

use crate::client::ObjectClient;
use crate::fetcher::Fetcher;
use crate::resolver::KeyResolver;

/// A schema period bound to its storage.
///
/// The entry owns `[start, next entry's start)`; the store decides which
/// entry a time or interval belongs to.
#[derive(Clone)]
pub struct StoreEntry {
    period: PeriodConfig,
    /// Start of the next period, if any.
    until: Option<Timestamp>,
    client: Arc<dyn ObjectClient>,
    resolver: KeyResolver,
    fetcher: Fetcher,
}

impl StoreEntry {
    pub fn new(period: PeriodConfig, client: Arc<dyn ObjectClient>, fetcher: Fetcher) -> Self {
        Self {
            period,
            until: None,
            client,
            resolver: KeyResolver::new(),
            fetcher,
        }
    }

    /// First instant owned by this entry.
    pub fn start(&self) -> Timestamp {
        self.period.start()
    }

    /// Close the entry's ownership at the next period's start.
    pub fn with_until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    /// The `[start, until)` range this entry owns; open-ended for the last entry.
    pub fn ownership(&self) -> (Timestamp, Option<Timestamp>) {
        (self.start(), self.until)
    }

    /// Whether any part of `interval` falls inside this entry's ownership.
    pub fn applies_to(&self, interval: &Interval) -> bool {
        if interval.is_empty() || interval.end <= self.start() {
            return false;
        }
        self.until.map_or(true, |until| interval.start < until)
    }

    pub fn config(&self) -> &PeriodConfig {
        &self.period
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn table_for(&self, t: Timestamp) -> String {
        table_for(&self.period, t)
    }

    pub fn tables_for_range(&self, interval: &Interval) -> Vec<String> {
        tables_for_range(&self.period, interval)
    }

    /// List the metas matching `params` within `interval`.
    ///
    /// `interval` is the part of the query this entry owns; refs are still
    /// filtered against the full query interval. Results follow table order
    /// and then key order.
    pub async fn resolve_metas(
        &self,
        params: &MetaSearchParams,
        interval: &Interval,
    ) -> BloomResult<Vec<MetaRef>> {
        let mut refs = Vec::new();
        for table in self.tables_for_range(interval) {
            let prefix = self.resolver.meta_prefix(&params.tenant_id, &table);
            let keys = self.client.list(&prefix).await?;
            debug!(prefix = %prefix, keys = keys.len(), "Listed metas");
            for key in keys {
                let meta_ref = self.resolver.parse_meta_key(&key)?;
                if params.matches(&meta_ref) {
                    refs.push(meta_ref);
                }
            }
        }
        Ok(refs)
    }

    /// Artifacts may not outlast one table period, which bounds how far back
    /// listing has to look.
    fn check_span(&self, r: &Ref) -> Result<(), RefError> {
        let period = self.period.index_tables.period;
        let span = (r.end_timestamp - r.start_timestamp)
            .to_std()
            .unwrap_or_default();
        if span > period {
            return Err(RefError::SpanExceedsTable {
                tenant_id: r.tenant_id.clone(),
                span: format_duration(span),
                period: format_duration(period),
            });
        }
        Ok(())
    }

    /// Upload a meta, binding it to the table holding its start time.
    ///
    /// Block refs inside the meta are stored as given.
    pub async fn put_meta(&self, meta: &Meta) -> BloomResult<MetaRef> {
        self.check_span(&meta.meta_ref)?;
        let meta_ref: MetaRef = meta
            .meta_ref
            .0
            .clone()
            .with_table(self.table_for(meta.meta_ref.start_timestamp))
            .into();
        let stored = Meta::new(meta_ref.clone(), meta.blocks.clone());
        let key = self.resolver.meta_key(&meta_ref)?;
        let body = stored.to_json().map_err(|e| StorageError::PutFailed {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.client.put_object(&key, body).await?;
        debug!(key = %key, "Stored meta");
        Ok(meta_ref)
    }

    /// Upload a block archive, binding the ref to the table holding its start time.
    pub async fn put_block(&self, block_ref: &BlockRef, archive: Vec<u8>) -> BloomResult<BlockRef> {
        self.check_span(block_ref)?;
        let bound: BlockRef = block_ref
            .0
            .clone()
            .with_table(self.table_for(block_ref.start_timestamp))
            .into();
        let key = self.resolver.block_key(&bound)?;
        self.client.put_object(&key, archive).await?;
        debug!(key = %key, "Stored block");
        Ok(bound)
    }

    pub fn stop(&self) {
        self.fetcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{new_blocks_cache, new_metas_cache};
    use crate::client::InMemoryObjectClient;
    use crate::metrics::StoreMetrics;
    use bloomstore_core::{CacheConfig, DownloadingQueueConfig, FingerprintBounds, ObjectType, Ref};
    use chrono::{Datelike, NaiveDate, TimeZone, Utc};
    use prometheus::Registry;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(wd: &TempDir) -> StoreEntry {
        let period = PeriodConfig::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            ObjectType::InMemory,
            "schema_a_table_",
            Duration::from_secs(86_400),
        );
        let client: Arc<dyn ObjectClient> = Arc::new(InMemoryObjectClient::new());
        let fetcher = Fetcher::new(
            client.clone(),
            wd.path(),
            Arc::new(new_metas_cache(CacheConfig::default())),
            Arc::new(new_blocks_cache(CacheConfig::default())),
            &DownloadingQueueConfig::default().with_workers(1),
            StoreMetrics::new(&Registry::new()).unwrap(),
        )
        .unwrap();
        StoreEntry::new(period, client, fetcher)
    }

    fn meta_at(day: u32, hour: u32, min: u64, max: u64) -> Meta {
        let start = Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap();
        let r = Ref::new(
            "tenant",
            FingerprintBounds::new(min, max),
            start,
            start + chrono::Duration::hours(1),
        );
        Meta::new(r.into(), Vec::new())
    }

    #[tokio::test]
    async fn test_put_meta_binds_table() {
        let wd = TempDir::new().unwrap();
        let e = entry(&wd);
        let bound = e.put_meta(&meta_at(20, 0, 0, 0xffff)).await.unwrap();
        assert_eq!(bound.table_name, "schema_a_table_19742");
        assert_eq!(e.client().list("bloom/tenant/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_filters_bounds_interval_and_tenant() {
        let wd = TempDir::new().unwrap();
        let e = entry(&wd);
        let keep = e.put_meta(&meta_at(20, 0, 0, 0xffff)).await.unwrap();
        e.put_meta(&meta_at(20, 2, 0x10000, 0x1ffff)).await.unwrap();
        e.put_meta(&meta_at(22, 0, 0, 0xffff)).await.unwrap();

        let interval = Interval::new(
            Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 21, 0, 0, 0).unwrap(),
        );
        let params = MetaSearchParams::new("tenant", interval, FingerprintBounds::new(0, 0xffff));
        assert_eq!(e.resolve_metas(&params, &interval).await.unwrap(), vec![keep]);

        let other = MetaSearchParams::new("other", interval, FingerprintBounds::new(0, 0xffff));
        assert!(e.resolve_metas(&other, &interval).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_applies_to_ownership_range() {
        let wd = TempDir::new().unwrap();
        let day = |d: u32, m: u32| Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap();
        let e = entry(&wd).with_until(day(1, 2));
        assert_eq!(e.ownership(), (day(1, 1), Some(day(1, 2))));

        assert!(e.applies_to(&Interval::new(day(20, 1), day(10, 2))));
        assert!(e.applies_to(&Interval::new(day(1, 12).with_year(2023).unwrap(), day(2, 1))));
        assert!(!e.applies_to(&Interval::new(day(1, 2), day(5, 2))));
        assert!(!e.applies_to(&Interval::new(day(20, 1), day(20, 1))));

        let open = entry(&wd);
        assert!(open.applies_to(&Interval::new(day(1, 6), day(2, 6))));
    }

    #[tokio::test]
    async fn test_put_rejects_span_longer_than_table() {
        let wd = TempDir::new().unwrap();
        let e = entry(&wd);
        let start = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
        let r = Ref::new(
            "tenant",
            FingerprintBounds::new(0, 0xffff),
            start,
            start + chrono::Duration::hours(25),
        );
        let err = e.put_meta(&Meta::new(r.clone().into(), Vec::new())).await.unwrap_err();
        assert!(matches!(
            err,
            bloomstore_core::BloomStoreError::Ref(RefError::SpanExceedsTable { .. })
        ));
        assert!(e.put_block(&r.into(), vec![1]).await.is_err());
        assert!(e.client().list("bloom/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_block_binds_table() {
        let wd = TempDir::new().unwrap();
        let e = entry(&wd);
        let meta = meta_at(20, 0, 0, 0xffff);
        let block_ref: BlockRef = meta.meta_ref.0.clone().into();
        let bound = e.put_block(&block_ref, vec![1, 2, 3]).await.unwrap();
        assert!(bound.is_bound());
        let key = e.resolver.block_key(&bound).unwrap();
        assert_eq!(e.client().get_object(&key).await.unwrap(), vec![1, 2, 3]);
    }
}
