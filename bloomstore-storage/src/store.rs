//! The bloom store: schema periods dispatched by time.
//!
//! Each configured period becomes a [`StoreEntry`] owning the time range
//! from its start up to the next period's start. Time ranges are split at
//! period boundaries and each piece goes to exactly one entry; times before
//! the first period belong to no entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bloomstore_core::{
    validate_periods, validate_tenant, BlockRef, BloomResult, Interval, Meta, MetaRef,
    MetaSearchParams, PeriodConfig, SchemaError, StorageConfig, StorageError, StoreConfig,
    Timestamp,
};
use futures_util::future::try_join_all;
use prometheus::Registry;
use tracing::{debug, info};

use crate::archive::BlockDirectory;
use crate::cache::{new_blocks_cache, new_metas_cache, Cache};
use crate::client::{DefaultObjectClientFactory, ObjectClient, ObjectClientFactory};
use crate::entry::StoreEntry;
use crate::fetcher::{BlockQuerier, Fetcher};
use crate::metrics::StoreMetrics;
use crate::workdir::ensure_working_directory;

// ============================================================================
// TIME DISPATCH
// ============================================================================

/// Index of the period owning `t`, given ascending period starts.
pub fn period_index(starts: &[Timestamp], t: Timestamp) -> Option<usize> {
    starts.partition_point(|start| *start <= t).checked_sub(1)
}

/// Split `interval` at period boundaries.
///
/// Returns `(period index, piece)` in ascending order. The pieces are
/// disjoint and together cover the part of `interval` at or after the first
/// start.
pub fn split_by_periods(starts: &[Timestamp], interval: &Interval) -> Vec<(usize, Interval)> {
    interval
        .split_at(starts)
        .into_iter()
        .filter_map(|piece| period_index(starts, piece.start).map(|idx| (idx, piece)))
        .collect()
}

// ============================================================================
// STORE
// ============================================================================

/// Schema-aware store for bloom metas and blocks.
pub struct BloomStore {
    entries: Vec<StoreEntry>,
    starts: Vec<Timestamp>,
    working_dir: PathBuf,
    metrics: StoreMetrics,
    stopped: AtomicBool,
}

impl BloomStore {
    /// Build a store with the default object clients.
    ///
    /// Validates the periods, prepares the working directory, registers
    /// metrics on `registry` and starts one download pool per period. Must
    /// be called within a Tokio runtime.
    pub fn new(
        periods: Vec<PeriodConfig>,
        storage: &StorageConfig,
        registry: &Registry,
        metas_cache: Arc<dyn Cache<Vec<u8>>>,
        blocks_cache: Arc<dyn Cache<BlockDirectory>>,
    ) -> BloomResult<Self> {
        Self::with_client_factory(
            periods,
            storage,
            registry,
            metas_cache,
            blocks_cache,
            &DefaultObjectClientFactory,
        )
    }

    /// Build a store from a configuration file, with embedded caches sized
    /// from the shipper settings.
    pub fn from_config(config: &StoreConfig, registry: &Registry) -> BloomResult<Self> {
        config.validate()?;
        let shipper = &config.storage.bloom_shipper;
        Self::new(
            config.periods.clone(),
            &config.storage,
            registry,
            Arc::new(new_metas_cache(shipper.metas_cache.clone())),
            Arc::new(new_blocks_cache(shipper.blocks_cache.clone())),
        )
    }

    pub fn with_client_factory(
        periods: Vec<PeriodConfig>,
        storage: &StorageConfig,
        registry: &Registry,
        metas_cache: Arc<dyn Cache<Vec<u8>>>,
        blocks_cache: Arc<dyn Cache<BlockDirectory>>,
        factory: &dyn ObjectClientFactory,
    ) -> BloomResult<Self> {
        validate_periods(&periods)?;
        let shipper = &storage.bloom_shipper;
        shipper.validate()?;

        let working_dir = shipper.working_directory.clone();
        ensure_working_directory(&working_dir)?;
        let metrics = StoreMetrics::new(registry)?;

        let mut entries = Vec::with_capacity(periods.len());
        for period in periods {
            let client = factory.create(&period, storage)?;
            let fetcher = Fetcher::new(
                client.clone(),
                &working_dir,
                metas_cache.clone(),
                blocks_cache.clone(),
                &shipper.blocks_downloading_queue,
                metrics.clone(),
            )?;
            debug!(
                from = %period.from,
                object_type = %period.object_type.as_str(),
                prefix = %period.index_tables.prefix,
                "Schema period ready"
            );
            entries.push(StoreEntry::new(period, client, fetcher));
        }
        let starts: Vec<Timestamp> = entries.iter().map(StoreEntry::start).collect();
        let entries: Vec<StoreEntry> = entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| match starts.get(idx + 1) {
                Some(&next) => entry.with_until(next),
                None => entry,
            })
            .collect();

        info!(
            periods = entries.len(),
            working_directory = %working_dir.display(),
            workers = shipper.blocks_downloading_queue.workers_count,
            "Bloom store started"
        );

        Ok(Self {
            entries,
            starts,
            working_dir,
            metrics,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// The entry owning time `t`.
    pub fn entry_for(&self, t: Timestamp) -> BloomResult<&StoreEntry> {
        if self.entries.is_empty() {
            return Err(SchemaError::NoPeriods.into());
        }
        period_index(&self.starts, t)
            .map(|idx| &self.entries[idx])
            .ok_or_else(|| SchemaError::NoMatchingSchema { timestamp: t }.into())
    }

    /// Object client of the period owning `t`.
    pub fn client(&self, t: Timestamp) -> BloomResult<Arc<dyn ObjectClient>> {
        Ok(self.entry_for(t)?.client().clone())
    }

    /// Find the metas matching `params`, grouped by period.
    ///
    /// Returns one group per period that has matches, in period order,
    /// alongside the fetcher able to read that group.
    pub async fn resolve_metas(
        &self,
        params: &MetaSearchParams,
    ) -> BloomResult<(Vec<Vec<MetaRef>>, Vec<Fetcher>)> {
        let started = Instant::now();
        let result = self.resolve_metas_inner(params).await;
        self.metrics
            .record_resolve(result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    async fn resolve_metas_inner(
        &self,
        params: &MetaSearchParams,
    ) -> BloomResult<(Vec<Vec<MetaRef>>, Vec<Fetcher>)> {
        validate_tenant(&params.tenant_id)?;
        let mut groups = Vec::new();
        let mut fetchers = Vec::new();
        let listing = self.listing_interval(&params.interval);
        for (idx, piece) in split_by_periods(&self.starts, &listing) {
            let entry = &self.entries[idx];
            if !entry.applies_to(&piece) {
                continue;
            }
            let refs = entry.resolve_metas(params, &piece).await?;
            debug!(
                tenant = %params.tenant_id,
                interval = %piece,
                refs = refs.len(),
                "Resolved metas"
            );
            if !refs.is_empty() {
                groups.push(refs);
                fetchers.push(entry.fetcher().clone());
            }
        }
        Ok((groups, fetchers))
    }

    /// The range whose tables must be listed to find every artifact
    /// overlapping `interval`.
    ///
    /// Artifacts live in the table of their start time and span at most one
    /// table period, so the range reaches back by the longest table period
    /// in effect up to `interval.start`. That may cross into an earlier
    /// period.
    fn listing_interval(&self, interval: &Interval) -> Interval {
        if interval.is_empty() {
            return *interval;
        }
        let Some(idx) = period_index(&self.starts, interval.start) else {
            return *interval;
        };
        let lookback = self.entries[..=idx]
            .iter()
            .map(|entry| entry.config().index_tables.period)
            .max()
            .unwrap_or_default();
        chrono::Duration::from_std(lookback)
            .ok()
            .and_then(|d| interval.start.checked_sub_signed(d))
            .map_or(*interval, |start| Interval::new(start, interval.end))
    }

    /// Resolve and fetch every meta matching `params`, in period order.
    pub async fn fetch_metas(&self, params: &MetaSearchParams) -> BloomResult<Vec<Meta>> {
        let (groups, fetchers) = self.resolve_metas(params).await?;
        let mut metas = Vec::new();
        for (refs, fetcher) in groups.iter().zip(fetchers.iter()) {
            metas.extend(fetcher.fetch_metas(refs).await?);
        }
        Ok(metas)
    }

    /// Fetch blocks across periods, returning queriers in input order.
    ///
    /// Each block goes to the period owning its start time.
    pub async fn fetch_blocks(&self, refs: &[BlockRef]) -> BloomResult<Vec<BlockQuerier>> {
        let mut by_entry: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (position, block_ref) in refs.iter().enumerate() {
            let idx = period_index(&self.starts, block_ref.start_timestamp).ok_or_else(|| {
                SchemaError::NoMatchingSchema {
                    timestamp: block_ref.start_timestamp,
                }
            })?;
            by_entry.entry(idx).or_default().push(position);
        }

        let fetched = try_join_all(by_entry.iter().map(|(&idx, positions)| {
            let group: Vec<BlockRef> = positions.iter().map(|&p| refs[p].clone()).collect();
            let fetcher = self.entries[idx].fetcher();
            async move { fetcher.fetch_blocks(&group).await }
        }))
        .await?;

        let mut slots: Vec<Option<BlockQuerier>> = (0..refs.len()).map(|_| None).collect();
        for (positions, queriers) in by_entry.values().zip(fetched) {
            for (&position, querier) in positions.iter().zip(queriers) {
                slots[position] = Some(querier);
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| StorageError::QueueStopped.into()))
            .collect()
    }

    /// Store a meta in the period owning its start time.
    ///
    /// The meta and any unbound block refs it lists are bound to tables;
    /// returns the bound meta ref.
    pub async fn put_meta(&self, meta: &Meta) -> BloomResult<MetaRef> {
        let entry = self.entry_for(meta.meta_ref.start_timestamp)?;
        let mut blocks = Vec::with_capacity(meta.blocks.len());
        for block_ref in &meta.blocks {
            if block_ref.is_bound() {
                blocks.push(block_ref.clone());
            } else {
                let table = self
                    .entry_for(block_ref.start_timestamp)?
                    .table_for(block_ref.start_timestamp);
                blocks.push(block_ref.0.clone().with_table(table).into());
            }
        }
        entry
            .put_meta(&Meta::new(meta.meta_ref.clone(), blocks))
            .await
    }

    /// Store a block archive in the period owning its start time.
    pub async fn put_block(&self, block_ref: &BlockRef, archive: Vec<u8>) -> BloomResult<BlockRef> {
        self.entry_for(block_ref.start_timestamp)?
            .put_block(block_ref, archive)
            .await
    }

    /// Stop every period's download workers. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in &self.entries {
            entry.stop();
        }
        info!("Bloom store stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for BloomStore {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(month: u32, day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_period_index() {
        let starts = [ts(1, 1), ts(2, 1)];
        assert_eq!(period_index(&starts, ts(12, 31) - chrono::Duration::days(366)), None);
        assert_eq!(period_index(&starts, ts(1, 1)), Some(0));
        assert_eq!(period_index(&starts, ts(1, 31)), Some(0));
        assert_eq!(period_index(&starts, ts(2, 1)), Some(1));
        assert_eq!(period_index(&starts, ts(6, 1)), Some(1));
    }

    #[test]
    fn test_split_across_boundary() {
        let starts = [ts(1, 1), ts(2, 1)];
        let pieces = split_by_periods(&starts, &Interval::new(ts(1, 20), ts(2, 10)));
        assert_eq!(
            pieces,
            vec![
                (0, Interval::new(ts(1, 20), ts(2, 1))),
                (1, Interval::new(ts(2, 1), ts(2, 10))),
            ]
        );
    }

    #[test]
    fn test_split_drops_range_before_first_period() {
        let starts = [ts(1, 10)];
        let pieces = split_by_periods(&starts, &Interval::new(ts(1, 1), ts(1, 20)));
        assert_eq!(pieces, vec![(0, Interval::new(ts(1, 10), ts(1, 20)))]);

        let before = split_by_periods(&starts, &Interval::new(ts(1, 1), ts(1, 5)));
        assert!(before.is_empty());
    }

    #[test]
    fn test_split_empty_interval() {
        let starts = [ts(1, 1)];
        assert!(split_by_periods(&starts, &Interval::new(ts(1, 5), ts(1, 5))).is_empty());
    }
}
