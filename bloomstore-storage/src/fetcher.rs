//! Two-tier reader for one schema period.
//!
//! Metas are served from the metas cache when present and otherwise read
//! from the period's object client. Blocks are served from the blocks cache
//! when their extracted directory is still on disk; misses go through the
//! period's download queue, which fetches the archive and extracts it into
//! the working directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bloomstore_core::{
    BlockRef, BloomResult, BloomStoreError, DecodeError, DownloadingQueueConfig, Meta, MetaRef,
    StorageError,
};
use futures_util::future::try_join_all;
use tracing::debug;

use crate::archive::{BlockDirectories, BlockDirectory};
use crate::cache::Cache;
use crate::client::ObjectClient;
use crate::metrics::{StoreMetrics, SOURCE_CACHE, SOURCE_STORAGE};
use crate::queue::{DownloadProcessor, DownloadQueue};
use crate::resolver::KeyResolver;

// ============================================================================
// BLOCK QUERIER
// ============================================================================

/// A fetched block, ready to be read from local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockQuerier {
    pub block_ref: BlockRef,
    directory: BlockDirectory,
}

impl BlockQuerier {
    pub fn new(block_ref: BlockRef, directory: BlockDirectory) -> Self {
        Self {
            block_ref,
            directory,
        }
    }

    pub fn directory(&self) -> &BlockDirectory {
        &self.directory
    }

    pub fn path(&self) -> &Path {
        self.directory.path()
    }

    pub fn bloom_path(&self) -> PathBuf {
        self.directory.bloom_path()
    }

    pub fn series_path(&self) -> PathBuf {
        self.directory.series_path()
    }

    pub async fn read_bloom(&self) -> BloomResult<Vec<u8>> {
        read_local(&self.bloom_path()).await
    }

    pub async fn read_series(&self) -> BloomResult<Vec<u8>> {
        read_local(&self.series_path()).await
    }

    /// Bytes on disk.
    pub fn size(&self) -> u64 {
        self.directory.size()
    }
}

async fn read_local(path: &Path) -> BloomResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        StorageError::LocalIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

// ============================================================================
// DOWNLOADER
// ============================================================================

/// Queue processor: download one block archive and extract it.
struct BlockDownloader {
    client: Arc<dyn ObjectClient>,
    resolver: KeyResolver,
    working_dir: PathBuf,
    directories: BlockDirectories,
    blocks_cache: Arc<dyn Cache<BlockDirectory>>,
    metrics: StoreMetrics,
}

#[async_trait]
impl DownloadProcessor<BlockRef, BlockDirectory> for BlockDownloader {
    async fn process(&self, block_ref: BlockRef) -> BloomResult<BlockDirectory> {
        let started = Instant::now();
        let key = self.resolver.block_key(&block_ref)?;
        let dest = self.resolver.block_dir(&self.working_dir, &block_ref)?;

        let data = self.client.get_object(&key).await?;
        let archive_key = key.clone();
        let directories = self.directories.clone();
        let directory =
            tokio::task::spawn_blocking(move || directories.extract(&archive_key, &data, &dest))
                .await
                .map_err(|e| StorageError::Cancelled {
                    reason: e.to_string(),
                })??;

        self.blocks_cache.set(key.clone(), directory.clone()).await?;
        self.metrics
            .download_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        debug!(key = %key, size = directory.size(), "Downloaded block");
        Ok(directory)
    }
}

// ============================================================================
// FETCHER
// ============================================================================

/// Reader bound to one period's object client.
///
/// Clones share the client, caches and download queue.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn ObjectClient>,
    resolver: KeyResolver,
    metas_cache: Arc<dyn Cache<Vec<u8>>>,
    blocks_cache: Arc<dyn Cache<BlockDirectory>>,
    queue: Arc<DownloadQueue<BlockRef, BlockDirectory>>,
    metrics: StoreMetrics,
}

impl Fetcher {
    /// Build a fetcher and start its download workers.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        client: Arc<dyn ObjectClient>,
        working_dir: impl Into<PathBuf>,
        metas_cache: Arc<dyn Cache<Vec<u8>>>,
        blocks_cache: Arc<dyn Cache<BlockDirectory>>,
        queue_config: &DownloadingQueueConfig,
        metrics: StoreMetrics,
    ) -> BloomResult<Self> {
        let resolver = KeyResolver::new();
        let downloader = Arc::new(BlockDownloader {
            client: client.clone(),
            resolver,
            working_dir: working_dir.into(),
            directories: BlockDirectories::new(),
            blocks_cache: blocks_cache.clone(),
            metrics: metrics.clone(),
        });
        let queue = DownloadQueue::new(
            queue_config,
            downloader,
            metrics.download_queue_length.clone(),
        )?;

        Ok(Self {
            client,
            resolver,
            metas_cache,
            blocks_cache,
            queue: Arc::new(queue),
            metrics,
        })
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    /// Fetch and decode metas, in the order given.
    ///
    /// Storage reads for cache misses run concurrently. Only bytes that
    /// decode are written back to the cache.
    pub async fn fetch_metas(&self, refs: &[MetaRef]) -> BloomResult<Vec<Meta>> {
        let mut keys = Vec::with_capacity(refs.len());
        for meta_ref in refs {
            keys.push(self.resolver.meta_key(meta_ref)?);
        }

        let mut raw: Vec<Option<Vec<u8>>> = Vec::with_capacity(refs.len());
        let mut missing = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let cached = self.metas_cache.get(key).await?;
            if cached.is_none() {
                missing.push(index);
            }
            raw.push(cached);
        }

        let hits = refs.len() - missing.len();
        debug!(hits, misses = missing.len(), "Fetching metas");
        self.metrics.record_metas(SOURCE_CACHE, hits);
        self.metrics.record_metas(SOURCE_STORAGE, missing.len());

        let fetched = try_join_all(missing.iter().map(|&index| {
            let key = &keys[index];
            async move { self.client.get_object(key).await.map(|data| (index, data)) }
        }))
        .await?;

        let mut from_storage = vec![false; refs.len()];
        for (index, data) in fetched {
            raw[index] = Some(data);
            from_storage[index] = true;
        }

        let mut metas = Vec::with_capacity(refs.len());
        for (index, bytes) in raw.into_iter().enumerate() {
            let key = &keys[index];
            let bytes = bytes.ok_or_else(|| StorageError::ObjectNotFound { key: key.clone() })?;
            let mut meta = Meta::from_json(&bytes).map_err(|e| DecodeError::InvalidMeta {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            // the key is authoritative for the ref
            meta.meta_ref = refs[index].clone();
            if from_storage[index] {
                self.metas_cache.set(key.clone(), bytes).await?;
            }
            metas.push(meta);
        }
        Ok(metas)
    }

    /// Fetch blocks, returning queriers in the order given.
    pub async fn fetch_blocks(&self, refs: &[BlockRef]) -> BloomResult<Vec<BlockQuerier>> {
        let mut slots: Vec<Option<BlockDirectory>> = Vec::with_capacity(refs.len());
        let mut missing = Vec::new();
        for block_ref in refs {
            let key = self.resolver.block_key(block_ref)?;
            let hit = match self.blocks_cache.get(&key).await? {
                Some(directory) if directory.exists() => Some(directory),
                Some(_) => {
                    debug!(key = %key, "Cached block directory is gone");
                    None
                }
                None => None,
            };
            if hit.is_none() {
                missing.push(slots.len());
            }
            slots.push(hit);
        }

        let hits = refs.len() - missing.len();
        debug!(hits, misses = missing.len(), "Fetching blocks");
        self.metrics.record_blocks(SOURCE_CACHE, hits);
        self.metrics.record_blocks(SOURCE_STORAGE, missing.len());

        if !missing.is_empty() {
            let to_download = missing.iter().map(|&i| refs[i].clone()).collect();
            let downloaded = self.queue.fetch_all(to_download).await?;
            for (index, directory) in missing.into_iter().zip(downloaded) {
                slots[index] = Some(directory);
            }
        }

        refs.iter()
            .zip(slots)
            .map(|(block_ref, slot)| {
                slot.map(|directory| BlockQuerier::new(block_ref.clone(), directory))
                    .ok_or_else(|| -> BloomStoreError { StorageError::QueueStopped.into() })
            })
            .collect()
    }

    /// Stop the download workers.
    pub fn stop(&self) {
        self.queue.stop();
    }
}
