//! Caches for fetched metas and extracted blocks.
//!
//! Metas are cached as their raw JSON bytes. Blocks are cached as the
//! directory they were extracted to; evicting a block releases that
//! directory, which is removed from disk once no querier holds it.

pub mod embedded;
pub mod traits;

use std::sync::Arc;

use bloomstore_core::CacheConfig;
use tracing::debug;

use crate::archive::BlockDirectory;

pub use embedded::{EmbeddedCache, EvictionCallback};
pub use traits::{Cache, CacheStats, Weighted};

/// Cache of raw meta bytes keyed by meta object key.
pub fn new_metas_cache(config: CacheConfig) -> EmbeddedCache<Vec<u8>> {
    EmbeddedCache::new("metas", config)
}

/// Cache of extracted blocks keyed by block object key.
///
/// Evicted or expired entries release their directory.
pub fn new_blocks_cache(config: CacheConfig) -> EmbeddedCache<BlockDirectory> {
    let on_evict: EvictionCallback<BlockDirectory> = Arc::new(|key: &str, dir: &BlockDirectory| {
        debug!(
            key = %key,
            path = %dir.path().display(),
            handles = dir.handles(),
            "Releasing evicted block directory"
        );
        dir.release();
    });
    EmbeddedCache::new("blocks", config).with_eviction_callback(on_evict)
}
