//! BLOOMSTORE Storage - Schema-aware Meta/Block Store
//!
//! Reads and writes bloom filter metas and blocks across an ordered list of
//! schema periods, each with its own object client and table naming. Metas
//! and extracted blocks are cached; block downloads run on a bounded worker
//! pool per period.

pub mod archive;
pub mod cache;
pub mod client;
pub mod entry;
pub mod fetcher;
pub mod metrics;
pub mod queue;
pub mod resolver;
pub mod store;
pub mod workdir;

pub use archive::{
    extract_block, pack_directory, pack_files, unpack, BlockDirectories, BlockDirectory,
    BLOOM_FILE_NAME, SERIES_FILE_NAME,
};
pub use cache::{
    new_blocks_cache, new_metas_cache, Cache, CacheStats, EmbeddedCache, EvictionCallback,
    Weighted,
};
pub use client::{
    DefaultObjectClientFactory, FilesystemObjectClient, InMemoryObjectClient, ObjectClient,
    ObjectClientFactory,
};
pub use entry::StoreEntry;
pub use fetcher::{BlockQuerier, Fetcher};
pub use metrics::StoreMetrics;
pub use queue::{DownloadProcessor, DownloadQueue};
pub use resolver::KeyResolver;
pub use store::{period_index, split_by_periods, BloomStore};
pub use workdir::ensure_working_directory;
