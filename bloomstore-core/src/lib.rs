//! BLOOMSTORE Core - Data Types
//!
//! Pure data structures for the bloom filter meta/block store: refs,
//! fingerprint bounds, time intervals, schema period configuration, table
//! naming and the error taxonomy. All other crates depend on this.

pub mod bounds;
pub mod config;
pub mod error;
pub mod interval;
pub mod table;
pub mod types;

use chrono::{DateTime, Utc};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Series fingerprint; bloom filters are sharded over this space.
pub type Fingerprint = u64;

pub use bounds::FingerprintBounds;
pub use config::{
    format_duration, parse_duration, validate_periods, BloomShipperConfig, CacheConfig,
    DownloadingQueueConfig, FilesystemConfig, ObjectType, PeriodConfig, PeriodicTableConfig,
    StorageConfig, StoreConfig,
};
pub use error::{
    BloomResult, BloomStoreError, ConfigError, DecodeError, PermissionError, RefError,
    SchemaError, StorageError,
};
pub use interval::Interval;
pub use table::{table_for, tables_for_range};
pub use types::{
    truncate_to_millis, validate_table, validate_tenant, Block, BlockRef, Meta, MetaRef,
    MetaSearchParams, Ref,
};
