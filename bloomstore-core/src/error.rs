//! Error types for bloom store operations

use crate::Timestamp;
use thiserror::Error;

/// Configuration errors. Fatal at store construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported object storage type: {object_type}")]
    UnsupportedObjectType { object_type: String },

    #[error("Schema periods out of order: {current} does not start after {previous}")]
    PeriodsOutOfOrder { previous: String, current: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to register metric {name}: {reason}")]
    MetricsRegistration { name: String, reason: String },

    #[error("No Tokio runtime available to spawn {component}")]
    NoRuntime { component: String },
}

/// Working directory permission errors. Fatal at store construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("insufficient permissions on working directory {path}: {reason}")]
    InsufficientPermissions { path: String, reason: String },

    #[error("working directory {path} is not a directory")]
    NotADirectory { path: String },
}

/// Schema period dispatch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("No schema period matches time {timestamp}")]
    NoMatchingSchema { timestamp: Timestamp },

    #[error("No schema periods configured")]
    NoPeriods,
}

/// Object storage and local I/O errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("Failed to put object {key}: {reason}")]
    PutFailed { key: String, reason: String },

    #[error("Failed to get object {key}: {reason}")]
    GetFailed { key: String, reason: String },

    #[error("Failed to list prefix {prefix}: {reason}")]
    ListFailed { prefix: String, reason: String },

    #[error("Local I/O error at {path}: {reason}")]
    LocalIo { path: String, reason: String },

    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Download queue is stopped")]
    QueueStopped,

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors decoding stored content or object keys.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid meta {key}: {reason}")]
    InvalidMeta { key: String, reason: String },

    #[error("Invalid object key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid block archive {key}: {reason}")]
    InvalidArchive { key: String, reason: String },
}

/// Invalid refs handed to the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("Invalid bounds: min {min:#x} is greater than max {max:#x}")]
    InvalidBounds { min: u64, max: u64 },

    #[error("Invalid tenant id {tenant_id:?}: {reason}")]
    InvalidTenant { tenant_id: String, reason: String },

    #[error("Ref for tenant {tenant_id} is not bound to a table")]
    MissingTable { tenant_id: String },

    #[error("Invalid table name {table_name:?}: {reason}")]
    InvalidTable { table_name: String, reason: String },

    #[error("Ref for tenant {tenant_id} spans {span}, longer than its table period {period}")]
    SpanExceedsTable {
        tenant_id: String,
        span: String,
        period: String,
    },
}

/// Master error type for all bloom store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BloomStoreError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Ref error: {0}")]
    Ref(#[from] RefError),
}

/// Result type alias for bloom store operations.
pub type BloomResult<T> = Result<T, BloomStoreError>;

// =============================================================================
// TESTS
// =============================================================================
