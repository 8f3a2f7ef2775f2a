//! Artifact identities: refs, metas and blocks

use crate::{FingerprintBounds, Interval, RefError, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Characters a tenant id or table name may not contain, since both are key
/// segments.
const FORBIDDEN_SEGMENT_CHARS: &[char] = &['/', '\\'];

/// Truncate a timestamp to millisecond precision.
///
/// Object keys encode milliseconds, so refs keep no finer precision.
pub fn truncate_to_millis(t: Timestamp) -> Timestamp {
    DateTime::<Utc>::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

/// Identity of a stored artifact: tenant, table, fingerprint range and time range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    pub tenant_id: String,
    /// Assigned once the ref is bound to a schema period on write.
    pub table_name: String,
    pub bounds: FingerprintBounds,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
}

impl Ref {
    /// Create an unbound ref (empty table name).
    pub fn new(
        tenant_id: impl Into<String>,
        bounds: FingerprintBounds,
        start_timestamp: Timestamp,
        end_timestamp: Timestamp,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            table_name: String::new(),
            bounds,
            start_timestamp: truncate_to_millis(start_timestamp),
            end_timestamp: truncate_to_millis(end_timestamp),
        }
    }

    /// Bind the ref to a table.
    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// The `[start, end)` time range the artifact covers.
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_timestamp, self.end_timestamp)
    }

    pub fn is_bound(&self) -> bool {
        !self.table_name.is_empty()
    }

    /// Check the invariants required for addressing.
    ///
    /// An unbound ref passes; a bound one must name a usable table.
    pub fn validate(&self) -> Result<(), RefError> {
        validate_tenant(&self.tenant_id)?;
        if self.is_bound() {
            validate_table(&self.table_name)?;
        }
        self.bounds.validate()
    }
}

/// Reject tenant ids that would break key parsing.
pub fn validate_tenant(tenant_id: &str) -> Result<(), RefError> {
    if tenant_id.is_empty() {
        return Err(RefError::InvalidTenant {
            tenant_id: tenant_id.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if tenant_id.contains(FORBIDDEN_SEGMENT_CHARS) || tenant_id == "." || tenant_id == ".." {
        return Err(RefError::InvalidTenant {
            tenant_id: tenant_id.to_string(),
            reason: "must be a single path segment".to_string(),
        });
    }
    Ok(())
}

/// Reject table names that are not a single key segment.
pub fn validate_table(table_name: &str) -> Result<(), RefError> {
    if table_name.is_empty()
        || table_name.contains(FORBIDDEN_SEGMENT_CHARS)
        || table_name.starts_with('.')
    {
        return Err(RefError::InvalidTable {
            table_name: table_name.to_string(),
            reason: "must be a single path segment not starting with '.'".to_string(),
        });
    }
    Ok(())
}

/// Identifies a Meta document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaRef(pub Ref);

impl Deref for MetaRef {
    type Target = Ref;

    fn deref(&self) -> &Ref {
        &self.0
    }
}

impl From<Ref> for MetaRef {
    fn from(r: Ref) -> Self {
        Self(r)
    }
}

/// Identifies one Block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockRef(pub Ref);

impl Deref for BlockRef {
    type Target = Ref;

    fn deref(&self) -> &Ref {
        &self.0
    }
}

impl From<Ref> for BlockRef {
    fn from(r: Ref) -> Self {
        Self(r)
    }
}

/// Authoritative list of the Blocks covering a tenant/time/fingerprint scope.
///
/// Written once; compaction supersedes a Meta rather than editing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub meta_ref: MetaRef,
    pub blocks: Vec<BlockRef>,
}

impl Meta {
    pub fn new(meta_ref: MetaRef, blocks: Vec<BlockRef>) -> Self {
        Self { meta_ref, blocks }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A Block as written: its ref and the bytes of a self-contained archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_ref: BlockRef,
    pub data: Vec<u8>,
}

/// Query handed to meta resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaSearchParams {
    pub tenant_id: String,
    pub interval: Interval,
    pub bounds: FingerprintBounds,
}

impl MetaSearchParams {
    pub fn new(tenant_id: impl Into<String>, interval: Interval, bounds: FingerprintBounds) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            interval,
            bounds,
        }
    }

    /// True iff `r` belongs to the queried tenant, fingerprints and time range.
    pub fn matches(&self, r: &Ref) -> bool {
        r.tenant_id == self.tenant_id
            && r.bounds.overlaps(&self.bounds)
            && r.interval().overlaps(&self.interval)
    }
}
