//! Object key and local path layout.
//!
//! ```text
//! bloom/<tenant>/<table>/metas/<min>-<max>/<start>-<end>.json
//! bloom/<tenant>/<table>/blocks/<min>-<max>/<start>-<end>.zip
//! ```
//!
//! Fingerprints and millisecond timestamps are written as 16 lower-case hex
//! digits, so keys sort by bounds and then by start time. Extracted blocks
//! live at the same relative path under the working directory, without the
//! archive extension.

use std::path::{Path, PathBuf};

use bloomstore_core::{
    validate_table, validate_tenant, BlockRef, BloomResult, DecodeError, FingerprintBounds, MetaRef, Ref,
    RefError, Timestamp,
};
use chrono::{DateTime, Utc};

pub const ROOT_PREFIX: &str = "bloom";
pub const METAS_DIR: &str = "metas";
pub const BLOCKS_DIR: &str = "blocks";
pub const META_EXTENSION: &str = ".json";
pub const BLOCK_EXTENSION: &str = ".zip";

const KEY_SEGMENTS: usize = 6;

/// Maps refs to object keys and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyResolver;

fn encode_time(t: Timestamp) -> String {
    format!("{:016x}", t.timestamp_millis() as u64)
}

fn decode_time(s: &str) -> Result<Timestamp, String> {
    if s.len() != 16 {
        return Err(format!("expected 16 hex digits, got {s:?}"));
    }
    let millis = u64::from_str_radix(s, 16).map_err(|e| format!("invalid timestamp {s:?}: {e}"))?;
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .ok_or_else(|| format!("timestamp {s:?} out of range"))
}

impl KeyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Prefix under which every meta of `tenant` in `table` is stored.
    pub fn meta_prefix(&self, tenant_id: &str, table_name: &str) -> String {
        format!("{ROOT_PREFIX}/{tenant_id}/{table_name}/{METAS_DIR}/")
    }

    pub fn block_prefix(&self, tenant_id: &str, table_name: &str) -> String {
        format!("{ROOT_PREFIX}/{tenant_id}/{table_name}/{BLOCKS_DIR}/")
    }

    pub fn meta_key(&self, meta_ref: &MetaRef) -> BloomResult<String> {
        Ok(self.key(meta_ref, METAS_DIR, META_EXTENSION)?)
    }

    pub fn block_key(&self, block_ref: &BlockRef) -> BloomResult<String> {
        Ok(self.key(block_ref, BLOCKS_DIR, BLOCK_EXTENSION)?)
    }

    pub fn parse_meta_key(&self, key: &str) -> BloomResult<MetaRef> {
        Ok(parse_key(key, METAS_DIR, META_EXTENSION)?.into())
    }

    pub fn parse_block_key(&self, key: &str) -> BloomResult<BlockRef> {
        Ok(parse_key(key, BLOCKS_DIR, BLOCK_EXTENSION)?.into())
    }

    /// Directory a block is extracted to under `working_dir`.
    pub fn block_dir(&self, working_dir: &Path, block_ref: &BlockRef) -> BloomResult<PathBuf> {
        let key = self.key(block_ref, BLOCKS_DIR, "")?;
        let mut path = working_dir.to_path_buf();
        path.extend(key.split('/'));
        Ok(path)
    }

    fn key(&self, r: &Ref, kind: &str, extension: &str) -> Result<String, RefError> {
        r.validate()?;
        if !r.is_bound() {
            return Err(RefError::MissingTable {
                tenant_id: r.tenant_id.clone(),
            });
        }
        Ok(format!(
            "{ROOT_PREFIX}/{}/{}/{kind}/{}/{}-{}{extension}",
            r.tenant_id,
            r.table_name,
            r.bounds,
            encode_time(r.start_timestamp),
            encode_time(r.end_timestamp),
        ))
    }
}

fn parse_key(key: &str, kind: &str, extension: &str) -> Result<Ref, DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    let parts: Vec<&str> = key.split('/').collect();
    if parts.len() != KEY_SEGMENTS {
        return Err(invalid(format!(
            "expected {KEY_SEGMENTS} segments, got {}",
            parts.len()
        )));
    }
    if parts[0] != ROOT_PREFIX {
        return Err(invalid(format!("unexpected root {:?}", parts[0])));
    }
    if parts[3] != kind {
        return Err(invalid(format!("expected {kind:?} segment, got {:?}", parts[3])));
    }

    let tenant_id = parts[1];
    validate_tenant(tenant_id).map_err(|e| invalid(e.to_string()))?;
    let table_name = parts[2];
    validate_table(table_name).map_err(|e| invalid(e.to_string()))?;

    let bounds: FingerprintBounds = parts[4].parse().map_err(invalid)?;

    let stem = parts[5]
        .strip_suffix(extension)
        .ok_or_else(|| invalid(format!("missing {extension} extension")))?;
    let (start, end) = stem
        .split_once('-')
        .ok_or_else(|| invalid(format!("expected <start>-<end>, got {stem:?}")))?;
    let start = decode_time(start).map_err(invalid)?;
    let end = decode_time(end).map_err(invalid)?;

    Ok(Ref::new(tenant_id, bounds, start, end).with_table(table_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloomstore_core::BloomStoreError;
    use chrono::TimeZone;

    fn sample_ref() -> Ref {
        Ref::new(
            "tenant",
            FingerprintBounds::new(0x10000, 0x1ffff),
            Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 20, 1, 0, 0).unwrap(),
        )
        .with_table("schema_a_table_19742")
    }

    #[test]
    fn test_meta_key_layout() {
        let key = KeyResolver.meta_key(&sample_ref().into()).unwrap();
        assert_eq!(
            key,
            "bloom/tenant/schema_a_table_19742/metas/0000000000010000-000000000001ffff/0000018d242ac800-0000018d2461b680.json"
        );
        assert!(key.starts_with(&KeyResolver.meta_prefix("tenant", "schema_a_table_19742")));
    }

    #[test]
    fn test_block_key_roundtrip() {
        let block_ref: BlockRef = sample_ref().into();
        let key = KeyResolver.block_key(&block_ref).unwrap();
        assert!(key.ends_with(".zip"));
        assert_eq!(KeyResolver.parse_block_key(&key).unwrap(), block_ref);
    }

    #[test]
    fn test_unbound_ref_has_no_key() {
        let mut r = sample_ref();
        r.table_name.clear();
        let err = KeyResolver.meta_key(&r.into()).unwrap_err();
        assert!(matches!(
            err,
            BloomStoreError::Ref(RefError::MissingTable { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        let good = KeyResolver.meta_key(&sample_ref().into()).unwrap();
        let cases = [
            good.replace("bloom/", "other/"),
            good.replace("/metas/", "/blocks/"),
            good.replace(".json", ".zip"),
            good.replace("0000000000010000-", "10000-"),
            format!("{good}/extra"),
            "bloom/tenant".to_string(),
        ];
        for key in cases {
            let err = KeyResolver.parse_meta_key(&key).unwrap_err();
            assert!(
                matches!(err, BloomStoreError::Decode(DecodeError::InvalidKey { .. })),
                "accepted {key}"
            );
        }
    }

    #[test]
    fn test_escaping_table_has_no_block_dir() {
        let escaping: BlockRef = sample_ref().with_table("../../outside").into();
        let err = KeyResolver
            .block_dir(Path::new("/wd"), &escaping)
            .unwrap_err();
        assert!(matches!(
            err,
            BloomStoreError::Ref(RefError::InvalidTable { .. })
        ));
        assert!(KeyResolver.block_key(&escaping).is_err());
    }

    #[test]
    fn test_block_dir_mirrors_key() {
        let dir = KeyResolver
            .block_dir(Path::new("/wd"), &sample_ref().into())
            .unwrap();
        assert_eq!(
            dir,
            PathBuf::from("/wd/bloom/tenant/schema_a_table_19742/blocks/0000000000010000-000000000001ffff/0000018d242ac800-0000018d2461b680")
        );
    }
}
