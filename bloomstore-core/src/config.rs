//! Configuration types
//!
//! Schema periods, storage backends, the download queue and caches. All
//! types deserialize from TOML; durations are written as `"24h"`, `"30m"`,
//! `"1h30m"` and so on.

use crate::{ConfigError, Timestamp};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Object storage backend selector for a schema period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ObjectType {
    /// Process-local map, lost on restart.
    InMemory,
    /// Local directory tree rooted at `filesystem.directory`.
    Filesystem,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::InMemory => "inmemory",
            ObjectType::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inmemory" | "in-memory" | "memory" => Ok(ObjectType::InMemory),
            "filesystem" | "fs" | "local" => Ok(ObjectType::Filesystem),
            _ => Err(ConfigError::UnsupportedObjectType {
                object_type: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ObjectType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ObjectType> for String {
    fn from(t: ObjectType) -> Self {
        t.as_str().to_string()
    }
}

/// Table naming rule for one schema period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicTableConfig {
    pub prefix: String,
    #[serde(with = "duration_str")]
    pub period: Duration,
}

/// One schema period: when it takes effect, where it stores, how it names tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// Day the period takes effect, at 00:00 UTC.
    pub from: NaiveDate,
    pub object_type: ObjectType,
    pub index_tables: PeriodicTableConfig,
}

impl PeriodConfig {
    pub fn new(from: NaiveDate, object_type: ObjectType, prefix: impl Into<String>, period: Duration) -> Self {
        Self {
            from,
            object_type,
            index_tables: PeriodicTableConfig {
                prefix: prefix.into(),
                period,
            },
        }
    }

    /// Instant the period takes effect.
    pub fn start(&self) -> Timestamp {
        self.from.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index_tables.prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "index_tables.prefix".to_string(),
            });
        }
        if self.index_tables.prefix.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "index_tables.prefix".to_string(),
                value: self.index_tables.prefix.clone(),
                reason: "must not contain '/'".to_string(),
            });
        }
        let period = self.index_tables.period;
        if period.as_secs() == 0 || period.subsec_nanos() != 0 {
            return Err(ConfigError::InvalidValue {
                field: "index_tables.period".to_string(),
                value: format!("{:?}", period),
                reason: "must be a positive whole number of seconds".to_string(),
            });
        }
        Ok(())
    }
}

/// Validate every period and their ordering.
///
/// Periods must be non-empty and strictly ascending by `from`.
pub fn validate_periods(periods: &[PeriodConfig]) -> Result<(), ConfigError> {
    if periods.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "periods".to_string(),
        });
    }
    for period in periods {
        period.validate()?;
    }
    for pair in periods.windows(2) {
        if pair[1].from <= pair[0].from {
            return Err(ConfigError::PeriodsOutOfOrder {
                previous: pair[0].from.to_string(),
                current: pair[1].from.to_string(),
            });
        }
    }
    Ok(())
}

/// Bounded worker pool settings for block downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadingQueueConfig {
    /// Number of concurrent download workers.
    pub workers_count: usize,
    /// Capacity of the pending task channel.
    pub max_tasks_enqueued: usize,
}

impl Default for DownloadingQueueConfig {
    fn default() -> Self {
        Self {
            workers_count: 16,
            max_tasks_enqueued: 10_000,
        }
    }
}

impl DownloadingQueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers_count: usize) -> Self {
        self.workers_count = workers_count;
        self
    }

    pub fn with_max_tasks(mut self, max_tasks_enqueued: usize) -> Self {
        self.max_tasks_enqueued = max_tasks_enqueued;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "blocks_downloading_queue.workers_count".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_tasks_enqueued == 0 {
            return Err(ConfigError::InvalidValue {
                field: "blocks_downloading_queue.max_tasks_enqueued".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Size and TTL bounds for an embedded cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_size_items: usize,
    /// Maximum total size in bytes; 0 disables the byte bound.
    pub max_size_bytes: u64,
    /// Entries older than this are dropped on access.
    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_items: 1000,
            max_size_bytes: 0,
            ttl: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_size_items = max;
        self
    }

    pub fn with_max_bytes(mut self, max: u64) -> Self {
        self.max_size_bytes = max;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.max_size_items == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{field}.max_size_items"),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: format!("{field}.ttl"),
                value: "0s".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for the bloom shipper: local working area, download pool, caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomShipperConfig {
    /// Where block archives are unpacked.
    pub working_directory: PathBuf,
    #[serde(default)]
    pub blocks_downloading_queue: DownloadingQueueConfig,
    #[serde(default)]
    pub blocks_cache: CacheConfig,
    #[serde(default)]
    pub metas_cache: CacheConfig,
}

impl BloomShipperConfig {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            blocks_downloading_queue: DownloadingQueueConfig::default(),
            blocks_cache: CacheConfig::default(),
            metas_cache: CacheConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "bloom_shipper.working_directory".to_string(),
            });
        }
        self.blocks_downloading_queue.validate()?;
        self.blocks_cache.validate("bloom_shipper.blocks_cache")?;
        self.metas_cache.validate("bloom_shipper.metas_cache")
    }
}

/// Local filesystem object storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    pub directory: PathBuf,
}

/// Storage settings shared by every schema period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bloom_shipper: BloomShipperConfig,
    #[serde(default)]
    pub filesystem: Option<FilesystemConfig>,
}

impl StorageConfig {
    pub fn new(bloom_shipper: BloomShipperConfig) -> Self {
        Self {
            bloom_shipper,
            filesystem: None,
        }
    }

    pub fn with_filesystem(mut self, directory: impl Into<PathBuf>) -> Self {
        self.filesystem = Some(FilesystemConfig {
            directory: directory.into(),
        });
        self
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub periods: Vec<PeriodConfig>,
    pub storage: StorageConfig,
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(s).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_periods(&self.periods)?;
        self.storage.bloom_shipper.validate()?;
        let needs_fs = self
            .periods
            .iter()
            .any(|p| p.object_type == ObjectType::Filesystem);
        if needs_fs && self.storage.filesystem.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "storage.filesystem.directory".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a duration string made of `<number><unit>` segments, e.g. "30s", "24h", "1h30m".
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        field: "duration".to_string(),
        value: s.to_string(),
        reason: "expected <number><unit>, unit one of ms, s, m, h, d".to_string(),
    };

    let mut rest = s.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_ms: u64 = 0;
    while !rest.is_empty() {
        let num_end = rest
            .chars()
            .position(|c| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(invalid());
        }
        let (num_str, tail) = rest.split_at(num_end);
        let num: u64 = num_str.parse().map_err(|_| invalid())?;

        let unit_end = tail
            .chars()
            .position(|c| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let multiplier: u64 = match unit {
            "ms" => 1,
            "s" => 1000,
            "m" => 60 * 1000,
            "h" => 60 * 60 * 1000,
            "d" => 24 * 60 * 60 * 1000,
            _ => return Err(invalid()),
        };
        total_ms = num
            .checked_mul(multiplier)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(invalid)?;
        rest = tail;
    }

    Ok(Duration::from_millis(total_ms))
}

/// Format a duration with the largest unit that divides it exactly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    const UNITS: &[(&str, u128)] = &[
        ("d", 24 * 60 * 60 * 1000),
        ("h", 60 * 60 * 1000),
        ("m", 60 * 1000),
        ("s", 1000),
    ];
    if ms == 0 {
        return "0s".to_string();
    }
    for (unit, size) in UNITS {
        if ms % size == 0 {
            return format!("{}{}", ms / size, unit);
        }
    }
    format!("{}ms", ms)
}

/// Serde adapter for human-readable durations.
pub mod duration_str {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn period(from: &str, prefix: &str) -> PeriodConfig {
        PeriodConfig::new(
            NaiveDate::parse_from_str(from, "%Y-%m-%d").unwrap(),
            ObjectType::InMemory,
            prefix,
            DAY,
        )
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("24h").unwrap(), DAY);
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10 parsecs").is_err());
    }

    #[test]
    fn test_format_duration_picks_largest_unit() {
        assert_eq!(format_duration(DAY), "1d");
        assert_eq!(format_duration(Duration::from_secs(5400)), "90m");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn test_object_type_parse() {
        assert_eq!("inmemory".parse::<ObjectType>().unwrap(), ObjectType::InMemory);
        assert_eq!("Filesystem".parse::<ObjectType>().unwrap(), ObjectType::Filesystem);
        assert_eq!(
            "gcs".parse::<ObjectType>(),
            Err(ConfigError::UnsupportedObjectType {
                object_type: "gcs".to_string()
            })
        );
    }

    #[test]
    fn test_period_start_is_midnight_utc() {
        let p = period("2024-02-01", "schema_b_table_");
        assert_eq!(p.start().to_rfc3339(), "2024-02-01T00:00:00+00:00");
    }

    #[test]
    fn test_validate_periods_order() {
        let ok = vec![period("2024-01-01", "a_"), period("2024-02-01", "b_")];
        assert!(validate_periods(&ok).is_ok());

        let swapped = vec![period("2024-02-01", "b_"), period("2024-01-01", "a_")];
        assert!(matches!(
            validate_periods(&swapped),
            Err(ConfigError::PeriodsOutOfOrder { .. })
        ));

        let dup = vec![period("2024-01-01", "a_"), period("2024-01-01", "b_")];
        assert!(validate_periods(&dup).is_err());

        assert!(validate_periods(&[]).is_err());
    }

    #[test]
    fn test_validate_period_rejects_bad_table_config() {
        let mut p = period("2024-01-01", "");
        assert!(p.validate().is_err());
        p.index_tables.prefix = "a_".to_string();
        p.index_tables.period = Duration::ZERO;
        assert!(p.validate().is_err());
        p.index_tables.period = Duration::from_millis(1500);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_queue_config_builder() {
        let config = DownloadingQueueConfig::new().with_workers(4).with_max_tasks(8);
        assert_eq!(config.workers_count, 4);
        assert_eq!(config.max_tasks_enqueued, 8);
        assert!(config.validate().is_ok());
        assert!(config.with_workers(0).validate().is_err());
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_max_items(5000)
            .with_max_bytes(1 << 20)
            .with_ttl(Duration::from_secs(1800));
        assert_eq!(config.max_size_items, 5000);
        assert_eq!(config.max_size_bytes, 1 << 20);
        assert_eq!(config.ttl, Duration::from_secs(1800));
    }

    #[test]
    fn test_store_config_from_toml() {
        let doc = r#"
            [[periods]]
            from = "2024-01-01"
            object_type = "inmemory"
            index_tables = { prefix = "schema_a_table_", period = "24h" }

            [[periods]]
            from = "2024-02-01"
            object_type = "filesystem"
            index_tables = { prefix = "schema_b_table_", period = "24h" }

            [storage.bloom_shipper]
            working_directory = "/var/lib/bloom"

            [storage.bloom_shipper.blocks_downloading_queue]
            workers_count = 2

            [storage.bloom_shipper.blocks_cache]
            max_size_items = 100
            ttl = "1h"

            [storage.filesystem]
            directory = "/var/lib/objects"
        "#;

        let config = StoreConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.periods.len(), 2);
        assert_eq!(config.periods[1].object_type, ObjectType::Filesystem);
        assert_eq!(config.periods[0].index_tables.period, DAY);
        let shipper = &config.storage.bloom_shipper;
        assert_eq!(shipper.blocks_downloading_queue.workers_count, 2);
        assert_eq!(shipper.blocks_downloading_queue.max_tasks_enqueued, 10_000);
        assert_eq!(shipper.blocks_cache.max_size_items, 100);
        assert_eq!(shipper.metas_cache, CacheConfig::default());
    }

    #[test]
    fn test_store_config_requires_filesystem_section() {
        let doc = r#"
            [[periods]]
            from = "2024-01-01"
            object_type = "filesystem"
            index_tables = { prefix = "a_", period = "24h" }

            [storage.bloom_shipper]
            working_directory = "/tmp/bloom"
        "#;
        assert_eq!(
            StoreConfig::from_toml_str(doc),
            Err(ConfigError::MissingRequired {
                field: "storage.filesystem.directory".to_string()
            })
        );
    }

    #[test]
    fn test_store_config_rejects_unknown_backend() {
        let doc = r#"
            [[periods]]
            from = "2024-01-01"
            object_type = "tape"
            index_tables = { prefix = "a_", period = "24h" }

            [storage.bloom_shipper]
            working_directory = "/tmp/bloom"
        "#;
        let err = StoreConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("tape"));
    }
}
