//! Periodic table naming
//!
//! A period's tables are numbered by `floor(unix_seconds / period_seconds)`
//! and named `prefix + number`. Numbering is absolute, so two periods with
//! the same table length agree on which instants share a table number.

use crate::{Interval, PeriodConfig, PeriodicTableConfig, Timestamp};
use chrono::{DateTime, Utc};

impl PeriodicTableConfig {
    fn period_secs(&self) -> i64 {
        // validate() rejects zero periods; clamp so a bad config cannot divide by zero
        (self.period.as_secs() as i64).max(1)
    }

    /// Number of the table containing `t`.
    pub fn table_number(&self, t: Timestamp) -> i64 {
        t.timestamp().div_euclid(self.period_secs())
    }

    /// Name of the table with the given number.
    pub fn table_name(&self, number: i64) -> String {
        format!("{}{}", self.prefix, number)
    }

    /// Name of the table containing `t`.
    pub fn table_for(&self, t: Timestamp) -> String {
        self.table_name(self.table_number(t))
    }

    /// The `[start, end)` range covered by table `number`.
    pub fn table_interval(&self, number: i64) -> Interval {
        let secs = self.period_secs();
        let start = DateTime::<Utc>::from_timestamp(number.saturating_mul(secs), 0)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let end = DateTime::<Utc>::from_timestamp(number.saturating_add(1).saturating_mul(secs), 0)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Interval::new(start, end)
    }

    /// Every table whose range overlaps `interval`, in chronological order.
    pub fn tables_for_range(&self, interval: &Interval) -> Vec<String> {
        if interval.is_empty() {
            return Vec::new();
        }
        let first = self.table_number(interval.start);
        // end is exclusive: the last covered instant is one nanosecond earlier
        let last_instant = interval.end - chrono::Duration::nanoseconds(1);
        let last = self.table_number(last_instant);
        (first..=last).map(|n| self.table_name(n)).collect()
    }
}

/// Tables of `period` overlapping `interval`, in chronological order.
pub fn tables_for_range(period: &PeriodConfig, interval: &Interval) -> Vec<String> {
    period.index_tables.tables_for_range(interval)
}

/// Table of `period` containing `t`; used to bind refs on write.
pub fn table_for(period: &PeriodConfig, t: Timestamp) -> String {
    period.index_tables.table_for(t)
}
