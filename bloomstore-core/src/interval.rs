//! Half-open time intervals

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// An interval covering nothing (`start >= end`).
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// True iff the half-open ranges share at least one instant.
    ///
    /// Empty intervals overlap nothing.
    pub fn overlaps(&self, other: &Interval) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// The shared part of two intervals, if any.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        let shared = Interval::new(start, end);
        (!shared.is_empty()).then_some(shared)
    }

    /// Split at every breakpoint strictly inside the interval.
    ///
    /// Breakpoints may be unsorted and may fall outside the interval; those
    /// outside are ignored and duplicates collapse. The pieces are returned in
    /// chronological order, are contiguous, and cover `self` exactly.
    pub fn split_at(&self, breakpoints: &[Timestamp]) -> Vec<Interval> {
        if self.is_empty() {
            return Vec::new();
        }

        let mut inner: Vec<Timestamp> = breakpoints
            .iter()
            .copied()
            .filter(|t| self.start < *t && *t < self.end)
            .collect();
        inner.sort();
        inner.dedup();

        let mut pieces = Vec::with_capacity(inner.len() + 1);
        let mut cursor = self.start;
        for point in inner {
            pieces.push(Interval::new(cursor, point));
            cursor = point;
        }
        pieces.push(Interval::new(cursor, self.end));
        pieces
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}
