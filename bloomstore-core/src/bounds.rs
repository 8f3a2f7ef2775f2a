//! Fingerprint bounds

use crate::{Fingerprint, RefError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inclusive fingerprint range `[min, max]`.
///
/// Ordered by `min` then `max`, which is also the order in which object
/// listings return refs sharing a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FingerprintBounds {
    pub min: Fingerprint,
    pub max: Fingerprint,
}

impl FingerprintBounds {
    /// Create bounds without checking `min <= max`.
    ///
    /// Use [`FingerprintBounds::try_new`] for untrusted input.
    pub const fn new(min: Fingerprint, max: Fingerprint) -> Self {
        Self { min, max }
    }

    /// Create bounds, rejecting `min > max`.
    pub fn try_new(min: Fingerprint, max: Fingerprint) -> Result<Self, RefError> {
        if min > max {
            return Err(RefError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// The full fingerprint space.
    pub const fn full() -> Self {
        Self {
            min: Fingerprint::MIN,
            max: Fingerprint::MAX,
        }
    }

    /// Check the `min <= max` invariant.
    pub fn validate(&self) -> Result<(), RefError> {
        Self::try_new(self.min, self.max).map(|_| ())
    }

    /// True iff the inclusive ranges intersect.
    pub fn overlaps(&self, other: &FingerprintBounds) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// True iff `fp` lies inside the range.
    pub fn contains(&self, fp: Fingerprint) -> bool {
        self.min <= fp && fp <= self.max
    }

    /// True iff `self` lies entirely inside `other`.
    pub fn within(&self, other: &FingerprintBounds) -> bool {
        other.min <= self.min && self.max <= other.max
    }

    /// Number of fingerprints covered.
    pub fn cardinality(&self) -> u128 {
        (self.max as u128).saturating_sub(self.min as u128) + 1
    }
}

/// Formats as `{min:016x}-{max:016x}`, the form used in object keys.
impl fmt::Display for FingerprintBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.min, self.max)
    }
}

impl FromStr for FingerprintBounds {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .split_once('-')
            .ok_or_else(|| format!("expected <min>-<max>, got {s:?}"))?;
        let min = parse_hex_fp(min)?;
        let max = parse_hex_fp(max)?;
        Self::try_new(min, max).map_err(|e| e.to_string())
    }
}

fn parse_hex_fp(s: &str) -> Result<Fingerprint, String> {
    if s.len() != 16 {
        return Err(format!("expected 16 hex digits, got {s:?}"));
    }
    Fingerprint::from_str_radix(s, 16).map_err(|e| format!("invalid fingerprint {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlaps_inclusive_edges() {
        let a = FingerprintBounds::new(0x0, 0xffff);
        let b = FingerprintBounds::new(0xffff, 0x1ffff);
        let c = FingerprintBounds::new(0x10000, 0x1ffff);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn test_try_new_rejects_inverted() {
        assert_eq!(
            FingerprintBounds::try_new(2, 1),
            Err(RefError::InvalidBounds { min: 2, max: 1 })
        );
        assert!(FingerprintBounds::try_new(1, 1).is_ok());
    }

    #[test]
    fn test_display_and_parse() {
        let b = FingerprintBounds::new(0x10000, 0x1ffff);
        let s = b.to_string();
        assert_eq!(s, "0000000000010000-000000000001ffff");
        assert_eq!(s.parse::<FingerprintBounds>().unwrap(), b);
    }

    #[test]
    fn test_parse_rejects_short_and_inverted() {
        assert!("10-20".parse::<FingerprintBounds>().is_err());
        assert!("0000000000000002-0000000000000001"
            .parse::<FingerprintBounds>()
            .is_err());
        assert!("nonsense".parse::<FingerprintBounds>().is_err());
    }

    #[test]
    fn test_full_and_cardinality() {
        assert_eq!(FingerprintBounds::full().cardinality(), 1u128 << 64);
        assert_eq!(FingerprintBounds::new(5, 5).cardinality(), 1);
        assert!(FingerprintBounds::new(3, 9).within(&FingerprintBounds::full()));
    }
}
