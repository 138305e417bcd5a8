//! Client version policy.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Oldest client version that may enter the registration pipeline.
pub const MIN_VERSION: &str = "0.9.6";

/// Marker returned in place of a version when a client is too old.
pub const UPGRADE_REQUIRED: &str = "UPGRADE_REQUIRED";

/// A dotted-integer version such as `0.9.6`.
///
/// Ordering is component-wise numeric, so `0.10.0 > 0.9.6`. A version that
/// is a strict prefix of another sorts first (`1.0 < 1.0.1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(Vec<u64>);

/// Error for a version string that is not dotted integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(pub String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed version string: {:?}", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl Version {
    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    None
                } else {
                    p.parse::<u64>().ok()
                }
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ParseVersionError(s.to_string()))?;
        Ok(Self(parts))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// True when `version` is not older than `min`.
///
/// Malformed strings on either side count as below the baseline.
pub fn valid_version(min: &str, version: &str) -> bool {
    match (min.parse::<Version>(), version.parse::<Version>()) {
        (Ok(min), Ok(version)) => version >= min,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn baseline_ordering() {
        assert!(!valid_version(MIN_VERSION, "0.9.5"));
        assert!(valid_version(MIN_VERSION, "0.9.6"));
        assert!(valid_version(MIN_VERSION, "0.9.7"));
        assert!(valid_version(MIN_VERSION, "0.10.0"));
        assert!(valid_version(MIN_VERSION, "1.0.0"));
        assert!(!valid_version(MIN_VERSION, "0.9.0"));
    }

    #[test]
    fn malformed_is_below_baseline() {
        assert!(!valid_version(MIN_VERSION, ""));
        assert!(!valid_version(MIN_VERSION, "1.0.x"));
        assert!(!valid_version(MIN_VERSION, "1..0"));
        assert!(!valid_version(MIN_VERSION, "-1.0.0"));
        assert!(!valid_version(MIN_VERSION, "v1.0.0"));
    }

    #[test]
    fn prefix_sorts_first() {
        let short: Version = "1.0".parse().unwrap();
        let long: Version = "1.0.1".parse().unwrap();
        assert!(short < long);
        assert_eq!(long.to_string(), "1.0.1");
    }

    proptest! {
        #[test]
        fn agrees_with_tuple_order(a in (0u64..50, 0u64..50, 0u64..50), b in (0u64..50, 0u64..50, 0u64..50)) {
            let va: Version = format!("{}.{}.{}", a.0, a.1, a.2).parse().unwrap();
            let vb: Version = format!("{}.{}.{}", b.0, b.1, b.2).parse().unwrap();
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }

        #[test]
        fn baseline_check_matches_numeric_order(v in (0u64..3, 0u64..20, 0u64..20)) {
            let s = format!("{}.{}.{}", v.0, v.1, v.2);
            prop_assert_eq!(valid_version(MIN_VERSION, &s), v >= (0, 9, 6));
        }
    }
}
