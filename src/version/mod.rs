//! Release version parsing and comparison.
//!
//! Patch releases are stamped with three dot-separated non-negative integers,
//! typically `YY.MMDD.HHMM` (e.g. `25.1215.1430`). Components are compared
//! left to right as integers, never as strings: `25.1215.1430` is newer than
//! `25.999.0` even though `"1215" < "999"` lexicographically.
//!
//! Leading zeros are allowed (`25.0101.0000`), which is why this is not
//! `semver::Version`. Missing trailing components read as zero, so `25.1215`
//! equals `25.1215.0`.

use crate::core::PatchError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A three-part dotted numeric version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReleaseVersion {
    /// First component (year in the `YY.MMDD.HHMM` scheme)
    pub major: u64,
    /// Second component
    pub minor: u64,
    /// Third component
    pub patch: u64,
}

impl ReleaseVersion {
    /// Build a version from its three components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse, returning `None` instead of an error.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

impl FromStr for ReleaseVersion {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| PatchError::InvalidVersion {
            version: s.to_string(),
            reason: reason.to_string(),
        };

        let digits = s.strip_prefix('v').unwrap_or(s);
        if digits.is_empty() {
            return Err(invalid("empty version string"));
        }

        let mut parts = [0u64; 3];
        let mut count = 0;
        for piece in digits.split('.') {
            if count == 3 {
                return Err(invalid("more than three components"));
            }
            if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("components must be non-negative integers"));
            }
            parts[count] = piece.parse().map_err(|_| invalid("component out of range"))?;
            count += 1;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Returns `true` when `version` is strictly older than `floor`.
///
/// A version that cannot be parsed counts as older than any floor: an
/// installation that cannot report a valid version cannot be proven to be
/// above a breaking boundary. An unparseable floor is ignored.
pub fn is_below_floor(version: &str, floor: &str) -> bool {
    let Some(floor) = ReleaseVersion::parse_lenient(floor) else {
        return false;
    };
    match ReleaseVersion::parse_lenient(version) {
        Some(v) => v < floor,
        None => true,
    }
}
