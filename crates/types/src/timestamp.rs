// This file is part of Courier.
//
// Courier is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Courier is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Courier.
// If not, see https://www.gnu.org/licenses/.

//! Wall clock timestamps and the validity windows reported by simulation.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, Sub},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, LocalResult, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds since the unix epoch.
///
/// Arithmetic with a `Duration` saturates instead of overflowing, so
/// `Timestamp::MAX` can safely stand in for "never expires".
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch
    pub const MIN: Timestamp = Timestamp(u64::MIN);
    /// Far future, used as an open upper bound
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Create from seconds since the epoch.
    pub const fn new(seconds_since_epoch: u64) -> Self {
        Self(seconds_since_epoch)
    }

    /// The current wall clock time. A clock set before the epoch reads as the epoch.
    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        )
    }

    /// Seconds since the epoch
    pub fn seconds_since_epoch(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, duration: Duration) -> Self::Output {
        Self(self.0.saturating_add(duration.as_secs()))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, duration: Duration) -> Self::Output {
        Self(self.0.saturating_sub(duration.as_secs()))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let datetime = i64::try_from(self.0)
            .ok()
            .and_then(|secs| match Utc.timestamp_opt(secs, 0) {
                LocalResult::Single(dt) => Some(dt),
                _ => None,
            });
        match datetime {
            Some(dt) => Display::fmt(&dt, f),
            None => write!(f, "later than {}", DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl Debug for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({} = {})", self.0, self)
    }
}

/// The `[valid_after, valid_until]` window in which an operation may be included.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidTimeRange {
    /// Earliest time the operation is valid, inclusive
    pub valid_after: Timestamp,
    /// Latest time the operation is valid, inclusive
    pub valid_until: Timestamp,
}

impl Default for ValidTimeRange {
    fn default() -> Self {
        Self::all_time()
    }
}

impl ValidTimeRange {
    /// Create a range from explicit bounds
    pub fn new(valid_after: Timestamp, valid_until: Timestamp) -> Self {
        Self {
            valid_after,
            valid_until,
        }
    }

    /// A range with no bounds
    pub fn all_time() -> Self {
        Self::new(Timestamp::MIN, Timestamp::MAX)
    }

    /// Build a range from the raw `uint48` values returned by the entry point,
    /// where a `validUntil` of zero means the operation never expires.
    pub fn from_entry_point(valid_after: u64, valid_until: u64) -> Self {
        let valid_until = if valid_until == 0 {
            Timestamp::MAX
        } else {
            Timestamp::new(valid_until)
        };
        Self::new(Timestamp::new(valid_after), valid_until)
    }

    /// True if `timestamp` is inside the range with at least `buffer` left before it closes.
    pub fn contains(self, timestamp: Timestamp, buffer: Duration) -> bool {
        self.valid_after <= timestamp && timestamp + buffer <= self.valid_until
    }

    /// True if the range has closed as of `timestamp`
    pub fn is_expired_at(self, timestamp: Timestamp) -> bool {
        self.valid_until < timestamp
    }

    /// True if the range has not yet opened as of `timestamp`
    pub fn is_pending_at(self, timestamp: Timestamp) -> bool {
        timestamp < self.valid_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_arithmetic() {
        assert_eq!(Timestamp::MAX + Duration::from_secs(10), Timestamp::MAX);
        assert_eq!(Timestamp::new(5) - Duration::from_secs(10), Timestamp::MIN);
        assert_eq!(Timestamp::new(5) + Duration::from_secs(10), Timestamp::new(15));
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::new(0).to_string(), "1970-01-01 00:00:00 UTC");
        assert!(Timestamp::MAX.to_string().starts_with("later than"));
    }

    #[test]
    fn test_zero_valid_until_is_open() {
        let range = ValidTimeRange::from_entry_point(100, 0);
        assert_eq!(range.valid_until, Timestamp::MAX);
        assert!(!range.is_expired_at(Timestamp::new(u64::MAX - 1)));
        assert!(range.is_pending_at(Timestamp::new(99)));
        assert!(!range.is_pending_at(Timestamp::new(100)));
    }

    #[test]
    fn test_contains_with_buffer() {
        let range = ValidTimeRange::new(Timestamp::new(10), Timestamp::new(100));
        assert!(range.contains(Timestamp::new(50), Duration::from_secs(50)));
        assert!(!range.contains(Timestamp::new(50), Duration::from_secs(51)));
        assert!(!range.contains(Timestamp::new(9), Duration::ZERO));
    }

    #[test]
    fn test_serializes_as_number() {
        let json = serde_json::to_string(&Timestamp::new(42)).unwrap();
        assert_eq!(json, "42");
    }
}
