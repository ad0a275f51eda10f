//! Utilities to deal with date-time types.

use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Number of seconds in a minute, the granularity of session aggregate buckets.
const SECONDS_PER_MINUTE: u64 = 60;

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current timestamp.
    ///
    /// Clocks set before the UNIX epoch yield the epoch itself.
    #[inline]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(secs)
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Converts the timestamp into a chrono `DateTime`.
    ///
    /// Returns `None` if the timestamp is out of the range chrono can represent.
    pub fn as_datetime(self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.0).ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    /// Truncates the timestamp to the start of its enclosing interval of `width` seconds.
    ///
    /// A width of `0` leaves the timestamp unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use beacon_common::UnixTimestamp;
    ///
    /// let ts = UnixTimestamp::from_secs(125);
    /// assert_eq!(ts.truncate(60), UnixTimestamp::from_secs(120));
    /// ```
    pub fn truncate(self, width: u64) -> Self {
        match width {
            0 => self,
            width => Self(self.0 - self.0 % width),
        }
    }

    /// Truncates the timestamp to the start of its minute.
    pub fn truncate_to_minute(self) -> Self {
        self.truncate(SECONDS_PER_MINUTE)
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_secs(), f)
    }
}
