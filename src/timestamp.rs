use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};
use time::Duration;
use tracing::warn;

/// An absolute point in time, the unit of absolute timelocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Timestamp(u32);

impl Timestamp {
    // Seconds since the epoch fit a u32 until 2106.
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        Timestamp(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .expect("SystemTime::duration_since failed")
                .as_secs() as u32,
        )
    }

    pub fn plus(self, seconds: u32) -> Self {
        Self(self.0.saturating_add(seconds))
    }

    pub fn minus(self, seconds: u32) -> Self {
        Self(self.0.saturating_sub(seconds))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Shifts forward by a duration, saturating at the bounds. Negative
    /// durations shift backwards. Sub-second precision is dropped.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn add_duration(self, rhs: Duration) -> Timestamp {
        if rhs.is_negative() {
            return self.sub_duration(rhs.abs());
        }

        let seconds = rhs.whole_seconds();
        if seconds > i64::from(u32::MAX) {
            // Saturation hides the truncation; the caller passed a
            // nonsensical duration.
            warn!("duration of {} seconds exceeds the timestamp range", seconds);
        }

        self.plus(seconds as u32)
    }

    /// Shifts backwards by a duration, saturating at the bounds. Negative
    /// durations shift forward. Sub-second precision is dropped.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sub_duration(self, rhs: Duration) -> Timestamp {
        if rhs.is_negative() {
            return self.add_duration(rhs.abs());
        }

        let seconds = rhs.whole_seconds();
        if seconds > i64::from(u32::MAX) {
            warn!("duration of {} seconds exceeds the timestamp range", seconds);
        }

        self.minus(seconds as u32)
    }
}

/// Interprets the u32 as seconds since the UNIX epoch.
impl From<u32> for Timestamp {
    fn from(item: u32) -> Self {
        Self(item)
    }
}

/// Seconds since the UNIX epoch.
impl From<Timestamp> for u32 {
    fn from(item: Timestamp) -> Self {
        item.0
    }
}

/// Seconds since the UNIX epoch, widened for callers doing signed arithmetic.
impl From<Timestamp> for i64 {
    fn from(item: Timestamp) -> Self {
        i64::from(item.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Return the duration between two timestamps.
pub fn duration_between(t: Timestamp, u: Timestamp) -> Duration {
    let t = i64::from(t.0);
    let u = i64::from(u.0);

    Duration::seconds(u - t)
}

/// A duration used to represent a relative timelock
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RelativeTime(u32);

impl RelativeTime {
    pub const fn new(time_secs: u32) -> Self {
        RelativeTime(time_secs)
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

/// The u32 returned is the duration in seconds
impl From<RelativeTime> for u32 {
    fn from(item: RelativeTime) -> Self {
        item.0
    }
}

/// The u32 input is the duration in seconds
impl From<u32> for RelativeTime {
    fn from(item: u32) -> Self {
        Self(item)
    }
}

impl fmt::Display for RelativeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
