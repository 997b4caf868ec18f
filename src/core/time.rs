//! Time representation in nanoseconds.
//! Frame timestamps, seek targets and the overlay clock all use this unit.

use std::time::Duration;

/// Time in nanoseconds
pub type Time = i64;

/// Time constants for conversions
pub mod constants {
    use super::Time;

    pub const NANOS_PER_MILLI: Time = 1_000_000;
    pub const NANOS_PER_MICRO: Time = 1_000;
}

/// Start of stream
pub const ZERO: Time = 0;

/// Nanoseconds to whole milliseconds, truncating
#[inline]
pub fn to_millis(nanos: Time) -> i64 {
    nanos / constants::NANOS_PER_MILLI
}

/// Convert a std `Duration` to nanoseconds, saturating at `Time::MAX`
#[inline]
pub fn from_duration(duration: Duration) -> Time {
    Time::try_from(duration.as_nanos()).unwrap_or(Time::MAX)
}
