//! Unit and precision conversion.
//!
//! All internal timestamps are expressed in one fixed time unit `T`
//! ([`TimeUnit`]), configured once per pipeline. The wire protocols speak
//! nanoseconds, microseconds or milliseconds ([`Precision`]). Every timestamp
//! transformation in both the fetch and write pipelines routes through the
//! pure functions in this module, so the two directions stay consistent if
//! the internal unit ever changes.

use crate::error::{Error, Result};

/// Timestamp precision of the wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Precision {
    /// Nanoseconds since the epoch.
    Nanoseconds,
    /// Microseconds since the epoch.
    Microseconds,
    /// Milliseconds since the epoch.
    Milliseconds,
}

impl Precision {
    /// Number of wire ticks per second for this precision.
    pub const fn ticks_per_second(self) -> i64 {
        match self {
            Precision::Nanoseconds => 1_000_000_000,
            Precision::Microseconds => 1_000_000,
            Precision::Milliseconds => 1_000,
        }
    }

    /// Token used in InfluxDB write URLs (`precision=` query parameter).
    pub const fn as_str(self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "us",
            Precision::Milliseconds => "ms",
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The internal time unit `T`: how many internal ticks make up one second.
///
/// Commonly microseconds (`TimeUnit::MICROSECONDS`). The unit is a property
/// of the pipeline configuration, carried explicitly rather than cached in
/// process-wide state, so multiple configurations can coexist in one process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeUnit {
    per_second: i64,
}

impl TimeUnit {
    /// Internal ticks are nanoseconds.
    pub const NANOSECONDS: TimeUnit = TimeUnit { per_second: 1_000_000_000 };
    /// Internal ticks are microseconds.
    pub const MICROSECONDS: TimeUnit = TimeUnit { per_second: 1_000_000 };
    /// Internal ticks are milliseconds.
    pub const MILLISECONDS: TimeUnit = TimeUnit { per_second: 1_000 };

    /// Build a unit from an arbitrary ticks-per-second ratio.
    pub const fn new(per_second: i64) -> Self {
        TimeUnit { per_second }
    }

    /// Internal ticks per second.
    pub const fn per_second(self) -> i64 {
        self.per_second
    }

    /// Internal ticks per millisecond.
    pub const fn per_millisecond(self) -> i64 {
        self.per_second / 1_000
    }

    /// The wire precision whose scale exactly matches this unit.
    ///
    /// Fails when the unit is none of {1e9, 1e6, 1e3} ticks per second. This
    /// check runs once at pipeline construction, never per point.
    pub fn wire_precision(self) -> Result<Precision> {
        match self.per_second {
            1_000_000_000 => Ok(Precision::Nanoseconds),
            1_000_000 => Ok(Precision::Microseconds),
            1_000 => Ok(Precision::Milliseconds),
            other => Err(Error::Config(format!(
                "no wire precision matches {} internal ticks per second",
                other
            ))),
        }
    }
}

/// Convert an internal timestamp to a wire timestamp of the given precision.
///
/// Exact (and invertible by [`wire_to_internal`]) whenever the precision is
/// at least as fine as the internal unit; coarser precisions truncate.
pub fn internal_to_wire(ts: i64, unit: TimeUnit, precision: Precision) -> i64 {
    let wire = precision.ticks_per_second();
    let internal = unit.per_second();
    if wire >= internal {
        ts * (wire / internal)
    } else {
        ts / (internal / wire)
    }
}

/// Convert a wire timestamp of the given precision back to the internal unit.
pub fn wire_to_internal(raw: i64, unit: TimeUnit, precision: Precision) -> i64 {
    let wire = precision.ticks_per_second();
    let internal = unit.per_second();
    if wire >= internal {
        raw / (wire / internal)
    } else {
        raw * (internal / wire)
    }
}

/// Rescale an InfluxQL result timestamp to the internal unit.
///
/// The 1.x query path requests `epoch=ns`, so timestamps arrive as floating
/// point nanosecond values: truncate, then divide by `1e9 / T_per_second`.
pub fn wide_row_timestamp(nanos: f64, unit: TimeUnit) -> i64 {
    (nanos as i64) / (1_000_000_000 / unit.per_second())
}

/// Rescale a Flux `_time` instant to the internal unit.
///
/// The 2.x path reconstructs nanoseconds from the instant and divides by
/// `1e6 / T_per_millisecond`. For the supported units this agrees with
/// [`wide_row_timestamp`], but the ratio is derived differently; both
/// formulas are preserved as-is and pinned independently by tests.
pub fn instant_timestamp(epoch_seconds: i64, subsec_nanos: u32, unit: TimeUnit) -> i64 {
    let nanos = epoch_seconds * 1_000_000_000 + subsec_nanos as i64;
    nanos / (1_000_000 / unit.per_millisecond())
}
