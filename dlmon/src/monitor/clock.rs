//! Clock reconciliation
//!
//! Probes stamp records with `bpf_ktime_get_ns()`, which is `CLOCK_MONOTONIC`.
//! Wall-clock time is recovered by adding the offset between `CLOCK_REALTIME`
//! and `CLOCK_MONOTONIC`.
//!
//! In [`ClockMode::PerEvent`] the offset is sampled when the record is
//! consumed, not when it was produced, so a step of the realtime clock between
//! the two moves the rendered time by the same amount. Drift and buffering
//! delay are not corrected. [`ClockMode::Fixed`] samples the offset once at
//! startup instead.
//!
//! Timestamps render in UTC: local time repeats an hour when daylight saving
//! ends, and the rendered text must sort chronologically.

#![allow(unsafe_code)] // clock_gettime

use chrono::{DateTime, Utc};

/// Rendering used for reconciled timestamps; sorts lexicographically
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Source of the two clocks being reconciled
pub trait ClockSource {
    fn realtime_ns(&self) -> u64;
    fn monotonic_ns(&self) -> u64;
}

/// The host's clocks via `clock_gettime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

fn clock_gettime_ns(clock: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: ts is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return 0;
    }
    u64::try_from(ts.tv_sec).unwrap_or(0) * 1_000_000_000 + u64::try_from(ts.tv_nsec).unwrap_or(0)
}

impl ClockSource for SystemClock {
    fn realtime_ns(&self) -> u64 {
        clock_gettime_ns(libc::CLOCK_REALTIME)
    }

    fn monotonic_ns(&self) -> u64 {
        clock_gettime_ns(libc::CLOCK_MONOTONIC)
    }
}

/// When the realtime/monotonic offset is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Sample at consumption time, for every record
    #[default]
    PerEvent,
    /// Sample once at startup
    Fixed,
}

/// Converts monotonic probe timestamps to wall-clock time
pub struct ClockReconciler<C: ClockSource> {
    clock: C,
    mode: ClockMode,
    startup_offset_ns: i128,
}

impl<C: ClockSource> ClockReconciler<C> {
    pub fn new(clock: C, mode: ClockMode) -> Self {
        let startup_offset_ns = current_offset(&clock);
        Self { clock, mode, startup_offset_ns }
    }

    /// Realtime minus monotonic, in nanoseconds, under the configured mode
    #[must_use]
    pub fn offset_ns(&self) -> i128 {
        match self.mode {
            ClockMode::PerEvent => current_offset(&self.clock),
            ClockMode::Fixed => self.startup_offset_ns,
        }
    }

    /// Nanoseconds since the Unix epoch for a monotonic timestamp
    #[must_use]
    pub fn wall_clock_ns(&self, monotonic_ns: u64) -> i128 {
        i128::from(monotonic_ns) + self.offset_ns()
    }

    /// UTC rendering of a monotonic timestamp
    #[must_use]
    pub fn format(&self, monotonic_ns: u64) -> String {
        format_wall_clock(self.wall_clock_ns(monotonic_ns))
    }
}

fn current_offset<C: ClockSource>(clock: &C) -> i128 {
    i128::from(clock.realtime_ns()) - i128::from(clock.monotonic_ns())
}

/// Render epoch nanoseconds in UTC using [`TIMESTAMP_FORMAT`]
///
/// Out-of-range values clamp to the epoch.
#[must_use]
pub fn format_wall_clock(epoch_ns: i128) -> String {
    let secs = i64::try_from(epoch_ns.div_euclid(NANOS_PER_SEC)).unwrap_or(0);
    let nanos = u32::try_from(epoch_ns.rem_euclid(NANOS_PER_SEC)).unwrap_or(0);
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .unwrap_or_default()
        .format(TIMESTAMP_FORMAT)
        .to_string()
}
