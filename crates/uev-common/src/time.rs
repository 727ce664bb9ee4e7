//! ---
//! uev_section: "01-core-functionality"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Shared primitives and utilities for the events client."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
//! Client-side clocks used to timestamp soft events.
//!
//! Every timestamp placed on the wire comes from a [`SessionClock`]. The clock
//! is created once per session and handed to whoever captures timestamps, so
//! there is no process-wide start time and tests can substitute a manual clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Which time base a session reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Seconds elapsed since the session started.
    #[default]
    Uptime,
    /// Seconds since the UNIX epoch.
    Epoch,
}

#[derive(Debug, Clone)]
enum Source {
    Monotonic { origin: Instant, offset_secs: f64 },
    Manual(Arc<AtomicU64>),
}

/// Session time source exposing `now()` in seconds as `f64`.
///
/// Clones share the same origin. The monotonic variants are driven by
/// [`Instant`], so successive readings never decrease even if the wall clock
/// is stepped during a session.
#[derive(Debug, Clone)]
pub struct SessionClock {
    source: Source,
}

/// Control handle for a clock created with [`SessionClock::manual`].
#[derive(Debug, Clone)]
pub struct ManualClockHandle {
    bits: Arc<AtomicU64>,
}

impl SessionClock {
    /// Up-time clock starting at `0.0` now.
    pub fn start() -> Self {
        Self {
            source: Source::Monotonic {
                origin: Instant::now(),
                offset_secs: 0.0,
            },
        }
    }

    /// Epoch clock, anchored to the system clock once at construction.
    pub fn epoch() -> Self {
        let anchor = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            source: Source::Monotonic {
                origin: Instant::now(),
                offset_secs: anchor.as_secs_f64(),
            },
        }
    }

    /// Build a clock for the configured mode.
    pub fn for_mode(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Uptime => Self::start(),
            ClockMode::Epoch => Self::epoch(),
        }
    }

    /// Clock that only moves when told to.
    pub fn manual(start: f64) -> (Self, ManualClockHandle) {
        let bits = Arc::new(AtomicU64::new(start.to_bits()));
        (
            Self {
                source: Source::Manual(bits.clone()),
            },
            ManualClockHandle { bits },
        )
    }

    /// Current session time in seconds.
    pub fn now(&self) -> f64 {
        match &self.source {
            Source::Monotonic {
                origin,
                offset_secs,
            } => offset_secs + origin.elapsed().as_secs_f64(),
            Source::Manual(bits) => f64::from_bits(bits.load(Ordering::Acquire)),
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}

impl ManualClockHandle {
    /// Jump the clock to `secs`.
    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::Release);
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let current = f64::from_bits(self.bits.load(Ordering::Acquire));
        self.set(current + by.as_secs_f64());
    }
}

/// Convert a duration into microseconds, saturating at `u64::MAX`.
pub fn duration_to_micros(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(1_000_000)
        .saturating_add(u64::from(duration.subsec_micros()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_clock_starts_near_zero_and_never_decreases() {
        let clock = SessionClock::start();
        let first = clock.now();
        assert!((0.0..1.0).contains(&first));
        let mut previous = first;
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn clones_share_origin() {
        let clock = SessionClock::start();
        std::thread::sleep(Duration::from_millis(5));
        let copy = clock.clone();
        assert!(copy.now() >= 0.005);
    }

    #[test]
    fn epoch_clock_is_absolute() {
        let clock = SessionClock::for_mode(ClockMode::Epoch);
        // 2020-01-01T00:00:00Z
        assert!(clock.now() > 1_577_836_800.0);
    }

    #[test]
    fn manual_clock_follows_handle() {
        let (clock, handle) = SessionClock::manual(420.69);
        assert_eq!(clock.now(), 420.69);
        handle.advance(Duration::from_millis(500));
        assert!((clock.now() - 421.19).abs() < 1e-9);
        handle.set(1.0);
        assert_eq!(clock.now(), 1.0);
    }

    #[test]
    fn micros_conversion_saturates() {
        assert_eq!(duration_to_micros(Duration::from_millis(3)), 3_000);
        assert_eq!(duration_to_micros(Duration::MAX), u64::MAX);
    }
}
