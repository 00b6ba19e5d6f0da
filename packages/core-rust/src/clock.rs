//! Injectable wall-clock source.
//!
//! Blackout windows, cache expiry and clock-offset bookkeeping all read time
//! through [`ClockSource`] so tests can drive them with a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Abstraction over the system clock for dependency injection.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;

    /// Returns the current time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        millis_to_utc(self.now_ms())
    }
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Converts epoch milliseconds to a UTC timestamp, saturating at the epoch
/// for out-of-range values.
#[must_use]
pub fn millis_to_utc(millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Saturating conversion of a duration to whole milliseconds.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn millis_convert_to_utc() {
        let ts = millis_to_utc(1_700_000_000_123);
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(millis_to_utc(u64::MAX), DateTime::UNIX_EPOCH);
    }

    proptest! {
        #[test]
        fn utc_conversion_preserves_millis(millis in 0_u64..8_000_000_000_000) {
            prop_assert_eq!(millis_to_utc(millis).timestamp_millis(), i64::try_from(millis).unwrap());
        }

        #[test]
        fn duration_ms_never_wraps(secs in any::<u64>(), nanos in 0_u32..1_000_000_000) {
            let duration = Duration::new(secs, nanos);
            let expected = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
            prop_assert_eq!(duration_ms(duration), expected);
        }
    }
}
