//! Wall-clock timestamps and the busy-wait primitives built on top of them.
//!
//! The wire format freezes `Timestamp` as `(sec: u64, nsec: u32)`, matching
//! POSIX `CLOCK_REALTIME` semantics (§3, §9). All "wait until instant T"
//! logic in the orchestrator and the client agents polls this representation
//! directly rather than converting through `std::time::Instant`, since
//! `Instant` has no defined relationship to wall-clock time across processes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A (seconds, nanoseconds) pair matching `CLOCK_REALTIME`.
///
/// `nsec` is always less than 1_000_000_000; arithmetic helpers normalize
/// the carry rather than leaving it to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub sec: u64,
    pub nsec: u32,
}

const NANOS_PER_SEC: u32 = 1_000_000_000;

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    pub fn new(sec: u64, nsec: u32) -> Self {
        let mut ts = Timestamp { sec, nsec };
        ts.normalize();
        ts
    }

    fn normalize(&mut self) {
        if self.nsec >= NANOS_PER_SEC {
            self.sec += (self.nsec / NANOS_PER_SEC) as u64;
            self.nsec %= NANOS_PER_SEC;
        }
    }

    /// Read the current wall-clock instant.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            sec: since_epoch.as_secs(),
            nsec: since_epoch.subsec_nanos(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// `prepare_timestamp(t, d)` — add a duration to a timestamp with carry
    /// into seconds, modulo 1e9 ns (§8 round-trip laws).
    pub fn add_duration(self, d: Duration) -> Self {
        let extra_nsec = self.nsec as u64 + d.subsec_nanos() as u64;
        Timestamp::new(
            self.sec + d.as_secs() + extra_nsec / NANOS_PER_SEC as u64,
            (extra_nsec % NANOS_PER_SEC as u64) as u32,
        )
    }

    /// Saturating difference `self - earlier`, clamped to zero if `self`
    /// precedes `earlier`.
    pub fn saturating_sub(self, earlier: Timestamp) -> Duration {
        if self < earlier {
            return Duration::ZERO;
        }
        let sec_diff = self.sec - earlier.sec;
        if self.nsec >= earlier.nsec {
            Duration::new(sec_diff, self.nsec - earlier.nsec)
        } else {
            Duration::new(sec_diff - 1, NANOS_PER_SEC + self.nsec - earlier.nsec)
        }
    }

    /// `round_up_to_next_second(now)` — the next whole second boundary,
    /// strictly after `now` when `now` already falls on one.
    pub fn round_up_to_next_second(self) -> Self {
        if self.nsec == 0 {
            self
        } else {
            Timestamp::new(self.sec + 1, 0)
        }
    }

    /// Strictly-in-the-future check used by the three-phase wait validation
    /// step (§4.4): `ts.sec >= now.sec`. A zero timestamp is exempt — it
    /// means "unused" (§3).
    pub fn is_valid_for_wait(self, now: Timestamp) -> bool {
        self.is_zero() || self.sec >= now.sec
    }
}

/// Busy-spin until the wall clock reaches `target`, or until `escape`
/// returns `true` (used by the generator's inter-object wait to honor the
/// `TRANSMISSION_FINISH_OBJECT` early-exit signal, §4.7 step 4).
///
/// Never sleeps: the reference's `sleep_for(1 ms)` fallback measurably skews
/// shaping below 1 ms and is explicitly out of contract (§4.7, §9).
pub fn busy_wait_until(target: Timestamp, mut escape: impl FnMut() -> bool) {
    loop {
        if Timestamp::now() > target || escape() {
            return;
        }
    }
}

/// Busy-spin for `micros` microseconds on the monotonic clock
/// (`precise_wait_us`, §4.7).
pub fn precise_wait_us(micros: u64) {
    let start = std::time::Instant::now();
    let duration = Duration::from_micros(micros);
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_duration_carries_into_seconds() {
        let ts = Timestamp::new(5, 900_000_000);
        let result = ts.add_duration(Duration::from_millis(200));
        assert_eq!(result, Timestamp::new(6, 100_000_000));
    }

    #[test]
    fn saturating_sub_borrows_across_seconds() {
        let later = Timestamp::new(7, 10);
        let earlier = Timestamp::new(6, 20);
        assert_eq!(later.saturating_sub(earlier), Duration::new(0, 999_999_990));
    }

    #[test]
    fn saturating_sub_clamps_to_zero_when_reversed() {
        let earlier = Timestamp::new(6, 20);
        let later = Timestamp::new(7, 10);
        assert_eq!(earlier.saturating_sub(later), Duration::ZERO);
    }

    #[test]
    fn round_up_to_next_second_is_identity_on_boundary() {
        let ts = Timestamp::new(42, 0);
        assert_eq!(ts.round_up_to_next_second(), ts);
    }

    #[test]
    fn round_up_to_next_second_advances_otherwise() {
        let ts = Timestamp::new(42, 1);
        assert_eq!(ts.round_up_to_next_second(), Timestamp::new(43, 0));
    }

    #[test]
    fn zero_timestamp_is_always_valid_for_wait() {
        assert!(Timestamp::ZERO.is_valid_for_wait(Timestamp::new(1_000, 0)));
    }

    #[test]
    fn stale_timestamp_fails_validation() {
        let now = Timestamp::new(1_000, 0);
        let stale = Timestamp::new(999, 0);
        assert!(!stale.is_valid_for_wait(now));
    }
}
