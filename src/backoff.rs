//! Backoff policies for contention management.
//!
//! When several threads compete for the same lock word, retrying the failed
//! atomic at full speed only multiplies coherence traffic. Spin loops instead
//! invoke a backoff policy between attempts. Two policies are provided:
//! [`NoBackoff`], which returns immediately, and [`ExpBackoff`], which
//! busy-waits for an exponentially growing slice of wall-clock time.
//!
//! The policy is advisory. It provides no ordering or fairness guarantee and
//! never suspends the thread in the scheduler sense.
//!
//! # Example
//!
//! ```
//! use spinkit::backoff::{Backoff, ExpBackoff};
//! use std::time::Duration;
//!
//! let backoff = ExpBackoff::new(Duration::from_nanos(100), Duration::from_micros(10));
//!
//! loop {
//!     if try_acquire_lock() {
//!         break;
//!     }
//!     backoff.backoff();
//! }
//! # fn try_acquire_lock() -> bool { true }
//! ```

use core::cell::Cell;
use core::hint;
use std::time::{Duration, Instant};

/// The capability to suspend the caller briefly.
pub trait Backoff {
    /// Wait a bit before the caller's next attempt.
    fn backoff(&self);
}

/// The null policy: never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    #[inline]
    fn backoff(&self) {}
}

/// Exponential backoff bounded to `[min, max]`.
///
/// Each call busy-waits until `now + state` elapses on the monotonic clock,
/// then doubles `state`. A doubling that overshoots `max` resets the state to
/// `min` instead of saturating: under sustained contention a saturated wait
/// would keep every established spinner at the ceiling while new arrivals
/// slip in ahead, so the reset periodically hands each spinner a fresh short
/// window.
///
/// The state lives in a [`Cell`], so an instance belongs to one spinner;
/// clone it to give another call site its own progression.
#[derive(Debug, Clone)]
pub struct ExpBackoff {
    min: Duration,
    max: Duration,
    state: Cell<Duration>,
}

impl ExpBackoff {
    /// Create a policy that waits between `min` and `max` per call.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        debug_assert!(!min.is_zero());
        debug_assert!(min <= max);
        Self {
            min,
            max,
            state: Cell::new(min),
        }
    }

    /// The delay the next [`backoff`](Backoff::backoff) call will wait for.
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.state.get()
    }
}

impl Backoff for ExpBackoff {
    fn backoff(&self) {
        let deadline = Instant::now() + self.state.get();
        let doubled = self.state.get() * 2;
        self.state.set(if doubled > self.max { self.min } else { doubled });
        while Instant::now() < deadline {
            hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backoff_returns() {
        let b = NoBackoff;
        b.backoff();
        b.backoff();
    }

    #[test]
    fn test_delay_doubles() {
        let b = ExpBackoff::new(Duration::from_nanos(100), Duration::from_nanos(1000));
        assert_eq!(b.delay(), Duration::from_nanos(100));

        b.backoff();
        assert_eq!(b.delay(), Duration::from_nanos(200));

        b.backoff();
        assert_eq!(b.delay(), Duration::from_nanos(400));
    }

    #[test]
    fn test_delay_resets_past_max() {
        let b = ExpBackoff::new(Duration::from_nanos(100), Duration::from_nanos(350));

        b.backoff(); // 100 -> 200
        b.backoff(); // 200 -> 400 > max, reset
        assert_eq!(b.delay(), Duration::from_nanos(100));
    }

    #[test]
    fn test_waits_at_least_delay() {
        let min = Duration::from_micros(50);
        let b = ExpBackoff::new(min, Duration::from_millis(1));
        let start = Instant::now();
        b.backoff();
        assert!(start.elapsed() >= min);
    }

    #[test]
    fn test_clone_gets_own_state() {
        let a = ExpBackoff::new(Duration::from_nanos(100), Duration::from_nanos(1000));
        a.backoff();
        let b = a.clone();
        a.backoff();
        assert_eq!(b.delay(), Duration::from_nanos(200));
        assert_eq!(a.delay(), Duration::from_nanos(400));
    }
}
