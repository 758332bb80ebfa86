//! Linearization-point timers.
//!
//! For checking linearizability, each queue operation brackets its committing
//! atomic step with two CPU-cycle stamps. The interval `[before, after]`
//! bounds the instant the operation took effect; a history is linearizable if
//! some choice of one point per interval yields a valid sequential one.
//!
//! Stamps are best-effort bounds. Out-of-order execution can slide the
//! counter read relative to the committing instruction, so consumers should
//! tolerate overlapping intervals rather than expect a total order.
//!
//! The [`LinearizationClock`] trait is a compile-time mixin: structures take
//! it as a type parameter, [`NoClock`] erases every call, and [`CycleClock`]
//! records into per-thread padded slots.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::cc::CachePadded;
use crate::registry;

/// A CPU-cycle (or equivalent monotonic) timestamp.
pub type TimeStamp = u64;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Read the current cycle counter.
        #[inline]
        pub fn timestamp() -> TimeStamp {
            unsafe { core::arch::x86_64::_rdtsc() }
        }
    } else {
        /// Read a monotonic nanosecond counter.
        #[inline]
        pub fn timestamp() -> TimeStamp {
            use std::sync::OnceLock;
            use std::time::Instant;

            static EPOCH: OnceLock<Instant> = OnceLock::new();
            let epoch = *EPOCH.get_or_init(Instant::now);
            Instant::now().duration_since(epoch).as_nanos() as TimeStamp
        }
    }
}

/// Per-thread recording of the stamps around an operation's commit point.
pub trait LinearizationClock {
    /// Create the clock for `thread_num` threads.
    fn with_threads(thread_num: usize) -> Self;

    /// Stamp the calling thread's *before* mark.
    fn mark_before(&self);

    /// Stamp the calling thread's *after* mark.
    fn mark_after(&self);

    /// Thread `tid`'s last *before* stamp.
    fn before(&self, tid: usize) -> TimeStamp;

    /// Thread `tid`'s last *after* stamp.
    fn after(&self, tid: usize) -> TimeStamp;
}

/// The disabled clock: every operation is a no-op and costs nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClock;

impl LinearizationClock for NoClock {
    #[inline]
    fn with_threads(_thread_num: usize) -> Self {
        NoClock
    }

    #[inline]
    fn mark_before(&self) {}

    #[inline]
    fn mark_after(&self) {}

    #[inline]
    fn before(&self, _tid: usize) -> TimeStamp {
        0
    }

    #[inline]
    fn after(&self, _tid: usize) -> TimeStamp {
        0
    }
}

struct StampPair {
    before: AtomicU64,
    after: AtomicU64,
}

/// Records cycle stamps into one padded slot pair per thread.
pub struct CycleClock {
    stamps: Box<[CachePadded<StampPair>]>,
}

impl LinearizationClock for CycleClock {
    fn with_threads(thread_num: usize) -> Self {
        let stamps = (0..thread_num)
            .map(|_| {
                CachePadded::new(StampPair {
                    before: AtomicU64::new(0),
                    after: AtomicU64::new(0),
                })
            })
            .collect();
        Self { stamps }
    }

    #[inline]
    fn mark_before(&self) {
        self.stamps[registry::thread_id()]
            .before
            .store(timestamp(), Ordering::Relaxed);
    }

    #[inline]
    fn mark_after(&self) {
        self.stamps[registry::thread_id()]
            .after
            .store(timestamp(), Ordering::Relaxed);
    }

    #[inline]
    fn before(&self, tid: usize) -> TimeStamp {
        self.stamps[tid].before.load(Ordering::Relaxed)
    }

    #[inline]
    fn after(&self, tid: usize) -> TimeStamp {
        self.stamps[tid].after.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_advances() {
        let a = timestamp();
        for _ in 0..10_000 {
            core::hint::spin_loop();
        }
        let b = timestamp();
        assert!(b > a);
    }

    #[test]
    fn test_no_clock_is_free() {
        assert_eq!(core::mem::size_of::<NoClock>(), 0);
        let clock = NoClock::with_threads(8);
        clock.mark_before();
        clock.mark_after();
        assert_eq!(clock.before(0), 0);
        assert_eq!(clock.after(0), 0);
    }

    #[test]
    fn test_cycle_clock_records() {
        let _serial = crate::test_util::registry_lock();
        registry::init_thread();
        let tid = registry::thread_id();

        let clock = CycleClock::with_threads(tid + 1);
        clock.mark_before();
        clock.mark_after();
        assert_ne!(clock.before(tid), 0);
        assert_ne!(clock.after(tid), 0);
    }
}
