//! Bounded anonymous array lock.
//!
//! An Anderson-style queue lock: a ring of per-waiter flags and a global
//! ticket counter. A locker takes a ticket, reduces it to a slot index, and
//! spins on its own slot until the previous holder passes the baton along the
//! ring. Each waiter spins on a private cache line, so handoff invalidates
//! one line instead of all of them.
//!
//! Acquisition order is FIFO by ticket. There is no `try_lock`: a ticket,
//! once drawn, cannot be returned to the counter.
//!
//! The ring is sized at construction for a fixed number of participating
//! threads; at most `thread_num` threads may hold or wait for the lock at any
//! moment.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cc::{pow2_mask, CachePadded};

/// A bounded anonymous queue lock.
///
/// # Example
///
/// ```
/// use spinkit::array_lock::ArrayLock;
///
/// let lock = ArrayLock::new(4, 0u64);
/// *lock.lock() += 1;
/// assert_eq!(*lock.lock(), 1);
/// ```
pub struct ArrayLock<T: ?Sized> {
    slots: Box<[CachePadded<AtomicBool>]>,
    ticket: AtomicUsize,
    mask: usize,
    data: UnsafeCell<T>,
}

impl<T> ArrayLock<T> {
    /// Create a new unlocked lock serving up to `thread_num` threads.
    ///
    /// The ring is sized to the next power of two so that ticket arithmetic
    /// reduces to a mask.
    pub fn new(thread_num: usize, data: T) -> Self {
        assert!(thread_num > 0);
        let mask = pow2_mask(thread_num);
        let slots: Box<[_]> = (0..=mask)
            .map(|i| CachePadded::new(AtomicBool::new(i == 0)))
            .collect();
        Self {
            slots,
            ticket: AtomicUsize::new(0),
            mask,
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, spinning on this ticket's slot.
    pub fn lock(&self) -> ArrayLockGuard<'_, T> {
        let handle = self.ticket.fetch_add(1, Ordering::AcqRel) & self.mask;
        while !self.slots[handle].load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        ArrayLockGuard { lock: self, handle }
    }
}

unsafe impl<T: Send> Send for ArrayLock<T> {}
unsafe impl<T: Send> Sync for ArrayLock<T> {}

/// RAII guard for [`ArrayLock`]; carries the holder's slot handle.
pub struct ArrayLockGuard<'a, T: ?Sized> {
    lock: &'a ArrayLock<T>,
    handle: usize,
}

impl<T: ?Sized> ArrayLockGuard<'_, T> {
    /// The slot index this acquisition was served at.
    ///
    /// Consecutive acquisitions are served at consecutive slots modulo the
    /// ring size.
    #[inline]
    pub fn handle(&self) -> usize {
        self.handle
    }
}

impl<T: ?Sized> Deref for ArrayLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for ArrayLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for ArrayLockGuard<'_, T> {
    fn drop(&mut self) {
        let lock = self.lock;
        lock.slots[self.handle].store(false, Ordering::Relaxed);
        lock.slots[(self.handle + 1) & lock.mask].store(true, Ordering::Release);
    }
}
