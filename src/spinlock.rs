//! Test-and-set spinlocks.
//!
//! This module provides the two simplest mutual-exclusion locks:
//!
//! - [`TasLock`] - test-and-set: retry the atomic exchange until it observes
//!   the lock free. Cheapest under no contention.
//! - [`TtasLock`] - test-and-test-and-set: between failed exchanges, spin on a
//!   plain load until the lock looks free. The read-only wait keeps the line
//!   shared instead of bouncing it, which matters from about three contenders
//!   up.
//!
//! Both are unfair; a thread can be overtaken arbitrarily often. Both accept
//! a [`Backoff`] policy through [`lock_with`](TasLock::lock_with).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::backoff::{Backoff, NoBackoff};

/// A test-and-set spinlock.
#[repr(C)]
pub struct TasLock<T: ?Sized> {
    state: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> TasLock<T> {
    /// Create a new unlocked lock.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            state: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Try to acquire the lock with a single exchange.
    #[inline]
    pub fn try_lock(&self) -> Option<TasLockGuard<'_, T>> {
        if self.state.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(TasLockGuard { lock: self })
        }
    }

    /// Acquire the lock, spinning if necessary.
    #[inline]
    pub fn lock(&self) -> TasLockGuard<'_, T> {
        self.lock_with(&NoBackoff)
    }

    /// Acquire the lock, invoking `backoff` between failed attempts.
    pub fn lock_with<B: Backoff>(&self, backoff: &B) -> TasLockGuard<'_, T> {
        while self.state.swap(true, Ordering::AcqRel) {
            backoff.backoff();
        }
        TasLockGuard { lock: self }
    }

    /// Check if the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed)
    }
}

unsafe impl<T: Send> Send for TasLock<T> {}
unsafe impl<T: Send> Sync for TasLock<T> {}

/// RAII guard for [`TasLock`].
pub struct TasLockGuard<'a, T: ?Sized> {
    lock: &'a TasLock<T>,
}

impl<T: ?Sized> Deref for TasLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TasLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TasLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(false, Ordering::Release);
    }
}

/// A test-and-test-and-set spinlock.
///
/// Identical surface to [`TasLock`]; the acquire path differs only in the
/// read-only inner wait.
#[repr(C)]
pub struct TtasLock<T: ?Sized> {
    state: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> TtasLock<T> {
    /// Create a new unlocked lock.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            state: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Try to acquire the lock with a single exchange.
    #[inline]
    pub fn try_lock(&self) -> Option<TtasLockGuard<'_, T>> {
        if self.state.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(TtasLockGuard { lock: self })
        }
    }

    /// Acquire the lock, spinning if necessary.
    #[inline]
    pub fn lock(&self) -> TtasLockGuard<'_, T> {
        self.lock_with(&NoBackoff)
    }

    /// Acquire the lock, invoking `backoff` inside the read-only wait.
    pub fn lock_with<B: Backoff>(&self, backoff: &B) -> TtasLockGuard<'_, T> {
        while self.state.swap(true, Ordering::AcqRel) {
            while self.state.load(Ordering::Relaxed) {
                backoff.backoff();
            }
        }
        TtasLockGuard { lock: self }
    }

    /// Check if the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed)
    }
}

unsafe impl<T: Send> Send for TtasLock<T> {}
unsafe impl<T: Send> Sync for TtasLock<T> {}

/// RAII guard for [`TtasLock`].
pub struct TtasLockGuard<'a, T: ?Sized> {
    lock: &'a TtasLock<T>,
}

impl<T: ?Sized> Deref for TtasLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TtasLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TtasLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(false, Ordering::Release);
    }
}
