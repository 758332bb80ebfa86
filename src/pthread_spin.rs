//! Wrapper around the platform pthread spinlock.
//!
//! [`PthreadSpinLock`] exposes the same guarded surface as the locks in
//! [`spinlock`](crate::spinlock), backed by `pthread_spin_*`. It exists so
//! that harnesses can compare the library's locks against whatever the
//! platform ships.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A spinlock backed by `pthread_spinlock_t`.
pub struct PthreadSpinLock<T: ?Sized> {
    lock: UnsafeCell<libc::pthread_spinlock_t>,
    data: UnsafeCell<T>,
}

impl<T> PthreadSpinLock<T> {
    /// Create a new unlocked lock.
    ///
    /// Aborts if the platform fails to initialize the spinlock.
    pub fn new(data: T) -> Self {
        let lock = Self {
            lock: UnsafeCell::new(0),
            data: UnsafeCell::new(data),
        };
        let rc = unsafe { libc::pthread_spin_init(lock.lock.get(), libc::PTHREAD_PROCESS_PRIVATE) };
        assert_eq!(rc, 0, "pthread_spin_init failed");
        lock
    }

    /// Try to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<PthreadSpinLockGuard<'_, T>> {
        let rc = unsafe { libc::pthread_spin_trylock(self.lock.get()) };
        if rc == 0 {
            Some(PthreadSpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquire the lock, spinning if necessary.
    #[inline]
    pub fn lock(&self) -> PthreadSpinLockGuard<'_, T> {
        let rc = unsafe { libc::pthread_spin_lock(self.lock.get()) };
        debug_assert_eq!(rc, 0);
        PthreadSpinLockGuard { lock: self }
    }
}

impl<T: ?Sized> Drop for PthreadSpinLock<T> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_spin_destroy(self.lock.get()) };
        debug_assert_eq!(rc, 0);
    }
}

unsafe impl<T: Send> Send for PthreadSpinLock<T> {}
unsafe impl<T: Send> Sync for PthreadSpinLock<T> {}

/// RAII guard for [`PthreadSpinLock`].
pub struct PthreadSpinLockGuard<'a, T: ?Sized> {
    lock: &'a PthreadSpinLock<T>,
}

impl<T: ?Sized> Deref for PthreadSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for PthreadSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for PthreadSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_spin_unlock(self.lock.lock.get()) };
        debug_assert_eq!(rc, 0);
    }
}
