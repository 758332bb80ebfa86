//! MCS queue lock.
//!
//! An explicit-queue lock: each waiter contributes a node, the global tail
//! points at the most recent one, and every waiter spins on its *own* node
//! until its predecessor grants it the lock. Unlike CLH nodes, MCS nodes stay
//! with the thread that created them and are reused across its acquisitions.
//!
//! # Word encoding
//!
//! A node is a single cache-padded atomic word. The low bit is the *granted*
//! signal; the remaining bits, when non-zero, are the address of the
//! successor's node:
//!
//! - `0` - idle: neither queued nor granted;
//! - `p` with the low bit clear, `p != 0` - successor known, not yet granted;
//! - anything with the low bit set - granted.
//!
//! Node addresses are cache-line aligned, so the low bit is always free to
//! carry the signal and a single `fetch_or` publishes either half. The
//! releaser zeroes its word only after granting the successor, so the word a
//! thread reuses can never hold a stale pointer.
//!
//! Acquisition order is FIFO by the tail swap.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::cc::CachePadded;

const GRANTED: usize = 1;

/// A thread-owned MCS queue node, reusable across acquisitions.
#[derive(Default)]
pub struct McsNode {
    word: CachePadded<AtomicUsize>,
}

impl McsNode {
    /// Create an idle node.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Whether the node is idle (neither queued nor granted).
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.word.load(Ordering::Relaxed) == 0
    }
}

/// An MCS queue lock.
///
/// # Example
///
/// ```
/// use spinkit::mcs::{McsLock, McsNode};
///
/// let lock = McsLock::new(0u64);
/// let node = McsNode::new();
///
/// *lock.lock(&node) += 1;
/// assert_eq!(*lock.lock(&node), 1);
/// assert!(node.is_idle());
/// ```
pub struct McsLock<T: ?Sized> {
    tail: AtomicPtr<McsNode>,
    data: UnsafeCell<T>,
}

impl<T> McsLock<T> {
    /// Create a new unlocked lock.
    pub const fn new(data: T) -> Self {
        Self {
            tail: AtomicPtr::new(core::ptr::null_mut()),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock using the caller's `node`.
    ///
    /// The node must be idle: not enlisted in this or any other lock.
    pub fn lock<'a>(&'a self, node: &'a McsNode) -> McsGuard<'a, T> {
        debug_assert!(node.is_idle(), "MCS node already enlisted");
        let me = node as *const McsNode as *mut McsNode;
        let prev = self.tail.swap(me, Ordering::AcqRel);
        if prev.is_null() {
            node.word.fetch_or(GRANTED, Ordering::Release);
        } else {
            unsafe { &*prev }.word.fetch_or(me as usize, Ordering::Release);
            while node.word.load(Ordering::Acquire) & GRANTED == 0 {
                core::hint::spin_loop();
            }
        }
        McsGuard { lock: self, node }
    }
}

unsafe impl<T: Send> Send for McsLock<T> {}
unsafe impl<T: Send> Sync for McsLock<T> {}

/// RAII guard for [`McsLock`]; releases through the caller's node on drop.
pub struct McsGuard<'a, T: ?Sized> {
    lock: &'a McsLock<T>,
    node: &'a McsNode,
}

impl<T: ?Sized> Deref for McsGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for McsGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for McsGuard<'_, T> {
    fn drop(&mut self) {
        let me = self.node as *const McsNode as *mut McsNode;
        if self
            .lock
            .tail
            .compare_exchange(me, core::ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.node.word.store(0, Ordering::Release);
            return;
        }

        // A successor swapped itself in; wait for it to publish its node.
        let succ = loop {
            let succ = self.node.word.load(Ordering::Acquire) & !GRANTED;
            if succ != 0 {
                break succ as *mut McsNode;
            }
            core::hint::spin_loop();
        };
        unsafe { &*succ }.word.fetch_or(GRANTED, Ordering::Release);
        self.node.word.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock() {
        let lock = McsLock::new(42);
        let node = McsNode::new();

        {
            let guard = lock.lock(&node);
            assert_eq!(*guard, 42);
        }
        assert!(node.is_idle());

        let mut guard = lock.lock(&node);
        *guard = 7;
        drop(guard);
        assert_eq!(*lock.lock(&node), 7);
    }

    #[test]
    fn test_node_reuse() {
        let lock = McsLock::new(0);
        let node = McsNode::new();

        for _ in 0..10 {
            *lock.lock(&node) += 1;
            assert!(node.is_idle());
        }
        assert_eq!(*lock.lock(&node), 10);
    }

    #[test]
    fn test_counter_and_no_state_leak() {
        const THREADS: usize = 4;
        const ITERS: usize = 100_000;

        let lock = Arc::new(McsLock::new(0usize));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    let node = McsNode::new();
                    for _ in 0..ITERS {
                        *lock.lock(&node) += 1;
                    }
                    // Every word must return to idle once released.
                    assert!(node.is_idle());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(&McsNode::new()), THREADS * ITERS);
    }
}
