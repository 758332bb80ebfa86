//! CLH queue lock.
//!
//! The queue is implicit: a global tail pointer and one flag node per
//! participant. A locker swaps its own node in as the new tail and spins on
//! the flag of the node it displaced. Each waiter therefore spins on a
//! different cache line, and handoff touches only the releaser's own flag.
//!
//! # Node ownership
//!
//! CLH nodes migrate between threads. Acquisition *consumes* the caller's
//! [`ClhNode`] (it becomes the queue tail and will eventually be spun on and
//! then adopted by a successor) and the guard *produces* the predecessor's
//! node, which the releasing caller adopts as its own. A thread at rest owns
//! exactly one node; [`ClhGuard::unlock`] hands it back. Dropping the guard
//! instead releases the lock and discards the adopted node, leaving the
//! caller to allocate a fresh one before its next acquisition.
//!
//! Acquisition order is FIFO by the tail swap.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::cc::CachePadded;

type Flag = CachePadded<AtomicBool>;

/// An owning handle to one CLH queue node.
pub struct ClhNode {
    ptr: NonNull<Flag>,
}

impl ClhNode {
    /// Allocate a fresh node, initially unlocked.
    #[must_use]
    pub fn new() -> Self {
        let boxed = Box::new(CachePadded::new(AtomicBool::new(false)));
        Self {
            ptr: NonNull::from(Box::leak(boxed)),
        }
    }

    fn into_raw(self) -> NonNull<Flag> {
        let ptr = self.ptr;
        core::mem::forget(self);
        ptr
    }

    unsafe fn from_raw(ptr: NonNull<Flag>) -> Self {
        Self { ptr }
    }
}

impl Default for ClhNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClhNode {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
    }
}

unsafe impl Send for ClhNode {}

/// A CLH queue lock.
///
/// # Example
///
/// ```
/// use spinkit::clh::{ClhLock, ClhNode};
///
/// let lock = ClhLock::new(0u64);
/// let node = ClhNode::new();
///
/// let mut guard = lock.lock(node);
/// *guard += 1;
/// let node = guard.unlock();
///
/// // The recovered node serves the next acquisition.
/// assert_eq!(*lock.lock(node), 1);
/// ```
pub struct ClhLock<T: ?Sized> {
    tail: AtomicPtr<Flag>,
    data: UnsafeCell<T>,
}

impl<T> ClhLock<T> {
    /// Create a new unlocked lock, seeding the queue with a dummy node.
    pub fn new(data: T) -> Self {
        let dummy = ClhNode::new().into_raw();
        Self {
            tail: AtomicPtr::new(dummy.as_ptr()),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, consuming `node` and spinning on its predecessor.
    pub fn lock(&self, node: ClhNode) -> ClhGuard<'_, T> {
        let me = node.into_raw();
        unsafe { me.as_ref() }.store(true, Ordering::Relaxed);
        let pred = self.tail.swap(me.as_ptr(), Ordering::AcqRel);
        let pred = unsafe { NonNull::new_unchecked(pred) };
        let flag = unsafe { pred.as_ref() };
        while flag.load(Ordering::Acquire) {
            while flag.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        ClhGuard {
            lock: self,
            me,
            pred,
        }
    }
}

impl<T: ?Sized> Drop for ClhLock<T> {
    fn drop(&mut self) {
        // At rest the tail holds the last released node; adopt and free it.
        let tail = *self.tail.get_mut();
        unsafe { drop(Box::from_raw(tail)) };
    }
}

unsafe impl<T: Send> Send for ClhLock<T> {}
unsafe impl<T: Send> Sync for ClhLock<T> {}

/// RAII guard for [`ClhLock`]; holds the contributed node and the adopted
/// predecessor.
pub struct ClhGuard<'a, T: ?Sized> {
    lock: &'a ClhLock<T>,
    me: NonNull<Flag>,
    pred: NonNull<Flag>,
}

impl<T: ?Sized> ClhGuard<'_, T> {
    /// Release the lock and recover the adopted predecessor node.
    pub fn unlock(self) -> ClhNode {
        let pred = self.pred;
        unsafe { self.me.as_ref() }.store(false, Ordering::Release);
        core::mem::forget(self);
        unsafe { ClhNode::from_raw(pred) }
    }
}

impl<T: ?Sized> Deref for ClhGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for ClhGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for ClhGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            self.me.as_ref().store(false, Ordering::Release);
            drop(Box::from_raw(self.pred.as_ptr()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock_recycles_node() {
        let lock = ClhLock::new(0);

        let mut node = ClhNode::new();
        for _ in 0..10 {
            let mut guard = lock.lock(node);
            *guard += 1;
            node = guard.unlock();
        }
        drop(node);

        assert_eq!(*lock.lock(ClhNode::new()), 10);
    }

    #[test]
    fn test_guard_drop_releases() {
        let lock = ClhLock::new(());

        drop(lock.lock(ClhNode::new()));
        // A second acquisition must not block.
        drop(lock.lock(ClhNode::new()));
    }

    #[test]
    fn test_counter() {
        const THREADS: usize = 4;
        const ITERS: usize = 100_000;

        let lock = Arc::new(ClhLock::new(0usize));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    let mut node = ClhNode::new();
                    for _ in 0..ITERS {
                        let mut guard = lock.lock(node);
                        *guard += 1;
                        node = guard.unlock();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(ClhNode::new()), THREADS * ITERS);
    }
}
