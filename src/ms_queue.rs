//! Michael-Scott lock-free FIFO queue.
//!
//! The classic two-pointer queue: `head` points at a sentinel whose `next` is
//! the front element, `tail` points at (or one behind) the last node. An
//! enqueuer links its node after the last one and then swings `tail`; a
//! dequeuer swings `head` to the front node, which becomes the new sentinel,
//! and hands the old sentinel to the hazard-pointer machinery for
//! reclamation. Operations that find `tail` lagging help it forward, so no
//! thread ever waits on another.
//!
//! The queue is linearizable to a sequential FIFO: an enqueue takes effect at
//! its successful link CAS, a dequeue at its successful head CAS, and an
//! empty dequeue at the read of `next` that observed null while the queue
//! looked drained. With a [`CycleClock`](crate::linearization::CycleClock)
//! type parameter each of those steps is bracketed by per-thread cycle
//! stamps; the default [`NoClock`] erases the bracketing entirely.
//!
//! Every participating thread must register with
//! [`registry::init_thread`](crate::registry::init_thread) and is bound to
//! hazard slots `2*tid` and `2*tid + 1` of the embedded SMR state.

use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::hp::HazardPointer;
use crate::linearization::{LinearizationClock, NoClock};
use crate::malloc::HeapAllocator;
use crate::registry;

#[repr(C)]
struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: MaybeUninit<T>,
}

/// A lock-free multi-producer multi-consumer FIFO.
///
/// # Example
///
/// ```
/// use spinkit::ms_queue::MsQueue;
/// use spinkit::registry;
///
/// registry::init_thread();
/// let queue: MsQueue<u64> = MsQueue::new(1);
///
/// queue.enqueue(1);
/// assert_eq!(queue.dequeue(), Some(1));
/// assert_eq!(queue.dequeue(), None);
/// ```
pub struct MsQueue<T, C: LinearizationClock = NoClock> {
    gc: HazardPointer<HeapAllocator<Node<T>>>,
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    clock: C,
    thread_num: usize,
}

unsafe impl<T: Send, C: LinearizationClock + Send> Send for MsQueue<T, C> {}
unsafe impl<T: Send, C: LinearizationClock + Sync> Sync for MsQueue<T, C> {}

impl<T, C: LinearizationClock> MsQueue<T, C> {
    /// Create an empty queue serving up to `thread_num` registered threads.
    pub fn new(thread_num: usize) -> Self {
        let gc = HazardPointer::new(thread_num, 2 * thread_num, HeapAllocator::new());
        let sentinel: *mut Node<T> = gc.allocate(1).as_ptr();
        unsafe {
            ptr::addr_of_mut!((*sentinel).next).write(AtomicPtr::new(ptr::null_mut()));
        }
        Self {
            gc,
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            clock: C::with_threads(thread_num),
            thread_num,
        }
    }

    /// The linearization clock, for reading back per-thread stamps.
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Append `value` at the tail.
    pub fn enqueue(&self, value: T) {
        let tid = registry::thread_id();
        debug_assert!(tid < self.thread_num);
        let slot = 2 * tid;

        let node = self.gc.allocate(1).as_ptr();
        unsafe {
            ptr::addr_of_mut!((*node).next).write(AtomicPtr::new(ptr::null_mut()));
            ptr::addr_of_mut!((*node).value).write(MaybeUninit::new(value));
        }

        let mut t;
        loop {
            t = self.tail.load(Ordering::Acquire);
            self.gc.preserve(slot, t, Ordering::SeqCst);
            // The re-validating load must not move ahead of the publish.
            if self.tail.load(Ordering::SeqCst) != t {
                continue;
            }
            // Protected: t cannot be reclaimed until the slot is cleared.
            let next = unsafe { &*t }.next.load(Ordering::Acquire);
            if !next.is_null() {
                // Tail lags; help it forward and retry.
                let _ = self
                    .tail
                    .compare_exchange(t, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            self.clock.mark_before();
            if unsafe { &*t }
                .next
                .compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.clock.mark_after();
                break;
            }
        }
        let _ = self
            .tail
            .compare_exchange(t, node, Ordering::Release, Ordering::Relaxed);
        self.gc.preserve(slot, ptr::null_mut(), Ordering::Release);
    }

    /// Remove and return the front value, or `None` if the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        let tid = registry::thread_id();
        debug_assert!(tid < self.thread_num);
        let slot_head = 2 * tid;
        let slot_next = 2 * tid + 1;

        loop {
            let h = self.head.load(Ordering::Acquire);
            self.gc.preserve(slot_head, h, Ordering::SeqCst);
            if self.head.load(Ordering::SeqCst) != h {
                continue;
            }
            let t = self.tail.load(Ordering::Acquire);
            self.clock.mark_before();
            let next = unsafe { &*h }.next.load(Ordering::Acquire);
            self.clock.mark_after();
            self.gc.preserve(slot_next, next, Ordering::SeqCst);
            if self.head.load(Ordering::SeqCst) != h {
                continue;
            }
            if h == t {
                if next.is_null() {
                    self.clear_hazards(slot_head, slot_next);
                    return None;
                }
                // Tail lags behind a linked node; help and retry.
                let _ = self
                    .tail
                    .compare_exchange(t, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            if next.is_null() {
                // A helper advanced tail past the head we read; the queue
                // was empty at the next-load above.
                self.clear_hazards(slot_head, slot_next);
                return None;
            }

            // The value is read out before the commit; losers must forget
            // their copy, the node still owns it.
            let value = unsafe { ptr::read((*next).value.as_ptr()) };
            self.clock.mark_before();
            if self
                .head
                .compare_exchange(h, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.clock.mark_after();
                self.clear_hazards(slot_head, slot_next);
                // The old sentinel is unreachable now; retire it.
                unsafe { self.gc.retire(h) };
                return Some(value);
            }
            mem::forget(value);
        }
    }

    /// Whether the queue currently holds no values.
    ///
    /// A snapshot; concurrent operations may change the answer before the
    /// caller acts on it.
    pub fn is_empty(&self) -> bool {
        let tid = registry::thread_id();
        debug_assert!(tid < self.thread_num);
        let slot = 2 * tid;

        loop {
            let h = self.head.load(Ordering::Acquire);
            self.gc.preserve(slot, h, Ordering::SeqCst);
            if self.head.load(Ordering::SeqCst) != h {
                continue;
            }
            let next = unsafe { &*h }.next.load(Ordering::Acquire);
            self.gc.preserve(slot, ptr::null_mut(), Ordering::Release);
            return next.is_null();
        }
    }

    #[inline]
    fn clear_hazards(&self, a: usize, b: usize) {
        self.gc.preserve(a, ptr::null_mut(), Ordering::Release);
        self.gc.preserve(b, ptr::null_mut(), Ordering::Release);
    }
}

impl<T, C: LinearizationClock> Drop for MsQueue<T, C> {
    fn drop(&mut self) {
        // Exclusive access: walk the chain, drop the live values (every node
        // after the sentinel) and free the nodes. Retired old sentinels are
        // freed by the embedded state's own Drop.
        let mut p = *self.head.get_mut();
        let mut sentinel = true;
        while !p.is_null() {
            let next = unsafe { (*p).next.load(Ordering::Relaxed) };
            unsafe {
                if !sentinel {
                    ptr::drop_in_place((*p).value.as_mut_ptr());
                }
                self.gc.deallocate(NonNull::new_unchecked(p));
            }
            sentinel = false;
            p = next;
        }
    }
}
