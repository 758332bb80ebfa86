//! Hazard-pointer memory reclamation.
//!
//! Lock-free structures unlink nodes that other threads may still be reading.
//! Hazard pointers make the subsequent free safe: before dereferencing a
//! shared pointer, a thread *publishes* it in a global slot and re-validates
//! the source; a thread that has unlinked a node *retires* it instead of
//! freeing, and retired nodes are only handed back to the allocator once a
//! scan of every slot shows nobody advertising them.
//!
//! The scheme is bounded and allocation-free after construction: `thread_num`
//! threads share `total_hp_num` slots (assignment of slot indices to threads
//! is the client's convention; scans treat all slots alike), and each thread
//! owns a retire list of at most `deallocate_threshold` entries carved from
//! one cache-padded region per thread.
//!
//! With the default threshold `total_hp_num + 1`, a scan can find at most
//! `total_hp_num` distinct protected pointers among the retired entries, so
//! every scan frees at least one node and retirement is amortized O(1).
//!
//! # Ordering contract
//!
//! A reader must publish its hazard with an ordering that keeps the store
//! ahead of the re-validating load (`SeqCst` does; plain release does not on
//! weakly ordered machines), and a retirer must have unlinked the node with
//! at least acquire-release. Either the scan sees the hazard, or the reader's
//! re-validation sees the unlink; in both cases the node survives until the
//! reader moves on.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::cc::CachePadded;
use crate::malloc::Allocator;
use crate::registry;

struct ThreadLocal<V> {
    /// Retired, not yet reclaimed pointers. Written only by the owning thread.
    retired: UnsafeCell<Vec<*mut V>>,
    /// Scan snapshot buffer, reused so scans never allocate.
    scratch: UnsafeCell<Vec<*mut V>>,
}

/// Hazard-pointer state for `thread_num` threads sharing `total_hp_num`
/// slots, reclaiming through an [`Allocator`].
pub struct HazardPointer<A: Allocator> {
    hps: Box<[AtomicPtr<A::Value>]>,
    tls: Box<[CachePadded<ThreadLocal<A::Value>>]>,
    allocator: A,
    threshold: usize,
    thread_num: usize,
}

unsafe impl<A: Allocator + Send> Send for HazardPointer<A> {}
unsafe impl<A: Allocator + Sync> Sync for HazardPointer<A> {}

impl<A: Allocator> HazardPointer<A> {
    /// Create the state with the default threshold `total_hp_num + 1`.
    pub fn new(thread_num: usize, total_hp_num: usize, allocator: A) -> Self {
        Self::with_threshold(thread_num, total_hp_num, allocator, total_hp_num + 1)
    }

    /// Create the state with an explicit per-thread retire threshold.
    ///
    /// `deallocate_threshold` must be at least `total_hp_num + 1`; anything
    /// lower could leave a scan unable to free a single entry.
    pub fn with_threshold(
        thread_num: usize,
        total_hp_num: usize,
        allocator: A,
        deallocate_threshold: usize,
    ) -> Self {
        assert!(thread_num > 0);
        assert!(
            deallocate_threshold > total_hp_num,
            "deallocate threshold must exceed the slot count"
        );
        let hps = (0..total_hp_num)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        let tls = (0..thread_num)
            .map(|_| {
                CachePadded::new(ThreadLocal {
                    retired: UnsafeCell::new(Vec::with_capacity(deallocate_threshold)),
                    scratch: UnsafeCell::new(Vec::with_capacity(total_hp_num)),
                })
            })
            .collect();
        Self {
            hps,
            tls,
            allocator,
            threshold: deallocate_threshold,
            thread_num,
        }
    }

    /// Number of global hazard slots.
    #[inline]
    pub fn slots(&self) -> usize {
        self.hps.len()
    }

    /// Allocate `n` contiguous nodes from the underlying allocator.
    pub fn allocate(&self, n: usize) -> ptr::NonNull<A::Value> {
        self.allocator.allocate(n)
    }

    /// Return one node straight to the underlying allocator, bypassing
    /// retirement.
    ///
    /// # Safety
    ///
    /// As [`Allocator::deallocate`]; only sound when no other thread can
    /// still reach or protect `p`.
    pub unsafe fn deallocate(&self, p: ptr::NonNull<A::Value>) {
        self.allocator.deallocate(p);
    }

    /// Publish `p` in slot `index` with the given ordering.
    ///
    /// A non-null publication protects `p` from every scan that starts after
    /// the store becomes visible; publishing null clears the slot. Callers
    /// protecting a freshly loaded pointer must re-validate the source after
    /// publishing (see the module docs for the required ordering).
    #[inline]
    pub fn preserve(&self, index: usize, p: *mut A::Value, order: Ordering) {
        debug_assert!(index < self.hps.len());
        self.hps[index].store(p, order);
    }

    /// Read slot `index` with the given ordering.
    #[inline]
    pub fn get(&self, index: usize, order: Ordering) -> *mut A::Value {
        debug_assert!(index < self.hps.len());
        self.hps[index].load(order)
    }

    /// Retire `p` for deferred reclamation by the calling thread.
    ///
    /// Appends to the caller's retire list; when the list reaches the
    /// threshold, scans the slots and reclaims every entry nobody protects.
    ///
    /// # Safety
    ///
    /// `p` must come from this state's allocator, must already be unlinked
    /// (unreachable to threads that have not yet published it), and must be
    /// retired at most once.
    pub unsafe fn retire(&self, p: *mut A::Value) {
        let tid = registry::thread_id();
        debug_assert!(tid < self.thread_num);
        let tl = &self.tls[tid];
        let retired = &mut *tl.retired.get();
        debug_assert!(retired.len() < self.threshold);
        retired.push(p);
        if retired.len() == self.threshold {
            self.scan(tl);
        }
    }

    /// Partition the owner's retire list against a snapshot of every slot and
    /// reclaim the unprotected entries.
    unsafe fn scan(&self, tl: &ThreadLocal<A::Value>) {
        let scratch = &mut *tl.scratch.get();
        scratch.clear();
        for slot in self.hps.iter() {
            let p = slot.load(Ordering::Relaxed);
            if !p.is_null() {
                scratch.push(p);
            }
        }
        scratch.sort_unstable();

        let retired = &mut *tl.retired.get();
        let mut kept = 0;
        for i in 0..retired.len() {
            let p = retired[i];
            if scratch.binary_search(&p).is_ok() {
                retired[kept] = p;
                kept += 1;
            } else {
                self.allocator.deallocate(ptr::NonNull::new_unchecked(p));
            }
        }
        retired.truncate(kept);
        debug_assert!(retired.len() < self.threshold);
    }

    /// Unconditionally reclaim the calling thread's entire retire list.
    ///
    /// # Safety
    ///
    /// Only sound when no thread still holds a hazard on any entry, i.e. at
    /// shutdown.
    pub unsafe fn forced_deallocate(&self) {
        self.forced_deallocate_for(registry::thread_id());
    }

    /// Unconditionally reclaim thread `tid`'s entire retire list.
    ///
    /// # Safety
    ///
    /// As [`forced_deallocate`](Self::forced_deallocate), and additionally
    /// `tid`'s thread must not be retiring concurrently.
    pub unsafe fn forced_deallocate_for(&self, tid: usize) {
        debug_assert!(tid < self.thread_num);
        let retired = &mut *self.tls[tid].retired.get();
        for p in retired.drain(..) {
            self.allocator.deallocate(ptr::NonNull::new_unchecked(p));
        }
    }
}

impl<A: Allocator> Drop for HazardPointer<A> {
    fn drop(&mut self) {
        for tid in 0..self.thread_num {
            // Exclusive access: no thread can hold a hazard here.
            unsafe { self.forced_deallocate_for(tid) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Marks pointees freed instead of releasing memory, and traps double
    /// frees. Backing storage stays owned by the test.
    struct MarkAllocator;

    impl Allocator for MarkAllocator {
        type Value = AtomicU32;

        fn allocate(&self, _n: usize) -> ptr::NonNull<AtomicU32> {
            unreachable!("tests hand out their own pointers");
        }

        unsafe fn deallocate(&self, p: ptr::NonNull<AtomicU32>) {
            let prev = p.as_ref().swap(1, Ordering::Relaxed);
            assert_eq!(prev, 0, "pointer freed twice");
        }
    }

    #[test]
    #[should_panic]
    fn test_threshold_must_exceed_slots() {
        let _ = HazardPointer::with_threshold(1, 4, MarkAllocator, 4);
    }

    #[test]
    fn test_preserve_get_roundtrip() {
        let _serial = crate::test_util::registry_lock();
        registry::init_thread();

        let hp = HazardPointer::new(1, 2, MarkAllocator);
        let target = AtomicU32::new(0);
        let p = &target as *const _ as *mut AtomicU32;

        hp.preserve(0, p, Ordering::SeqCst);
        assert_eq!(hp.get(0, Ordering::SeqCst), p);
        hp.preserve(0, ptr::null_mut(), Ordering::Release);
        assert!(hp.get(0, Ordering::SeqCst).is_null());
    }

    #[test]
    fn test_scan_spares_protected() {
        let _serial = crate::test_util::registry_lock();
        registry::init_thread();

        // One slot, threshold 2: the second retire forces a scan.
        let hp = HazardPointer::new(1, 1, MarkAllocator);
        let a = Box::new(AtomicU32::new(0));
        let b = Box::new(AtomicU32::new(0));
        let pa = &*a as *const _ as *mut AtomicU32;
        let pb = &*b as *const _ as *mut AtomicU32;

        hp.preserve(0, pa, Ordering::SeqCst);
        unsafe {
            hp.retire(pa);
            hp.retire(pb);
        }
        assert_eq!(a.load(Ordering::Relaxed), 0);
        assert_eq!(b.load(Ordering::Relaxed), 1);

        hp.preserve(0, ptr::null_mut(), Ordering::Release);
        unsafe { hp.forced_deallocate() };
        assert_eq!(a.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_every_scan_frees_unprotected() {
        let _serial = crate::test_util::registry_lock();
        registry::init_thread();

        let hp = HazardPointer::new(1, 1, MarkAllocator);
        let targets: Vec<Box<AtomicU32>> =
            (0..100).map(|_| Box::new(AtomicU32::new(0))).collect();

        // No hazards published: every threshold-triggered scan must drain
        // the list completely.
        for t in &targets {
            unsafe { hp.retire(&**t as *const _ as *mut AtomicU32) };
        }
        for t in &targets {
            assert_eq!(t.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn test_concurrent_protect_and_retire() {
        const THREADS: usize = 8;
        const SLOTS: usize = 2_000;
        const HP_PER_THREAD: usize = 4;

        let _serial = crate::test_util::registry_lock();

        let targets: Arc<Vec<Box<AtomicU32>>> =
            Arc::new((0..SLOTS).map(|_| Box::new(AtomicU32::new(0))).collect());
        let pointers: Arc<Vec<AtomicPtr<AtomicU32>>> = Arc::new(
            targets
                .iter()
                .map(|t| AtomicPtr::new(&**t as *const _ as *mut AtomicU32))
                .collect(),
        );
        let hp = Arc::new(HazardPointer::new(
            THREADS,
            THREADS * HP_PER_THREAD,
            MarkAllocator,
        ));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let pointers = Arc::clone(&pointers);
                let hp = Arc::clone(&hp);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    registry::init_thread();
                    let tid = registry::thread_id();
                    let base = tid * HP_PER_THREAD;
                    let mut protected = Vec::new();

                    // Stage 1: publish up to HP_PER_THREAD hazards, with the
                    // publish-then-revalidate dance.
                    let mut pos = (i * 31) % SLOTS;
                    let mut visited = 0;
                    while protected.len() < HP_PER_THREAD && visited <= SLOTS {
                        visited += 1;
                        pos = (pos + 1) % SLOTS;
                        let p = pointers[pos].load(Ordering::SeqCst);
                        if p.is_null() {
                            continue;
                        }
                        let slot = base + protected.len();
                        hp.preserve(slot, p, Ordering::SeqCst);
                        if pointers[pos].load(Ordering::SeqCst).is_null() {
                            hp.preserve(slot, ptr::null_mut(), Ordering::Release);
                            continue;
                        }
                        protected.push(p);
                    }

                    // Stage 2: unlink and retire whatever is left anywhere.
                    for entry in pointers.iter() {
                        let p = entry.swap(ptr::null_mut(), Ordering::AcqRel);
                        if !p.is_null() {
                            unsafe { hp.retire(p) };
                        }
                    }

                    barrier.wait();

                    // Scans above must have spared everything we protected.
                    for &p in &protected {
                        assert_eq!(unsafe { &*p }.load(Ordering::Relaxed), 0);
                    }

                    barrier.wait();

                    for k in 0..protected.len() {
                        hp.preserve(base + k, ptr::null_mut(), Ordering::Release);
                    }
                    unsafe { hp.forced_deallocate() };
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Every pointer was unlinked by exactly one thread and must now be
        // freed exactly once (MarkAllocator traps double frees).
        for t in targets.iter() {
            assert_eq!(t.load(Ordering::Relaxed), 1);
        }
    }
}
