//! Memory allocator abstraction.
//!
//! The reclamation machinery in [`hp`](crate::hp) never frees memory itself;
//! it hands pointers judged safe back to an [`Allocator`] supplied at
//! construction. This keeps the scheme usable with pools, arenas, or test
//! allocators that only mark pointers instead of freeing them.
//!
//! Allocation failure is fatal. The structures built on this interface have
//! no partial-failure story to offer, so [`HeapAllocator`] aborts through
//! [`handle_alloc_error`](std::alloc::handle_alloc_error) rather than
//! pretending to recover.

use core::marker::PhantomData;
use core::ptr::NonNull;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};

/// A typed allocator for node-based concurrent structures.
pub trait Allocator {
    /// The node type this allocator hands out.
    type Value;

    /// Allocate `n` contiguous uninitialized slots.
    ///
    /// Never returns null; allocation failure aborts.
    fn allocate(&self, n: usize) -> NonNull<Self::Value>;

    /// Release one slot previously obtained from a single-slot `allocate`.
    ///
    /// The slot's contents are not dropped; callers move values out before
    /// retiring a node. Multi-slot allocations must be returned in bulk by
    /// whoever made them, not through this method.
    ///
    /// # Safety
    ///
    /// `p` must come from this allocator's `allocate(1)` and must not be
    /// used afterwards.
    unsafe fn deallocate(&self, p: NonNull<Self::Value>);
}

/// An [`Allocator`] backed by the global allocator.
pub struct HeapAllocator<V> {
    _marker: PhantomData<fn(V) -> V>,
}

impl<V> HeapAllocator<V> {
    /// Create the allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for HeapAllocator<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Allocator for HeapAllocator<V> {
    type Value = V;

    fn allocate(&self, n: usize) -> NonNull<V> {
        assert!(n > 0);
        let layout = match Layout::array::<V>(n) {
            Ok(layout) if layout.size() > 0 => layout,
            _ => panic!("invalid allocation request"),
        };
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc(layout) };
        match NonNull::new(ptr.cast::<V>()) {
            Some(p) => p,
            None => handle_alloc_error(layout),
        }
    }

    unsafe fn deallocate(&self, p: NonNull<V>) {
        dealloc(p.as_ptr().cast(), Layout::new::<V>());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocator_is_zero_sized() {
        assert_eq!(core::mem::size_of::<HeapAllocator<u64>>(), 0);
    }

    #[test]
    fn test_allocate_deallocate() {
        let alloc = HeapAllocator::<u64>::new();

        let p = alloc.allocate(1);
        unsafe {
            p.as_ptr().write(0xAB);
            assert_eq!(*p.as_ptr(), 0xAB);
            alloc.deallocate(p);
        }
    }

    #[test]
    fn test_allocate_is_aligned() {
        #[repr(align(64))]
        struct Aligned(#[allow(dead_code)] u8);

        let alloc = HeapAllocator::<Aligned>::new();
        let p = alloc.allocate(1);
        assert_eq!(p.as_ptr() as usize % 64, 0);
        unsafe { alloc.deallocate(p) };
    }

    #[test]
    fn test_allocate_many() {
        let alloc = HeapAllocator::<u32>::new();

        let p = alloc.allocate(16);
        unsafe {
            for i in 0..16 {
                p.as_ptr().add(i).write(i as u32);
            }
            for i in 0..16 {
                assert_eq!(*p.as_ptr().add(i), i as u32);
            }
            // Contiguous block: return it whole.
            dealloc(
                p.as_ptr().cast(),
                Layout::array::<u32>(16).unwrap(),
            );
        }
    }
}
