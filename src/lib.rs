//! # spinkit
//!
//! Concurrent synchronization primitives and lock-free data structures for
//! shared-memory multiprocessors, together with the safe-memory-reclamation
//! machinery they depend on.
//!
//! This library provides building blocks, not a product: mutual-exclusion
//! locks of increasing sophistication, an exponential backoff policy for
//! their spin loops, a bounded hazard-pointer reclamation scheme, and a
//! Michael-Scott FIFO queue built on top of it.
//!
//! ## Module Organization
//!
//! ### Foundation
//! - [`cc`] - Cache-line utilities (padding, bit masks)
//! - [`registry`] - Dense per-thread identities
//! - [`malloc`] - Memory allocator abstraction
//!
//! ### Building Blocks
//! - [`mod@backoff`] - Backoff policies for contention management
//! - [`linearization`] - Per-thread linearization-point timestamps
//!
//! ### Locks
//! - [`spinlock`] - Test-and-set and test-and-test-and-set locks
//! - [`pthread_spin`] - Wrapper around the platform pthread spinlock
//! - [`array_lock`] - Bounded anonymous array queue lock
//! - [`clh`] - CLH implicit-queue lock
//! - [`mcs`] - MCS explicit-queue lock
//!
//! ### Memory Reclamation
//! - [`hp`] - Hazard pointer memory reclamation
//!
//! ### High-Level Structures
//! - [`ms_queue`] - Michael-Scott lock-free FIFO
//!
//! ## Thread registration
//!
//! Components that keep per-thread state ([`array_lock`], [`hp`],
//! [`ms_queue`], [`linearization`]) index it by the identity assigned by
//! [`registry::init_thread`], which every participating thread must call
//! once, before its first operation. Waits are busy spins throughout; no
//! operation blocks in the scheduler.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// =============================================================================
// Tier 0: Foundation (No Internal Dependencies)
// =============================================================================

pub mod cc;

pub mod malloc;

pub mod registry;

// =============================================================================
// Tier 1: Building Blocks
// =============================================================================

pub mod backoff;

pub mod linearization;

// =============================================================================
// Tier 2: Locks
// =============================================================================

pub mod spinlock;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod pthread_spin;

pub mod array_lock;

pub mod clh;

pub mod mcs;

// =============================================================================
// Tier 3: Memory Reclamation
// =============================================================================

pub mod hp;

// =============================================================================
// Tier 4: High-Level Structures
// =============================================================================

pub mod ms_queue;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use array_lock::ArrayLock;
pub use backoff::{Backoff, ExpBackoff, NoBackoff};
pub use cc::CachePadded;
pub use clh::{ClhLock, ClhNode};
pub use hp::HazardPointer;
pub use malloc::Allocator;
pub use mcs::{McsLock, McsNode};
pub use ms_queue::MsQueue;
pub use spinlock::{TasLock, TtasLock};

#[cfg(test)]
pub(crate) mod test_util {
    //! The thread registry is process-wide; tests that register threads take
    //! this lock and start from a rewound counter.

    use std::sync::{Mutex, MutexGuard, PoisonError};

    static REGISTRY: Mutex<()> = Mutex::new(());

    pub(crate) fn registry_lock() -> MutexGuard<'static, ()> {
        let guard = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        crate::registry::reset();
        guard
    }
}
