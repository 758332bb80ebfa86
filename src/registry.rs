//! Process-wide thread registry.
//!
//! Components that keep per-thread state (the array lock, the hazard-pointer
//! table, the Michael-Scott queue) index it by a dense small integer identity.
//! This module hands those identities out: a global counter assigns the next
//! id to each thread that registers, and a thread-local slot remembers it for
//! the rest of the thread's life.
//!
//! Every thread must call [`init_thread`] exactly once before invoking any
//! operation that consults [`thread_id`], and the identity it receives must be
//! smaller than the `thread_num` passed to every component it touches.
//! [`reset`] rewinds the counter and is only sound while no registered thread
//! is live.

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

static THREAD_COUNT: AtomicUsize = AtomicUsize::new(0);

const UNREGISTERED: usize = usize::MAX;

thread_local! {
    static THREAD_ID: Cell<usize> = const { Cell::new(UNREGISTERED) };
}

/// Register the calling thread and assign it the next dense identity.
///
/// Calling this twice from the same thread hands out a second identity and
/// abandons the first; callers are expected to register exactly once.
#[inline]
pub fn init_thread() {
    let id = THREAD_COUNT.fetch_add(1, Ordering::AcqRel);
    THREAD_ID.with(|slot| slot.set(id));
}

/// The identity assigned to the calling thread by [`init_thread`].
#[inline]
pub fn thread_id() -> usize {
    let id = THREAD_ID.with(|slot| slot.get());
    debug_assert_ne!(id, UNREGISTERED, "thread used before init_thread()");
    id
}

/// Rewind the identity counter to zero.
///
/// Only sound at quiescence: previously handed-out identities stay in their
/// threads' local slots and will alias freshly assigned ones.
#[inline]
pub fn reset() {
    THREAD_COUNT.store(0, Ordering::Release);
}
