//! Epoch-based deferred reclamation for the mnode interner.
//!
//! Grounded in `mnode.hh`'s `scopedperf` critical section around
//! `mfs::get()`: a lookup is done by upgrading a weak reference while an
//! "anti-epoch" guard is held, re-verifying the directory mapping before
//! trusting the result. In this crate the mnode's memory safety itself
//! comes from `Arc`/`Weak` — a `Weak` can never be upgraded once the last
//! strong reference is gone, so the two-epoch resurrection window the
//! original refcache implements for its hand-rolled RCU has no counterpart
//! to get wrong here. [`AntiEpoch`] is kept anyway: it marks the same
//! call sites the original brackets with a critical section, so
//! `Directory::lookup_link`'s re-verify-then-acquire dance reads the same
//! way it does in `mnode.hh`, even though nothing below actually blocks an
//! epoch advance.

use core::sync::atomic::{AtomicU64, Ordering};

/// A monotonic counter advanced by quiescent CPUs. Not currently consulted
/// by anything in this crate (see module docs); reserved so that an actual
/// reader-side hazard (e.g. a future lock-free radix `PageIndex`, §4.4)
/// has somewhere to register its epoch.
#[derive(Default)]
pub struct Epoch {
    counter: AtomicU64,
}

impl Epoch {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel)
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn guard(&self) -> AntiEpoch<'_> {
        AntiEpoch { epoch: self }
    }
}

/// A critical section documenting "do not let the epoch advance out from
/// under this lookup". See module docs for why this is a no-op guard.
pub struct AntiEpoch<'e> {
    #[allow(dead_code)]
    epoch: &'e Epoch,
}
