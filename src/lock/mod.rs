//! The lock module.
//!
//! Mirrors the teacher's `lock` module: a small family of mutual-exclusion
//! primitives shares one shape (a raw lock plus an `UnsafeCell<T>`, accessed
//! through an RAII guard). The kernel scheduler and its critical-section
//! primitives (`push_off`/`pop_off`, interrupt masking) are named in
//! spec.md §1 as an external collaborator, so unlike the teacher's
//! `RawSpinlock` these primitives do not touch interrupt state — they are
//! plain atomic spin locks. `SleepLock` is kept as a distinct type from
//! `Spinlock` to preserve the call-site intent (the spec's `resize_lock`,
//! `fsync_lock`, and journal `write_lock` are documented suspension points),
//! even though, absent a real scheduler to sleep on, it also spins.

mod bitlock;
mod seqlock;
mod sleeplock;
mod spinlock;

pub use bitlock::{locked_set_bit, BitSpinlock};
pub use seqlock::{SeqReader, Seqlock, SeqWriter};
pub use sleeplock::{SleepLock, SleepLockGuard};
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};
