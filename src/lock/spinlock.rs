//! Spin locks.
//!
//! Grounded in the teacher's `lock/spinlock.rs`, minus the interrupt
//! masking (`push_off`/`pop_off`), which belongs to the kernel scheduler
//! that spec.md §1 scopes out as an external collaborator.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A raw, name-tagged test-and-test-and-set spin lock.
pub struct RawSpinlock {
    name: &'static str,
    locked: AtomicBool,
}

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> RawSpinlockGuard<'_> {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        RawSpinlockGuard { lock: self }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

pub struct RawSpinlockGuard<'s> {
    lock: &'s RawSpinlock,
}

impl Drop for RawSpinlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Mutual exclusion lock protecting a `T`, guarded by a [`RawSpinlock`].
pub struct Spinlock<T> {
    raw: RawSpinlock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`.
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            raw: RawSpinlock::new(name),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let raw_guard = self.raw.lock();
        SpinlockGuard {
            raw_guard,
            data: &self.data,
        }
    }

    /// Returns a mutable reference, bypassing locking. Only sound when the
    /// caller has exclusive access (e.g. during single-threaded recovery).
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct SpinlockGuard<'s, T> {
    raw_guard: RawSpinlockGuard<'s>,
    data: &'s UnsafeCell<T>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: `raw_guard` proves we hold the lock protecting `data`.
        unsafe { &*self.data.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: `raw_guard` proves we hold the lock protecting `data`.
        unsafe { &mut *self.data.get() }
    }
}

impl<'s, T> SpinlockGuard<'s, T> {
    /// Gives up which lock is held so the caller can explicitly drop it
    /// before re-entering a retry loop (see `mnode::dir::lookup_link`).
    pub fn raw(&self) -> &RawSpinlock {
        self.raw_guard.lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    #[test]
    fn mutual_exclusion() {
        let lock = Arc::new(Spinlock::new("test", 0u64));
        let mut handles = alloc::vec::Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }
}
