//! A single-writer, many-reader sequence lock.
//!
//! Grounded in `mfile`'s `size_seq_`/`seq_reader`/`seq_writer` pair in
//! `mnode.hh`: readers snapshot a value by spinning until they observe a
//! stable (even, unchanged) sequence number around their read; the one
//! writer bumps the sequence to odd, mutates, then bumps it back to even.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};

pub struct Seqlock<T: Copy> {
    seq: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: writers are externally serialized (by `File::resize_lock`); the
// sequence number makes concurrent reads safe to race against the single
// writer.
unsafe impl<T: Copy + Send> Sync for Seqlock<T> {}

impl<T: Copy> Seqlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            seq: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Snapshots the protected value.
    pub fn read(&self) -> T {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 != 0 {
                spin_loop();
                continue;
            }
            // SAFETY: a torn read is possible but detected by the sequence
            // check below before it is trusted.
            let value = unsafe { *self.data.get() };
            let after = self.seq.load(Ordering::Acquire);
            if before == after {
                return value;
            }
        }
    }

    /// Begins a write epoch. The caller must already hold whatever lock
    /// serializes writers (`resize_lock`); only one `SeqWriter` may be live
    /// at a time.
    pub fn write(&self) -> SeqWriter<'_, T> {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(seq & 1, 0, "Seqlock::write: writer already active");
        SeqWriter { lock: self }
    }
}

pub struct SeqWriter<'s, T: Copy> {
    lock: &'s Seqlock<T>,
}

impl<T: Copy> SeqWriter<'_, T> {
    pub fn get(&self) -> T {
        // SAFETY: the writer holds exclusive access for the epoch.
        unsafe { *self.lock.data.get() }
    }

    pub fn set(&mut self, value: T) {
        // SAFETY: the writer holds exclusive access for the epoch.
        unsafe { *self.lock.data.get() = value };
    }
}

impl<T: Copy> Drop for SeqWriter<'_, T> {
    fn drop(&mut self) {
        self.lock.seq.fetch_add(1, Ordering::AcqRel);
    }
}

/// A consistent, point-in-time read of a [`Seqlock`] without starting a
/// write epoch — used by `File::read_size()`.
pub struct SeqReader<T: Copy> {
    value: T,
}

impl<T: Copy> SeqReader<T> {
    pub fn new(lock: &Seqlock<T>) -> Self {
        Self { value: lock.read() }
    }

    pub fn get(&self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_read_write() {
        let lock = Seqlock::new(0u64);
        assert_eq!(lock.read(), 0);
        {
            let mut w = lock.write();
            w.set(42);
        }
        assert_eq!(lock.read(), 42);
    }

    #[test]
    fn concurrent_reader_never_observes_torn_value() {
        use alloc::sync::Arc;
        use core::sync::atomic::AtomicBool;

        let lock = Arc::new(Seqlock::new((0u64, 0u64)));
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let lock = lock.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                for i in 0..10_000u64 {
                    let mut w = lock.write();
                    w.set((i, i));
                }
                stop.store(true, Ordering::Relaxed);
            })
        };

        let reader = {
            let lock = lock.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let (a, b) = lock.read();
                    assert_eq!(a, b, "reader observed a torn write");
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
