//! A `std`-backed in-memory block device double, used by unit and scenario
//! tests throughout the crate. Grounded in the same `cfg(test)`-only test
//! double pattern used by `examples/other_examples`'s ext4-shaped crates.

use alloc::boxed::Box;
use std::sync::Mutex;

use crate::block::{BlockBuf, BlockDevice, Completion};
use crate::error::{FsError, FsResult};
use crate::param::BSIZE;

struct ImmediateCompletion;

impl Completion for ImmediateCompletion {
    fn wait(self: Box<Self>) {}
}

/// An in-memory disk backed by a growable `Vec<[u8; BSIZE]>`.
///
/// `fail_after` lets a test simulate an `Io` failure after N more writes,
/// to exercise journal-poisoning (spec.md §7: "IO during journal commit is
/// fatal").
pub struct MemBlockDevice {
    blocks: Mutex<alloc::vec::Vec<BlockBuf>>,
    fail_after: Mutex<Option<u32>>,
    flush_count: std::sync::atomic::AtomicU64,
}

impl MemBlockDevice {
    pub fn new(num_blocks: u32) -> Self {
        Self {
            blocks: Mutex::new(alloc::vec![[0u8; BSIZE]; num_blocks as usize]),
            fail_after: Mutex::new(None),
            flush_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn fail_after_writes(&self, n: u32) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn maybe_fail(&self) -> FsResult<()> {
        let mut guard = self.fail_after.lock().unwrap();
        if let Some(n) = *guard {
            if n == 0 {
                return Err(FsError::Io);
            }
            *guard = Some(n - 1);
        }
        Ok(())
    }

    /// Snapshots the raw block contents, for crash/recovery simulation:
    /// build a fresh `MemBlockDevice` from a clone of this snapshot to
    /// model "reboot after a crash at exactly this point".
    pub fn snapshot(&self) -> alloc::vec::Vec<BlockBuf> {
        self.blocks.lock().unwrap().clone()
    }

    pub fn from_snapshot(snapshot: alloc::vec::Vec<BlockBuf>) -> Self {
        Self {
            blocks: Mutex::new(snapshot),
            fail_after: Mutex::new(None),
            flush_count: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&self, blockno: u32, buf: &mut BlockBuf) -> FsResult<()> {
        let blocks = self.blocks.lock().unwrap();
        let block = blocks.get(blockno as usize).ok_or(FsError::Io)?;
        buf.copy_from_slice(block);
        Ok(())
    }

    fn write_block(&self, blockno: u32, buf: &BlockBuf) -> FsResult<()> {
        self.maybe_fail()?;
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks.get_mut(blockno as usize).ok_or(FsError::Io)?;
        block.copy_from_slice(buf);
        Ok(())
    }

    fn write_block_async(&self, blockno: u32, buf: &BlockBuf) -> FsResult<Box<dyn Completion>> {
        self.write_block(blockno, buf)?;
        Ok(Box::new(ImmediateCompletion))
    }

    fn flush(&self) -> FsResult<()> {
        self.flush_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}
