//! C1: the block device collaborator and a thin synchronous/asynchronous
//! wrapper over it.
//!
//! spec.md §6 specifies the block device as `readv`/`writev`/
//! `writev_async`/`flush`, consumed but not implemented here — "only a
//! bytewise block read/write/flush interface is consumed". [`BlockDevice`]
//! is that interface; the driver behind it is an external collaborator.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::FsResult;
use crate::param::BSIZE;

/// One on-disk block's worth of bytes.
pub type BlockBuf = [u8; BSIZE];

/// A handle a caller can poll/await to learn when an async write landed.
pub trait Completion: Send {
    /// Blocks the caller until the write this completion represents has
    /// been acknowledged by the device.
    fn wait(self: Box<Self>);
}

/// The external block device collaborator. All offsets are block numbers;
/// `BSIZE`-aligned byte offsets are the device's concern, not the caller's.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, blockno: u32, buf: &mut BlockBuf) -> FsResult<()>;
    fn write_block(&self, blockno: u32, buf: &BlockBuf) -> FsResult<()>;
    /// Issues an asynchronous write, returning a completion the caller must
    /// eventually wait on before relying on durability.
    fn write_block_async(&self, blockno: u32, buf: &BlockBuf) -> FsResult<Box<dyn Completion>>;
    /// A device-wide flush barrier: every write acknowledged (via
    /// `write_block`/an awaited completion) before this call returns is
    /// durable once `flush` returns.
    fn flush(&self) -> FsResult<()>;
}

/// A thin convenience layer over [`BlockDevice`] used by the journal's
/// two-phase commit: batches a set of async writes, then waits on all of
/// their completions before the caller issues the barrier `flush`.
pub struct BlockStore<'d> {
    device: &'d dyn BlockDevice,
}

impl<'d> BlockStore<'d> {
    pub fn new(device: &'d dyn BlockDevice) -> Self {
        Self { device }
    }

    pub fn read(&self, blockno: u32) -> FsResult<BlockBuf> {
        let mut buf = [0u8; BSIZE];
        self.device.read_block(blockno, &mut buf)?;
        Ok(buf)
    }

    pub fn write(&self, blockno: u32, buf: &BlockBuf) -> FsResult<()> {
        self.device.write_block(blockno, buf)
    }

    /// Writes every `(blockno, buf)` pair asynchronously, then waits for
    /// all of them, then issues a single flush barrier. Mirrors
    /// `transaction::write_to_disk`'s writeback_async/async_iowait/ideflush
    /// sequence in `scalefs.hh`.
    pub fn write_batch_and_flush<'a, I>(&self, blocks: I) -> FsResult<()>
    where
        I: IntoIterator<Item = (u32, &'a BlockBuf)>,
    {
        let mut completions: Vec<Box<dyn Completion>> = Vec::new();
        for (blockno, buf) in blocks {
            match self.device.write_block_async(blockno, buf) {
                Ok(c) => completions.push(c),
                Err(e) => return Err(e),
            }
        }
        for c in completions {
            c.wait();
        }
        self.device.flush()
    }

    pub fn flush(&self) -> FsResult<()> {
        self.device.flush()
    }
}
