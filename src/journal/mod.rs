//! C5: the physical journal — transaction assembly, block dedup, the
//! two-phase commit protocol, and (in [`recovery`]) crash recovery.
//!
//! Grounded in the two-phase-commit description in spec.md §4.2, itself
//! distilled from `scalefs.hh`'s `transaction`/`journal` classes (not
//! directly present in the retrieved source set, so the on-disk record
//! shapes below follow spec.md §6's literal byte layout rather than a
//! transcription of scalefs.hh).

pub mod recovery;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use itertools::Itertools;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::block::{BlockBuf, BlockStore};
use crate::error::{FsError, FsResult};
use crate::lock::SleepLock;
use crate::param::BSIZE;

/// `{timestamp, blocknum, block_type, pad}`, spec.md §6, occupying the
/// first bytes of an otherwise-zeroed journal header block.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
struct RawHeader {
    timestamp: u64,
    blocknum: u32,
    block_type: u8,
    _pad: [u8; 3],
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum RecordType {
    Start = 1,
    Data = 2,
    Commit = 3,
}

impl RecordType {
    fn from_raw(v: u8) -> Option<Self> {
        match v {
            1 => Some(RecordType::Start),
            2 => Some(RecordType::Data),
            3 => Some(RecordType::Commit),
            _ => None,
        }
    }
}

fn encode_header(timestamp: u64, blocknum: u32, block_type: RecordType) -> BlockBuf {
    const_assert!(core::mem::size_of::<RawHeader>() <= BSIZE);
    let raw = RawHeader {
        timestamp,
        blocknum,
        block_type: block_type as u8,
        _pad: [0; 3],
    };
    let mut buf = [0u8; BSIZE];
    buf[..core::mem::size_of::<RawHeader>()].copy_from_slice(raw.as_bytes());
    buf
}

struct DecodedHeader {
    timestamp: u64,
    blocknum: u32,
    block_type: RecordType,
}

fn decode_header(buf: &BlockBuf) -> Option<DecodedHeader> {
    let raw = RawHeader::read_from_prefix(&buf[..])?;
    Some(DecodedHeader {
        timestamp: raw.timestamp,
        blocknum: raw.blocknum,
        block_type: RecordType::from_raw(raw.block_type)?,
    })
}

/// One block write belonging to a transaction.
#[derive(Clone)]
pub struct DiskBlock {
    pub blocknum: u32,
    pub timestamp: u64,
    pub data: BlockBuf,
}

/// A set of block writes produced by one logical operation or one fsync
/// closure (spec.md §3).
pub struct Transaction {
    timestamp: u64,
    blocks: Vec<DiskBlock>,
    dedup: BTreeMap<u32, usize>,
    allocated_blocks: Vec<u32>,
    free_blocks: Vec<u32>,
}

impl Transaction {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            blocks: Vec::new(),
            dedup: BTreeMap::new(),
            allocated_blocks: Vec::new(),
            free_blocks: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn blocks(&self) -> &[DiskBlock] {
        &self.blocks
    }

    pub fn allocated_blocks(&self) -> &[u32] {
        &self.allocated_blocks
    }

    pub fn free_blocks(&self) -> &[u32] {
        &self.free_blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Adds (or, if `blocknum` is already present, updates in place
    /// keeping the higher-timestamped copy) a block write. Dedup uses a
    /// `BTreeMap<u32, usize>` here rather than the 4 099-bucket
    /// open-addressing table `scalefs.hh` describes (spec.md §4.2); same
    /// amortized O(1)-ish behavior for the block counts a single
    /// transaction holds, without hand-rolling open addressing.
    pub fn add_unique_block(&mut self, blocknum: u32, data: BlockBuf, timestamp: u64) {
        if let Some(&idx) = self.dedup.get(&blocknum) {
            if self.blocks[idx].timestamp <= timestamp {
                self.blocks[idx] = DiskBlock {
                    blocknum,
                    timestamp,
                    data,
                };
            }
        } else {
            self.dedup.insert(blocknum, self.blocks.len());
            self.blocks.push(DiskBlock {
                blocknum,
                timestamp,
                data,
            });
        }
    }

    pub fn add_allocated_block(&mut self, blocknum: u32) {
        self.allocated_blocks.push(blocknum);
    }

    pub fn add_free_block(&mut self, blocknum: u32) {
        self.free_blocks.push(blocknum);
    }

    /// Sorts blocks by `(blocknum, timestamp)`, then keeps only the
    /// highest-timestamped copy per `blocknum` (spec.md §4.2 step 1).
    /// `add_unique_block` already keeps the dedup invariant as writes
    /// come in; this is the final, defensive pass run once no more writes
    /// will be added, and is what gives the "strictly increasing and
    /// unique block numbers" property (spec.md §8).
    pub fn prepare_for_commit(&mut self) {
        self.blocks
            .sort_by(|a, b| a.blocknum.cmp(&b.blocknum).then(a.timestamp.cmp(&b.timestamp)));
        self.blocks = core::mem::take(&mut self.blocks)
            .into_iter()
            .coalesce(|a, b| if a.blocknum == b.blocknum { Ok(b) } else { Err((a, b)) })
            .collect();
        self.dedup.clear();
    }
}

/// Number of journal blocks one commit occupies for `n` data blocks: one
/// prolog header, `n` data-header-plus-payload pairs, and one epilog
/// header.
fn blocks_needed(n: usize) -> usize {
    n * 2 + 2
}

/// The on-disk journal ring and the append lock guarding commit order.
///
/// `current_off` is tracked here in journal-region block units rather
/// than the byte cursor spec.md §3 describes; the two are related by the
/// constant factor `BSIZE`, and block units avoid repeated multiplication
/// at every record boundary.
pub struct Journal<'d> {
    store: BlockStore<'d>,
    region_start: u32,
    region_blocks: u32,
    current_off: SleepLock<u32>,
    poisoned: core::sync::atomic::AtomicBool,
}

impl<'d> Journal<'d> {
    pub fn new(store: BlockStore<'d>, region_start: u32, region_blocks: u32) -> Self {
        Self {
            store,
            region_start,
            region_blocks,
            current_off: SleepLock::new("journal.write_lock", 0),
            poisoned: core::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(core::sync::atomic::Ordering::Acquire)
    }

    /// Marks the journal unusable after an I/O failure mid-commit. Once
    /// poisoned, every further commit fails fast (spec.md §7: "IO during
    /// journal commit is fatal").
    fn poison(&self) {
        self.poisoned.store(true, core::sync::atomic::Ordering::Release);
        crate::kprintln!("mfs: journal poisoned after I/O failure during commit");
    }

    /// `false` once `current_off + (n + 2) * BSIZE` would run past the
    /// journal region, forcing the interface to drain/flush first
    /// (spec.md §4.2).
    pub fn fits_in_journal(&self, n: usize) -> bool {
        let off = *self.current_off.try_lock().map(|g| *g).unwrap_or(u32::MAX);
        (off as usize) + blocks_needed(n) <= self.region_blocks as usize
    }

    /// Resets the ring after a full replay (spec.md §4.2: "After recovery,
    /// the journal is cleared (`current_off <- 0`)").
    pub fn reset(&self) {
        *self.current_off.lock() = 0;
    }

    /// Runs the full two-phase commit for `txn`, then applies its blocks
    /// to their home locations on `self.store` (step 6: "apply to the
    /// in-memory buffer cache" becomes, absent a separate buffer-cache
    /// component, a direct write-through to the block device).
    pub fn commit(&self, mut txn: Transaction) -> FsResult<()> {
        if self.is_poisoned() {
            return Err(FsError::Io);
        }
        txn.prepare_for_commit();
        if txn.is_empty() {
            return Ok(());
        }

        let mut off = self.current_off.lock();
        if (*off as usize) + blocks_needed(txn.blocks.len()) > self.region_blocks as usize {
            return Err(FsError::NoSpace);
        }

        let prolog_buf = encode_header(txn.timestamp, 0, RecordType::Start);
        let prolog_blockno = self.region_start + *off;
        *off += 1;

        let mut batch: Vec<(u32, BlockBuf)> = Vec::with_capacity(1 + txn.blocks.len() * 2);
        batch.push((prolog_blockno, prolog_buf));
        for block in &txn.blocks {
            let header_blockno = self.region_start + *off;
            *off += 1;
            let data_blockno = self.region_start + *off;
            *off += 1;
            batch.push((
                header_blockno,
                encode_header(block.timestamp, block.blocknum, RecordType::Data),
            ));
            batch.push((data_blockno, block.data));
        }

        let write_result = self
            .store
            .write_batch_and_flush(batch.iter().map(|(bno, buf)| (*bno, buf)));
        if let Err(e) = write_result {
            self.poison();
            return Err(e);
        }

        let epilog_blockno = self.region_start + *off;
        *off += 1;
        let epilog_buf = encode_header(txn.timestamp, 0, RecordType::Commit);
        if let Err(e) = self.store.write(epilog_blockno, &epilog_buf) {
            self.poison();
            return Err(e);
        }
        if let Err(e) = self.store.flush() {
            self.poison();
            return Err(e);
        }
        drop(off);

        apply_transaction_blocks(&self.store, &txn)
    }
}

/// Writes every data block in `txn` to its home location. Shared between
/// normal commit (step 6) and [`recovery::recover`] (which replays
/// recovered transactions the same way).
pub(crate) fn apply_transaction_blocks(store: &BlockStore<'_>, txn: &Transaction) -> FsResult<()> {
    for block in &txn.blocks {
        store.write(block.blocknum, &block.data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemBlockDevice;

    #[test]
    fn dedup_keeps_highest_timestamp() {
        let mut txn = Transaction::new(1);
        txn.add_unique_block(5, [0xAAu8; BSIZE], 10);
        txn.add_unique_block(5, [0xBBu8; BSIZE], 20);
        txn.add_unique_block(5, [0xCCu8; BSIZE], 15);
        txn.prepare_for_commit();
        assert_eq!(txn.blocks().len(), 1);
        assert_eq!(txn.blocks()[0].data[0], 0xBB);
    }

    #[test]
    fn prepare_for_commit_orders_blocks_strictly() {
        let mut txn = Transaction::new(1);
        txn.add_unique_block(9, [1u8; BSIZE], 1);
        txn.add_unique_block(2, [2u8; BSIZE], 1);
        txn.add_unique_block(5, [3u8; BSIZE], 1);
        txn.prepare_for_commit();
        let nums: Vec<u32> = txn.blocks().iter().map(|b| b.blocknum).collect();
        assert_eq!(nums, alloc::vec![2, 5, 9]);
    }

    #[test]
    fn repeated_overwrite_dedups_to_one_block() {
        let mut txn = Transaction::new(1);
        for ts in 0..1000u64 {
            txn.add_unique_block(3, [ts as u8; BSIZE], ts);
        }
        txn.prepare_for_commit();
        assert_eq!(txn.blocks().len(), 1);
        assert_eq!(txn.blocks()[0].timestamp, 999);
    }

    #[test]
    fn commit_applies_data_blocks_to_device() {
        let device = MemBlockDevice::new(64);
        let store = BlockStore::new(&device);
        let journal = Journal::new(store, 8, 16);

        let mut txn = Transaction::new(1);
        txn.add_unique_block(40, [0xAAu8; BSIZE], 1);
        journal.commit(txn).unwrap();

        let store = BlockStore::new(&device);
        let read_back = store.read(40).unwrap();
        assert_eq!(read_back[0], 0xAA);
    }

    #[test]
    fn journal_full_is_reported_before_writing_anything() {
        let device = MemBlockDevice::new(64);
        let store = BlockStore::new(&device);
        let journal = Journal::new(store, 8, 4);

        let mut txn = Transaction::new(1);
        for bno in 40..45 {
            txn.add_unique_block(bno, [0u8; BSIZE], 1);
        }
        assert!(journal.commit(txn).is_err());
        assert_eq!(device.flush_count(), 0);
    }
}
