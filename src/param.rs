//! Compile-time filesystem parameters.
//!
//! Grounded in the teacher's `kernel-rs/src/param.rs`: a flat module of
//! `const`s rather than a runtime configuration layer.

/// Disk block size in bytes. All block I/O is in multiples of this.
pub const BSIZE: usize = 4096;

/// Maximum length of a directory entry name (fixed, NUL-padded).
pub const DIRSIZ: usize = 14;

/// Maximum number of data blocks any single metadata operation's
/// transaction may touch, used to decide when the logical log must be
/// drained before the journal runs out of room.
pub const MAXOPBLOCKS: usize = 10;

/// Number of fixed-size records the on-disk journal ring can hold.
/// Chosen generously for the crate's tests; a real mount reads this from
/// the super block instead.
pub const LOGSIZE: usize = 256;

/// Size, in bits, of one `u64` word of the free-block bitmap.
pub const BITS_PER_WORD: usize = 64;

/// Open-addressing bucket count for the in-transaction block dedup index,
/// taken verbatim from `scalefs.hh`'s `trans_blocks` hash table size.
pub const TRANS_DEDUP_BUCKETS: usize = 4099;

/// Number of CPUs the inumber allocator and per-CPU logical log partition
/// across. Grounded in the teacher's `param.rs::NCPU`.
pub const NCPU: usize = 8;
