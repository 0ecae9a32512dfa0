//! Error kinds, per spec §7 (ERROR HANDLING DESIGN).
//!
//! `Retry` is absorbed inside the mnode graph's lookup loops and must never
//! escape to a caller. `BlockingIo` is absorbed by whichever frame holds the
//! lock that the retried I/O needs released; it never escapes
//! [`crate::mnode::file::File::get_page`]'s caller chain either. Both
//! variants exist so those control-flow paths are explicit `Result`s instead
//! of exceptions, per the REDESIGN FLAGS in spec.md.

use core::fmt;

/// Errors surfaced by the mnode graph, journal, and interface layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No free block was available to satisfy an allocation.
    NoSpace,
    /// The inode a mnode was supposed to back does not exist on disk.
    NoInode,
    /// The target name already exists where a unique name was required.
    Exists,
    /// No entry by that name exists.
    NotFound,
    /// The operation requires a directory but the mnode is not one.
    NotDir,
    /// The operation requires a non-directory but the mnode is a directory.
    IsDir,
    /// The underlying block device reported a failure.
    Io,
    /// Benign conflict in a retry loop (stale directory entry, racing CAS).
    /// Must be absorbed internally; never surfaced past the mnode graph.
    Retry,
    /// A page fault occurred while a lock was held and scheduling was
    /// disabled; the caller must drop the lock and retry outside it.
    BlockingIo,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NoSpace => "no free block available",
            FsError::NoInode => "no such inode",
            FsError::Exists => "name already exists",
            FsError::NotFound => "no such entry",
            FsError::NotDir => "not a directory",
            FsError::IsDir => "is a directory",
            FsError::Io => "block device I/O error",
            FsError::Retry => "retry (internal)",
            FsError::BlockingIo => "blocking I/O requested (internal)",
        };
        f.write_str(msg)
    }
}

pub type FsResult<T> = Result<T, FsError>;
