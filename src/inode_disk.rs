//! On-disk layout: inode, directory entry, and `stat`.
//!
//! "Standard Unix-style inode with `nlink`, `size`, `type`, `major/minor`,
//! `direct[]`, `indirect` — exact layout inherited from the hosting kernel"
//! (spec.md §6). Grounded in the teacher's `fs/ufs/inode.rs::Dinode`/
//! `Dirent`, using the same `zerocopy` derive to read/write whole blocks
//! without manual (de)serialization.

use zerocopy::{AsBytes, FromBytes};

use crate::mnode::InumberType;
use crate::param::{BSIZE, DIRSIZ};

/// Number of direct block pointers an inode carries before falling back to
/// the single indirect block.
pub const NDIRECT: usize = 12;

/// Number of block pointers one indirect block holds (`BSIZE` worth of
/// `u32` addresses). Only a single level of indirection is modeled, per
/// spec.md §6's "direct[], indirect" (singular) on-disk inode shape; a file
/// needing a second level is out of this crate's representable range.
pub const INDIRECT_PER_BLOCK: usize = BSIZE / core::mem::size_of::<u32>();

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum DiskType {
    Free = 0,
    Dir = 1,
    File = 2,
    Dev = 3,
    Sock = 4,
}

impl DiskType {
    pub fn from_mnode_type(t: InumberType) -> Self {
        match t {
            InumberType::Dir => DiskType::Dir,
            InumberType::File => DiskType::File,
            InumberType::Dev => DiskType::Dev,
            InumberType::Sock => DiskType::Sock,
        }
    }

    fn from_raw(v: u8) -> Self {
        match v {
            1 => DiskType::Dir,
            2 => DiskType::File,
            3 => DiskType::Dev,
            4 => DiskType::Sock,
            _ => DiskType::Free,
        }
    }
}

/// On-disk inode. Whole inode blocks are read/written; the interface layer
/// never does partial-inode I/O (spec.md §6: "the interface layer reads
/// and writes whole inode blocks only").
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct Dinode {
    typ: u8,
    _pad0: u8,
    major: u16,
    minor: u16,
    nlink: i16,
    _pad1: u32,
    size: u64,
    addr_direct: [u32; NDIRECT],
    addr_indirect: u32,
    _pad2: u32,
}

impl Default for Dinode {
    fn default() -> Self {
        Self {
            typ: 0,
            _pad0: 0,
            major: 0,
            minor: 0,
            nlink: 0,
            _pad1: 0,
            size: 0,
            addr_direct: [0; NDIRECT],
            addr_indirect: 0,
            _pad2: 0,
        }
    }
}

impl Dinode {
    pub fn is_free(&self) -> bool {
        self.typ == 0
    }

    pub fn typ(&self) -> DiskType {
        DiskType::from_raw(self.typ)
    }

    pub fn set_typ(&mut self, typ: DiskType) {
        self.typ = typ as u8;
    }

    pub fn nlink(&self) -> i16 {
        self.nlink
    }

    pub fn set_nlink(&mut self, nlink: i16) {
        self.nlink = nlink;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn addr_direct(&self) -> &[u32; NDIRECT] {
        &self.addr_direct
    }

    pub fn addr_direct_mut(&mut self) -> &mut [u32; NDIRECT] {
        &mut self.addr_direct
    }

    pub fn addr_indirect(&self) -> u32 {
        self.addr_indirect
    }

    pub fn set_addr_indirect(&mut self, bno: u32) {
        self.addr_indirect = bno;
    }

    pub fn major_minor(&self) -> (u16, u16) {
        (self.major, self.minor)
    }

    pub fn set_major_minor(&mut self, major: u16, minor: u16) {
        self.major = major;
        self.minor = minor;
    }
}

/// A fixed, NUL-padded 14-byte directory entry name (spec.md §6: "All
/// directory names are fixed 14-byte NUL-padded strings").
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct DirName([u8; DIRSIZ]);

impl DirName {
    pub fn new(name: &str) -> Option<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > DIRSIZ || bytes.contains(&0) {
            return None;
        }
        let mut buf = [0u8; DIRSIZ];
        buf[..bytes.len()].copy_from_slice(bytes);
        Some(Self(buf))
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(DIRSIZ);
        core::str::from_utf8(&self.0[..len]).unwrap_or("")
    }

    pub fn raw(&self) -> &[u8; DIRSIZ] {
        &self.0
    }
}

impl core::fmt::Debug for Dinode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dinode")
            .field("typ", &self.typ())
            .field("nlink", &self.nlink)
            .field("size", &self.size)
            .finish()
    }
}

/// `stat(2)`-shaped result, per the teacher's `fs/stat.rs::Stat`.
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct Stat {
    pub inum: u64,
    pub typ: InumberType,
    pub nlink: i16,
    pub size: u64,
}
