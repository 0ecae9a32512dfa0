//! C4: the mnode object graph — directory/file/device/socket nodes, their
//! reference counting, and the interner that maps inumbers back to live
//! mnodes.
//!
//! Grounded in `mnode.hh`'s `mnode`/`mfs` classes. The "Polymorphic mnode
//! hierarchy" redesign note (spec.md §9) is followed literally: [`Mnode`]
//! is a shared header plus a [`MnodePayload`] tagged variant, rather than
//! a class hierarchy with `as_dir`/`as_file` downcasts.

pub mod dir;
pub mod file;
pub mod page;
pub mod refcache;

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicI64, Ordering};

pub use dir::Directory;
pub use file::File;
pub use page::{PageIndex, PageInfo, PageLookup, PageSnapshot};
pub use refcache::Epoch;

use crate::lock::Spinlock;
use crate::param::NCPU;

/// `type | (cpu << 8) | (count << 16)`, matching `mnode.hh`'s packing
/// (type occupies the low byte, cpu the next, count the remaining 48 bits)
/// rather than a high-to-low `type:8 | cpu:8 | count:48` reading of spec.md
/// §3's notation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Inumber(u64);

const TYPE_SHIFT: u32 = 0;
const CPU_SHIFT: u32 = 8;
const COUNT_SHIFT: u32 = 16;
const COUNT_MASK: u64 = (1u64 << 48) - 1;

impl Inumber {
    pub fn new(typ: InumberType, cpu: u8, count: u64) -> Self {
        debug_assert!(count <= COUNT_MASK, "inumber count overflowed 48 bits");
        Self(
            ((typ as u64) << TYPE_SHIFT)
                | ((cpu as u64) << CPU_SHIFT)
                | ((count & COUNT_MASK) << COUNT_SHIFT),
        )
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn typ(self) -> InumberType {
        InumberType::from_raw((self.0 >> TYPE_SHIFT) as u8)
    }

    pub fn cpu(self) -> u8 {
        (self.0 >> CPU_SHIFT) as u8
    }

    pub fn count(self) -> u64 {
        (self.0 >> COUNT_SHIFT) & COUNT_MASK
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum InumberType {
    Dir = 1,
    File = 2,
    Dev = 3,
    Sock = 4,
}

impl InumberType {
    fn from_raw(v: u8) -> Self {
        match v {
            1 => InumberType::Dir,
            2 => InumberType::File,
            3 => InumberType::Dev,
            4 => InumberType::Sock,
            other => panic!("invalid inumber type tag {other}"),
        }
    }
}

/// A refcount distinct from the mnode's own strong (`Arc`) count. Reaching
/// zero signals "last name removed"; it does not by itself free anything
/// (spec.md §3).
struct LinkCount(AtomicI64);

impl LinkCount {
    const fn new(initial: i64) -> Self {
        Self(AtomicI64::new(initial))
    }

    fn inc(&self) -> i64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn dec(&self) -> i64 {
        let prev = self.0.fetch_sub(1, Ordering::AcqRel);
        // Open question (iii), spec.md §9: the source asserts rather than
        // recovers on underflow during replay. Kept as a debug assertion
        // rather than a panic in release builds, since recovery replay
        // reapplying an op whose effect is already on disk is a documented
        // possibility this crate does not yet reconcile.
        debug_assert!(prev > 0, "link count underflow");
        prev - 1
    }

    fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Polymorphic payload of an mnode.
pub enum MnodePayload {
    Dir(Directory),
    File(File),
    Dev { major: u16, minor: u16 },
    Sock,
}

/// An in-memory filesystem object: directory, file, device, or socket.
///
/// `fs_handle`/`inum` are immutable for the mnode's lifetime (spec.md §3).
/// Unlike the source this is grounded on, the `fs` handle is not stored on
/// the mnode itself — callers thread a `&Fs` through explicitly, which is
/// the more idiomatic shape for an object graph that does not need a
/// global singleton (spec.md §9's "no global lookups on hot paths" applies
/// doubly once the global is gone entirely).
pub struct Mnode {
    pub inum: Inumber,
    link_count: LinkCount,
    cache_pin: AtomicBool,
    dirty: AtomicBool,
    valid: AtomicBool,
    initialized: AtomicBool,
    payload: MnodePayload,
}

impl Mnode {
    pub fn link_count(&self) -> i64 {
        self.link_count.get()
    }

    pub(crate) fn inc_link(&self) -> i64 {
        self.link_count.inc()
    }

    pub(crate) fn dec_link(&self) -> i64 {
        self.link_count.dec()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, value: bool) {
        self.dirty.store(value, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn set_valid(&self, value: bool) {
        self.valid.store(value, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    pub fn is_cache_pinned(&self) -> bool {
        self.cache_pin.load(Ordering::Acquire)
    }

    pub fn set_cache_pin(&self, value: bool) {
        self.cache_pin.store(value, Ordering::Release);
    }

    pub fn as_dir(&self) -> &Directory {
        match &self.payload {
            MnodePayload::Dir(d) => d,
            _ => panic!("mnode {:?} is not a directory", self.inum),
        }
    }

    pub fn as_file(&self) -> &File {
        match &self.payload {
            MnodePayload::File(f) => f,
            _ => panic!("mnode {:?} is not a file", self.inum),
        }
    }

    pub fn dev_major_minor(&self) -> (u16, u16) {
        match self.payload {
            MnodePayload::Dev { major, minor } => (major, minor),
            _ => panic!("mnode {:?} is not a device", self.inum),
        }
    }
}

/// A paired strong+link-count reference, used to atomically add an mnode
/// to a directory. Grounded in `mlinkref` in `mnode.hh`.
pub struct LinkRef {
    mnode: Arc<Mnode>,
    held: bool,
}

impl LinkRef {
    pub fn new(mnode: Arc<Mnode>) -> Self {
        Self {
            mnode,
            held: false,
        }
    }

    /// Constructs a `LinkRef` that already represents a held link count
    /// (used by [`Fs::alloc`], whose freshly minted mnode starts with
    /// `link_count == 1`).
    fn already_held(mnode: Arc<Mnode>) -> Self {
        Self { mnode, held: true }
    }

    pub fn held(&self) -> bool {
        self.held
    }

    pub fn mnode(&self) -> &Arc<Mnode> {
        &self.mnode
    }

    /// Increments the mnode's link count and marks it held. §4.1's POSIX
    /// deviation (b): a caller may `acquire` before it knows whether the
    /// target name is actually usable, so the count can transiently
    /// exceed the number of names.
    pub fn acquire(&mut self) {
        assert!(!self.held, "LinkRef::acquire: already held");
        self.mnode.inc_link();
        self.held = true;
    }

    /// Hands responsibility for the held link count to whatever just
    /// durably recorded it (a directory entry); this `LinkRef` will no
    /// longer decrement on drop. Spec.md §4.1: `insert` "transfers one
    /// reference from the caller's link-ref into the directory's count".
    pub(crate) fn transfer(&mut self) {
        assert!(self.held, "LinkRef::transfer: nothing held to transfer");
        self.held = false;
    }
}

impl Drop for LinkRef {
    fn drop(&mut self) {
        if self.held {
            self.mnode.dec_link();
        }
    }
}

enum InternerEntry {
    /// Named by at least one directory entry: kept alive by the interner
    /// itself, not merely by callers' strong references.
    Strong(Arc<Mnode>),
    /// Link-dead (spec.md §3 state machine): the interner no longer pins
    /// the mnode; it survives only as long as some caller still holds a
    /// strong reference from before the last name was removed.
    Weak(Weak<Mnode>),
}

/// The mnode interner and allocator. Grounded in `mfs` in `mnode.hh`.
pub struct Fs {
    table: Spinlock<BTreeMap<u64, InternerEntry>>,
    next_count: [core::sync::atomic::AtomicU64; NCPU],
    epoch: Epoch,
}

impl Fs {
    pub fn new() -> Self {
        Self {
            table: Spinlock::new("fs.table", BTreeMap::new()),
            next_count: core::array::from_fn(|_| core::sync::atomic::AtomicU64::new(1)),
            epoch: Epoch::new(),
        }
    }

    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    /// Mints a fresh inumber from `cpu`'s counter and registers a new,
    /// uninitialized mnode under it, returning a link-ref that already
    /// holds one link count (the creation reference).
    pub fn alloc(&self, typ: InumberType, cpu: u8, payload: MnodePayload) -> LinkRef {
        let count = self.next_count[cpu as usize].fetch_add(1, Ordering::AcqRel);
        let inum = Inumber::new(typ, cpu, count);
        let mnode = Arc::new(Mnode {
            inum,
            link_count: LinkCount::new(1),
            cache_pin: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            valid: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            payload,
        });
        self.table
            .lock()
            .insert(inum.raw(), InternerEntry::Strong(mnode.clone()));
        LinkRef::already_held(mnode)
    }

    /// Returns a strong reference to an existing mnode, or `None` if it
    /// has been fully reclaimed.
    pub fn get(&self, inum: u64) -> Option<Arc<Mnode>> {
        let mut table = self.table.lock();
        match table.get(&inum) {
            Some(InternerEntry::Strong(arc)) => Some(arc.clone()),
            Some(InternerEntry::Weak(weak)) => match weak.upgrade() {
                Some(arc) => Some(arc),
                None => {
                    table.remove(&inum);
                    None
                }
            },
            None => None,
        }
    }

    /// Transitions an mnode from `Live` to `Link-dead`: the interner stops
    /// pinning it, so it is reclaimed once the last caller-held strong
    /// reference drops. Called once an mnode's link count reaches zero.
    pub fn demote(&self, inum: u64) {
        let mut table = self.table.lock();
        if let Some(InternerEntry::Strong(arc)) = table.get(&inum) {
            let weak = Arc::downgrade(arc);
            table.insert(inum, InternerEntry::Weak(weak));
        }
    }

    /// `true` if the mnode has no more callers holding it and no
    /// directory names it either (spec.md §3: "Strong-dead").
    pub fn is_strong_dead(&self, mnode: &Arc<Mnode>) -> bool {
        mnode.link_count() == 0 && Arc::strong_count(mnode) == 1
    }

    /// Drops the interner's own bookkeeping for a fully reclaimed mnode.
    pub fn forget(&self, inum: u64) {
        self.table.lock().remove(&inum);
    }

    /// Every mnode the interner can currently resolve to a strong
    /// reference, whether pinned (named) or merely resurrectable (a
    /// caller still holds the last strong reference after the last name
    /// was removed). Used by `sync_all()` to find every file that might
    /// have dirty pages, regardless of whether it still has a logical-log
    /// entry pending (spec.md §4.3).
    pub fn live_mnodes(&self) -> alloc::vec::Vec<Arc<Mnode>> {
        let mut table = self.table.lock();
        let mut out = alloc::vec::Vec::new();
        let mut dead = alloc::vec::Vec::new();
        for (&inum, entry) in table.iter() {
            match entry {
                InternerEntry::Strong(arc) => out.push(arc.clone()),
                InternerEntry::Weak(weak) => match weak.upgrade() {
                    Some(arc) => out.push(arc),
                    None => dead.push(inum),
                },
            }
        }
        for inum in dead {
            table.remove(&inum);
        }
        out
    }

    /// Constructs (or, on a second call, returns) the filesystem root under
    /// a fixed well-known inumber (`type=Dir, cpu=0, count=0`). Unlike
    /// [`Fs::alloc`], which mints from a per-cpu counter, mounting needs a
    /// stable identity the on-disk superblock can point at regardless of
    /// which cpu brings the filesystem up.
    pub fn mount_root(&self) -> Arc<Mnode> {
        let inum = Inumber::new(InumberType::Dir, 0, 0);
        if let Some(existing) = self.get(inum.raw()) {
            return existing;
        }
        let mnode = Arc::new(Mnode {
            inum,
            link_count: LinkCount::new(1),
            cache_pin: AtomicBool::new(true),
            dirty: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            initialized: AtomicBool::new(true),
            payload: MnodePayload::Dir(Directory::new(inum.raw())),
        });
        self.table
            .lock()
            .insert(inum.raw(), InternerEntry::Strong(mnode.clone()));
        mnode
    }
}

impl Default for Fs {
    fn default() -> Self {
        Self::new()
    }
}
