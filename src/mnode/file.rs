//! The file payload: seqlock-protected size, a scoped resize token, and
//! the sparse page index.
//!
//! Grounded in `mfile` in `mnode.hh`. The "Resizer as scoped RAII" note
//! (spec.md §9) is implemented literally: constructing a [`Resizer`]
//! acquires `resize_lock` and opens the seqlock write epoch; dropping it
//! releases both, in reverse order, via [`crate::lock::SeqWriter`]'s own
//! `Drop` followed by [`crate::lock::SleepLockGuard`]'s.

use crate::lock::{SeqWriter, SleepLock, SleepLockGuard};
use crate::mnode::page::{PageIndex, PageInfo, PageLookup};
use crate::param::BSIZE;

/// Invalidates virtual-memory mappings of file pages at or beyond a page
/// index. The mm/VFS layer that actually owns page tables is named in
/// spec.md §1 as an external collaborator; this trait is the seam a host
/// kernel would implement.
pub trait PageMapInvalidator {
    fn invalidate_from(&self, page_idx: u64);
}

pub struct NullInvalidator;

impl PageMapInvalidator for NullInvalidator {
    fn invalidate_from(&self, _page_idx: u64) {}
}

pub struct File {
    size: crate::lock::Seqlock<u64>,
    resize_lock: SleepLock<()>,
    fsync_lock: SleepLock<()>,
    pages: PageIndex,
}

impl File {
    pub fn new() -> Self {
        Self {
            size: crate::lock::Seqlock::new(0),
            resize_lock: SleepLock::new("file.resize", ()),
            fsync_lock: SleepLock::new("file.fsync", ()),
            pages: PageIndex::new(),
        }
    }

    pub fn read_size(&self) -> u64 {
        self.size.read()
    }

    /// Takes the resize lock and opens a seqlock write epoch. The
    /// returned token must be dropped before any further operation on
    /// this file (spec.md §9).
    pub fn write_size(&self) -> Resizer<'_> {
        let guard = self.resize_lock.lock();
        let writer = self.size.write();
        Resizer {
            _guard: guard,
            writer,
            file: self,
        }
    }

    pub fn pages(&self) -> &PageIndex {
        &self.pages
    }

    pub fn get_page(&self, page_idx: u64) -> PageLookup {
        self.pages.get_page(page_idx)
    }

    pub fn fsync_lock(&self) -> &SleepLock<()> {
        &self.fsync_lock
    }

    /// Invalidates mappings of pages at or beyond `start` for the file's
    /// mappers (spec.md §4.1, `remove_pgtable_mappings`).
    pub fn remove_pgtable_mappings(&self, start: u64, invalidator: &dyn PageMapInvalidator) {
        invalidator.invalidate_from(start);
    }

    /// Writes `data` at byte `offset`, growing the file and materializing
    /// (zero-filled, then overwritten) backing pages as needed. Every page
    /// touched is left `DIRTY`, for `MfsInterface::fsync`/`sync_all` to
    /// pick up later.
    pub fn write_at(&self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = offset + data.len() as u64;
        let mut resizer = self.write_size();
        if end > resizer.size() {
            resizer.resize_append(end);
        }
        let mut written = 0usize;
        while written < data.len() {
            let pos = offset + written as u64;
            let page_idx = pos / BSIZE as u64;
            let page_off = (pos % BSIZE as u64) as usize;
            let chunk = core::cmp::min(BSIZE - page_off, data.len() - written);
            self.ensure_page_resident(page_idx);
            self.pages.with_page(page_idx, |state| {
                let state = state.expect("page slot must exist after ensure_page_resident");
                let snap = state.snapshot();
                debug_assert!(snap.valid(), "page must be resident before write_at touches it");
                // SAFETY: `ensure_page_resident` just installed this page, and
                // `resizer` (still held) serializes concurrent writers/resizes
                // of this same file.
                let ptr = unsafe { snap.page_ptr() as *mut PageInfo };
                unsafe {
                    (*ptr).data[page_off..page_off + chunk]
                        .copy_from_slice(&data[written..written + chunk]);
                }
                state.set_dirty(true);
            });
            written += chunk;
        }
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually copied (truncated at the file's current
    /// size). Pages with no resident backing (a hole) read as zero.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let size = self.read_size();
        if offset >= size || buf.is_empty() {
            return 0;
        }
        let avail = core::cmp::min(buf.len() as u64, size - offset) as usize;
        let mut done = 0usize;
        while done < avail {
            let pos = offset + done as u64;
            let page_idx = pos / BSIZE as u64;
            let page_off = (pos % BSIZE as u64) as usize;
            let chunk = core::cmp::min(BSIZE - page_off, avail - done);
            let dst = &mut buf[done..done + chunk];
            self.pages.with_page(page_idx, |state| match state {
                Some(state) if state.snapshot().valid() => {
                    let snap = state.snapshot();
                    // SAFETY: `snap.valid()` guarantees a live `PageInfo`, and
                    // the page-index lock (held by `with_page`) excludes a
                    // concurrent evict for the duration of this copy.
                    let page = unsafe { &*snap.page_ptr() };
                    dst.copy_from_slice(&page.data[page_off..page_off + chunk]);
                }
                _ => dst.fill(0),
            });
            done += chunk;
        }
        avail
    }

    /// Installs a zeroed page at `page_idx` if none is resident yet.
    fn ensure_page_resident(&self, page_idx: u64) {
        if let PageLookup::NeedsIo(_) = self.pages.get_page(page_idx) {
            self.pages.complete_fetch(page_idx, PageInfo::zeroed());
        }
    }
}

impl Default for File {
    fn default() -> Self {
        Self::new()
    }
}

/// A scoped acquisition token serializing one resize (grow or shrink) at
/// a time against readers of `size` and other resizers.
pub struct Resizer<'f> {
    _guard: SleepLockGuard<'f, ()>,
    writer: SeqWriter<'f, u64>,
    file: &'f File,
}

impl<'f> Resizer<'f> {
    /// The size as of the start of this resize epoch (or as last set by
    /// this same resizer).
    pub fn size(&self) -> u64 {
        self.writer.get()
    }

    /// Shrinks (or leaves unchanged) the file's size. Callers must first
    /// have freed/truncated any blocks beyond `new_size`.
    pub fn resize_nogrow(&mut self, new_size: u64) {
        debug_assert!(new_size <= self.writer.get(), "resize_nogrow must not grow");
        self.writer.set(new_size);
    }

    /// Grows the file to `new_size`, after the caller has populated the
    /// newly covered page(s).
    pub fn resize_append(&mut self, new_size: u64) -> &'f PageIndex {
        debug_assert!(new_size >= self.writer.get(), "resize_append must not shrink");
        self.writer.set(new_size);
        &self.file.pages
    }

    /// Sets the in-memory size to match what was just read off disk, used
    /// only during the `Uninitialized -> Initialized` transition.
    pub fn initialize_from_disk(&mut self, size: u64) {
        self.writer.set(size);
    }
}
