//! Buffer frames: the pool slots that hold resident pages.

use kiln_common::page::{PageData, PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Packed sentinel meaning no page occupies the frame.
const NO_PAGE: u64 = u64::MAX;

/// Index of a frame within the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A buffer pool slot holding one page plus its bookkeeping state.
///
/// The pin count is the pool's reference count on the page: a frame with a
/// nonzero pin count is never selected for eviction. Dirtiness is declared by
/// the caller when unpinning and cleared when the page is written back.
pub struct BufferFrame {
    /// Frame index in the pool.
    frame_id: FrameId,
    /// Occupying page, packed as u64 (NO_PAGE when empty).
    page: AtomicU64,
    /// Page bytes.
    data: RwLock<Box<PageData>>,
    /// Number of outstanding pins.
    pins: AtomicU32,
    /// Set when the frame content differs from its on-disk page.
    dirty: AtomicBool,
    /// Second-chance bit consulted by the clock replacer.
    referenced: AtomicBool,
}

impl BufferFrame {
    /// Creates an empty frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page: AtomicU64::new(NO_PAGE),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pins: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            referenced: AtomicBool::new(false),
        }
    }

    /// Returns the frame index.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page currently held by this frame, if any.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        match self.page.load(Ordering::Acquire) {
            NO_PAGE => None,
            packed => Some(PageId::from_u64(packed)),
        }
    }

    /// Assigns or clears the page held by this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        let packed = page_id.map(|p| p.as_u64()).unwrap_or(NO_PAGE);
        self.page.store(packed, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::Acquire)
    }

    /// Adds a pin and sets the second-chance bit.
    #[inline]
    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
        self.referenced.store(true, Ordering::Relaxed);
    }

    /// Removes a pin, returning the new pin count. Saturates at zero.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            self.pins.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if any pins are outstanding.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the frame content needs write-back.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Returns the second-chance bit.
    #[inline]
    pub fn referenced(&self) -> bool {
        self.referenced.load(Ordering::Relaxed)
    }

    /// Clears the second-chance bit.
    #[inline]
    pub fn clear_referenced(&self) {
        self.referenced.store(false, Ordering::Relaxed);
    }

    /// Acquires read access to the page bytes.
    #[inline]
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Box<PageData>> {
        self.data.read()
    }

    /// Acquires write access to the page bytes.
    #[inline]
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Box<PageData>> {
        self.data.write()
    }

    /// Overwrites the frame content from a source buffer.
    #[inline]
    pub fn fill_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Returns the frame to its empty, zeroed state.
    pub fn reset(&self) {
        self.page.store(NO_PAGE, Ordering::Release);
        self.pins.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.referenced.store(false, Ordering::Relaxed);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pins", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
