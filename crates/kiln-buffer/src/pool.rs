//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use kiln_common::page::{PageData, PageId, PAGE_SIZE};
use kiln_common::{KilnError, Result};
use parking_lot::Mutex;
use sysinfo::System;

/// A dirty page displaced from the pool by eviction.
///
/// The caller must write the data to disk before dropping it, otherwise the
/// modifications are lost.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Maintains a fixed array of frames, a residency map from page IDs to
/// frames, a free list, and a clock replacer. Pages are pinned while in use;
/// only unpinned frames are eviction candidates.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// The frame array.
    frames: Vec<BufferFrame>,
    /// Page residency map.
    page_table: PageTable,
    /// Frames not currently holding a page.
    free_list: Mutex<Vec<FrameId>>,
    /// Eviction policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to a quarter of available system RAM,
    /// with a floor of 1,000 frames for low-memory machines.
    pub fn auto_sized() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let target_bytes = (sys.available_memory() as usize) / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);
        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of resident pages.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Returns true if a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Fetches a resident page, pinning its frame. Returns None on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Returns a resident page's frame without pinning it.
    ///
    /// Intended for access to pages the caller already holds a pin on; the
    /// frame may be evicted at any time otherwise.
    pub fn peek_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        Some(&self.frames[frame_id.0 as usize])
    }

    /// Obtains a frame for a new page, evicting if the free list is empty.
    fn acquire_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let victim_id = self
            .replacer
            .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0)
            .ok_or(KilnError::BufferPoolFull)?;
        let frame = &self.frames[victim_id.0 as usize];

        let evicted = match (frame.is_dirty(), frame.page_id()) {
            (true, Some(page_id)) => {
                let mut data = Box::new([0u8; PAGE_SIZE]);
                data.copy_from_slice(&**frame.read());
                Some(EvictedPage { page_id, data })
            }
            _ => None,
        };

        if let Some(old_page_id) = frame.page_id() {
            self.page_table.remove(old_page_id);
        }

        Ok((victim_id, evicted))
    }

    /// Installs a page in the pool with zeroed content, pinned.
    ///
    /// If the page is already resident its existing frame is pinned and
    /// returned unchanged. Any dirty page displaced to make room is returned
    /// for the caller to write back.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.acquire_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Installs a page in the pool with the given content, pinned.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.fill_from(data);
        Ok((frame, evicted))
    }

    /// Releases one pin on a page, optionally marking it dirty.
    ///
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        match self.page_table.get(page_id) {
            Some(frame_id) => {
                let frame = &self.frames[frame_id.0 as usize];
                if is_dirty {
                    frame.set_dirty(true);
                }
                frame.unpin();
                true
            }
            None => false,
        }
    }

    /// Writes back all dirty pages selected by `filter`.
    ///
    /// The write callback receives the page ID and its bytes; on success the
    /// frame's dirty flag is cleared. Pages outside the filter keep their
    /// dirty state untouched. Returns the number of pages written.
    pub fn flush_where<P, W>(&self, filter: P, mut write: W) -> Result<usize>
    where
        P: Fn(PageId) -> bool,
        W: FnMut(PageId, &PageData) -> Result<()>,
    {
        let mut flushed = 0;
        for (page_id, frame_id) in self.page_table.entries() {
            if !filter(page_id) {
                continue;
            }
            let frame = &self.frames[frame_id.0 as usize];
            if !frame.is_dirty() {
                continue;
            }
            {
                let data = frame.read();
                write(page_id, &**data)?;
            }
            frame.set_dirty(false);
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Returns counters describing the pool's current occupancy.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for (_, frame_id) in self.page_table.entries() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Occupancy counters for a buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Frames on the free list.
    pub free_frames: usize,
    /// Frames holding a page.
    pub used_frames: usize,
    /// Frames with a nonzero pin count.
    pub pinned_frames: usize,
    /// Frames awaiting write-back.
    pub dirty_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(BufferPoolConfig { num_frames })
    }

    #[test]
    fn test_new_pool_is_empty() {
        let pool = test_pool(8);
        assert_eq!(pool.num_frames(), 8);
        assert_eq!(pool.free_count(), 8);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_new_page_pins() {
        let pool = test_pool(8);
        let pid = PageId::new(0, 1);

        let (frame, evicted) = pool.new_page(pid).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(pid));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 7);
        assert!(pool.contains(pid));
    }

    #[test]
    fn test_fetch_hit_and_miss() {
        let pool = test_pool(8);
        let pid = PageId::new(0, 1);

        assert!(pool.fetch_page(pid).is_none());

        pool.new_page(pid).unwrap();
        pool.unpin_page(pid, false);

        let frame = pool.fetch_page(pid).unwrap();
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_peek_does_not_pin() {
        let pool = test_pool(8);
        let pid = PageId::new(0, 1);
        pool.new_page(pid).unwrap();

        let frame = pool.peek_page(pid).unwrap();
        assert_eq!(frame.pin_count(), 1); // only the new_page pin
    }

    #[test]
    fn test_unpin_dirty_marks_frame() {
        let pool = test_pool(8);
        let pid = PageId::new(0, 1);

        pool.new_page(pid).unwrap();
        assert!(pool.unpin_page(pid, true));

        let frame = pool.peek_page(pid).unwrap();
        assert!(frame.is_dirty());
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_unpin_missing_page() {
        let pool = test_pool(8);
        assert!(!pool.unpin_page(PageId::new(0, 99), false));
    }

    #[test]
    fn test_eviction_of_clean_page() {
        let pool = test_pool(2);
        for n in 1..=2 {
            let pid = PageId::new(0, n);
            pool.new_page(pid).unwrap();
            pool.unpin_page(pid, false);
        }

        let (_, evicted) = pool.new_page(PageId::new(0, 3)).unwrap();
        assert!(evicted.is_none());
        assert_eq!(pool.page_count(), 2);
    }

    #[test]
    fn test_eviction_returns_dirty_page() {
        let pool = test_pool(1);
        let pid = PageId::new(0, 1);

        let (frame, _) = pool.new_page(pid).unwrap();
        frame.write()[0] = 0x5A;
        pool.unpin_page(pid, true);

        let (_, evicted) = pool.new_page(PageId::new(0, 2)).unwrap();
        let evicted = evicted.expect("dirty page must surface on eviction");
        assert_eq!(evicted.page_id, pid);
        assert_eq!(evicted.data[0], 0x5A);
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let pool = test_pool(2);
        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.new_page(PageId::new(0, 2)).unwrap();

        let result = pool.new_page(PageId::new(0, 3));
        assert!(matches!(result, Err(KilnError::BufferPoolFull)));
    }

    #[test]
    fn test_load_page_copies_content() {
        let pool = test_pool(4);
        let pid = PageId::new(0, 1);
        let src = [0xEEu8; PAGE_SIZE];

        let (frame, _) = pool.load_page(pid, &src).unwrap();
        assert_eq!(frame.read()[PAGE_SIZE - 1], 0xEE);
    }

    #[test]
    fn test_new_page_existing_returns_same_frame() {
        let pool = test_pool(4);
        let pid = PageId::new(0, 1);

        pool.new_page(pid).unwrap();
        pool.unpin_page(pid, false);

        let (frame, evicted) = pool.new_page(pid).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(pid));
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_flush_where_filters_and_clears_dirty() {
        let pool = test_pool(8);
        for n in 1..=3 {
            let pid = PageId::new(n % 2, n);
            pool.new_page(pid).unwrap();
            pool.unpin_page(pid, true);
        }

        let mut written = Vec::new();
        let flushed = pool
            .flush_where(
                |pid| pid.file_id == 1,
                |pid, _| {
                    written.push(pid);
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(flushed, 2); // pages 1 and 3 live in file 1
        assert_eq!(written.len(), 2);

        // file-0 page keeps its dirty bit
        let frame = pool.peek_page(PageId::new(0, 2)).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_stats() {
        let pool = test_pool(8);

        let p1 = PageId::new(0, 1);
        let p2 = PageId::new(0, 2);
        pool.new_page(p1).unwrap(); // stays pinned
        pool.new_page(p2).unwrap();
        pool.unpin_page(p2, true);

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 8);
        assert_eq!(stats.used_frames, 2);
        assert_eq!(stats.free_frames, 6);
        assert_eq!(stats.pinned_frames, 1);
        assert_eq!(stats.dirty_frames, 1);
    }
}
