//! Buffer manager: pinned page access mediating pool and disk.

use crate::disk::DiskManager;
use kiln_common::page::{PageData, PageId};
use kiln_common::{KilnError, Result};
use kiln_buffer::{BufferPool, EvictedPage};
use log::debug;
use std::sync::Arc;

/// Mediates every page access through the buffer pool, reading through to
/// disk on a miss and writing back dirty pages displaced by eviction.
///
/// Callers follow an explicit pinning discipline: each [`read_page`] or
/// [`alloc_page`] pins the page and must be balanced by exactly one
/// [`unpin_page`] on every return path. Dirtiness is declared at unpin time.
/// While pinned, a page's bytes are reachable through [`with_page`] and
/// [`with_page_mut`].
///
/// [`read_page`]: BufferManager::read_page
/// [`alloc_page`]: BufferManager::alloc_page
/// [`unpin_page`]: BufferManager::unpin_page
/// [`with_page`]: BufferManager::with_page
/// [`with_page_mut`]: BufferManager::with_page_mut
pub struct BufferManager {
    pool: Arc<BufferPool>,
    disk: Arc<DiskManager>,
}

impl BufferManager {
    /// Creates a buffer manager over a pool and disk manager.
    pub fn new(pool: Arc<BufferPool>, disk: Arc<DiskManager>) -> Self {
        Self { pool, disk }
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Writes back a dirty page displaced by eviction.
    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            debug!("writing back evicted page {}", page.page_id);
            self.disk.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }

    /// Pins a page, loading it from disk if it is not resident.
    pub fn read_page(&self, page_id: PageId) -> Result<()> {
        if self.pool.fetch_page(page_id).is_some() {
            return Ok(());
        }

        let data = self.disk.read_page(page_id)?;
        let (_, evicted) = self.pool.load_page(page_id, &data[..])?;
        self.write_back(evicted)
    }

    /// Extends a file by one page and pins the new page, zeroed.
    pub fn alloc_page(&self, file_id: u32) -> Result<PageId> {
        let page_id = self.disk.allocate_page(file_id)?;
        let (_, evicted) = self.pool.new_page(page_id)?;
        self.write_back(evicted)?;
        Ok(page_id)
    }

    /// Releases one pin on a page, recording whether it was modified.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        if self.pool.unpin_page(page_id, dirty) {
            Ok(())
        } else {
            Err(KilnError::PageNotResident(page_id))
        }
    }

    /// Reads the bytes of a pinned page.
    pub fn with_page<R>(&self, page_id: PageId, f: impl FnOnce(&PageData) -> R) -> Result<R> {
        let frame = self
            .pool
            .peek_page(page_id)
            .ok_or(KilnError::PageNotResident(page_id))?;
        let data = frame.read();
        Ok(f(&data))
    }

    /// Mutates the bytes of a pinned page.
    ///
    /// The page is not marked dirty here; the caller declares dirtiness when
    /// unpinning.
    pub fn with_page_mut<R>(
        &self,
        page_id: PageId,
        f: impl FnOnce(&mut PageData) -> R,
    ) -> Result<R> {
        let frame = self
            .pool
            .peek_page(page_id)
            .ok_or(KilnError::PageNotResident(page_id))?;
        let mut data = frame.write();
        Ok(f(&mut data))
    }

    /// Writes back every dirty resident page of a file and syncs it.
    pub fn flush_file(&self, file_id: u32) -> Result<usize> {
        let flushed = self.pool.flush_where(
            |pid| pid.file_id == file_id,
            |pid, data| self.disk.write_page(pid, data),
        )?;
        self.disk.sync_file(file_id)?;
        Ok(flushed)
    }

    /// Returns the number of currently pinned pages across the pool.
    pub fn pinned_pages(&self) -> usize {
        self.pool.stats().pinned_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use kiln_buffer::BufferPoolConfig;
    use tempfile::tempdir;

    fn test_buffer(num_frames: usize) -> (BufferManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames }));
        (BufferManager::new(pool, disk), dir)
    }

    #[test]
    fn test_alloc_pins_zeroed_page() {
        let (buf, _dir) = test_buffer(8);
        let file_id = buf.disk().open_file("t.dat").unwrap();

        let pid = buf.alloc_page(file_id).unwrap();
        assert_eq!(pid.page_num, 1);
        assert_eq!(buf.pinned_pages(), 1);

        let all_zero = buf.with_page(pid, |d| d.iter().all(|&b| b == 0)).unwrap();
        assert!(all_zero);

        buf.unpin_page(pid, false).unwrap();
        assert_eq!(buf.pinned_pages(), 0);
    }

    #[test]
    fn test_read_page_loads_from_disk() {
        let (buf, _dir) = test_buffer(8);
        let file_id = buf.disk().open_file("t.dat").unwrap();

        let pid = buf.alloc_page(file_id).unwrap();
        buf.with_page_mut(pid, |d| d[10] = 0x77).unwrap();
        buf.unpin_page(pid, true).unwrap();
        buf.flush_file(file_id).unwrap();

        // Force the page out of the pool by filling all frames.
        for _ in 0..8 {
            let p = buf.alloc_page(file_id).unwrap();
            buf.unpin_page(p, false).unwrap();
        }

        buf.read_page(pid).unwrap();
        let byte = buf.with_page(pid, |d| d[10]).unwrap();
        assert_eq!(byte, 0x77);
        buf.unpin_page(pid, false).unwrap();
    }

    #[test]
    fn test_evicted_dirty_page_written_back() {
        let (buf, _dir) = test_buffer(1);
        let file_id = buf.disk().open_file("t.dat").unwrap();

        let first = buf.alloc_page(file_id).unwrap();
        buf.with_page_mut(first, |d| d[0] = 0x42).unwrap();
        buf.unpin_page(first, true).unwrap();

        // Allocating a second page evicts the first; its content must land
        // on disk without an explicit flush.
        let second = buf.alloc_page(file_id).unwrap();
        buf.unpin_page(second, false).unwrap();

        let data = buf.disk().read_page(first).unwrap();
        assert_eq!(data[0], 0x42);
    }

    #[test]
    fn test_with_page_requires_residency() {
        let (buf, _dir) = test_buffer(2);
        let pid = PageId::new(0, 1);
        let err = buf.with_page(pid, |_| ()).unwrap_err();
        assert!(matches!(err, KilnError::PageNotResident(_)));
    }

    #[test]
    fn test_unpin_unknown_page_fails() {
        let (buf, _dir) = test_buffer(2);
        let err = buf.unpin_page(PageId::new(0, 9), false).unwrap_err();
        assert!(matches!(err, KilnError::PageNotResident(_)));
    }

    #[test]
    fn test_flush_file_only_touches_that_file() {
        let (buf, _dir) = test_buffer(8);
        let a = buf.disk().open_file("a.dat").unwrap();
        let b = buf.disk().open_file("b.dat").unwrap();

        let pa = buf.alloc_page(a).unwrap();
        buf.with_page_mut(pa, |d| d[0] = 1).unwrap();
        buf.unpin_page(pa, true).unwrap();

        let pb = buf.alloc_page(b).unwrap();
        buf.with_page_mut(pb, |d| d[0] = 2).unwrap();
        buf.unpin_page(pb, true).unwrap();

        assert_eq!(buf.flush_file(a).unwrap(), 1);
        // b's page is still dirty in the pool and not yet on disk
        assert_eq!(buf.disk().read_page(pb).unwrap()[0], 0);
        assert_eq!(buf.flush_file(b).unwrap(), 1);
        assert_eq!(buf.disk().read_page(pb).unwrap()[0], 2);
    }
}
