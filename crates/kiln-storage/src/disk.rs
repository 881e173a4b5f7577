//! Disk manager for page-level file I/O.

use kiln_common::page::{PageData, PageId, INVALID_PAGE_NUM, PAGE_SIZE};
use kiln_common::{KilnError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync when a file is synced.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages of named data files.
///
/// Files are registered by name and addressed by the numeric file ID handed
/// out at registration. Page numbers are 1-based: page `n` occupies byte
/// offset `(n - 1) * PAGE_SIZE`, leaving page number 0 free to serve as the
/// null sentinel in on-disk structures.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Registered files and the name-to-ID map.
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    files: Vec<FileState>,
    by_name: HashMap<String, u32>,
}

/// An open data file.
struct FileState {
    file: File,
    num_pages: u32,
}

impl DiskManager {
    /// Creates a disk manager rooted at the configured data directory.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                files: Vec::new(),
                by_name: HashMap::new(),
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Opens a data file by name, creating it if absent, and returns its
    /// file ID. Registering the same name twice yields the same ID.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        let mut inner = self.inner.lock();
        if let Some(&file_id) = inner.by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.config.data_dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        let file_id = inner.files.len() as u32;
        inner.files.push(FileState { file, num_pages });
        inner.by_name.insert(name.to_string(), file_id);
        Ok(file_id)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let inner = self.inner.lock();
        inner
            .files
            .get(file_id as usize)
            .map(|f| f.num_pages)
            .ok_or(KilnError::UnknownFile(file_id))
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<PageData>> {
        let mut inner = self.inner.lock();
        let state = inner
            .files
            .get_mut(page_id.file_id as usize)
            .ok_or(KilnError::UnknownFile(page_id.file_id))?;

        if page_id.page_num == INVALID_PAGE_NUM || page_id.page_num > state.num_pages {
            return Err(KilnError::PageNotFound(page_id));
        }

        state.file.seek(SeekFrom::Start(page_offset(page_id.page_num)))?;
        let mut buffer = Box::new([0u8; PAGE_SIZE]);
        state.file.read_exact(&mut buffer[..])?;
        Ok(buffer)
    }

    /// Writes a page to disk. The page must already be allocated.
    pub fn write_page(&self, page_id: PageId, data: &PageData) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner
            .files
            .get_mut(page_id.file_id as usize)
            .ok_or(KilnError::UnknownFile(page_id.file_id))?;

        if page_id.page_num == INVALID_PAGE_NUM || page_id.page_num > state.num_pages {
            return Err(KilnError::PageNotFound(page_id));
        }

        state.file.seek(SeekFrom::Start(page_offset(page_id.page_num)))?;
        state.file.write_all(data)?;
        Ok(())
    }

    /// Extends a file by one zeroed page and returns its page ID.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let state = inner
            .files
            .get_mut(file_id as usize)
            .ok_or(KilnError::UnknownFile(file_id))?;

        let page_num = state.num_pages + 1;
        state.file.seek(SeekFrom::Start(page_offset(page_num)))?;
        state.file.write_all(&[0u8; PAGE_SIZE])?;
        state.num_pages = page_num;
        Ok(PageId::new(file_id, page_num))
    }

    /// Syncs a file's content to stable storage, if fsync is enabled.
    pub fn sync_file(&self, file_id: u32) -> Result<()> {
        if !self.config.fsync_enabled {
            return Ok(());
        }
        let inner = self.inner.lock();
        let state = inner
            .files
            .get(file_id as usize)
            .ok_or(KilnError::UnknownFile(file_id))?;
        state.file.sync_all()?;
        Ok(())
    }
}

/// Byte offset of a 1-based page number.
#[inline]
fn page_offset(page_num: u32) -> u64 {
    (page_num as u64 - 1) * PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_disk() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap();
        (disk, dir)
    }

    #[test]
    fn test_open_file_registers_once() {
        let (disk, _dir) = test_disk();
        let a = disk.open_file("rel.dat").unwrap();
        let b = disk.open_file("rel.dat").unwrap();
        assert_eq!(a, b);
        assert_eq!(disk.num_pages(a).unwrap(), 0);
    }

    #[test]
    fn test_allocate_is_one_based() {
        let (disk, _dir) = test_disk();
        let file_id = disk.open_file("rel.dat").unwrap();

        let first = disk.allocate_page(file_id).unwrap();
        let second = disk.allocate_page(file_id).unwrap();
        assert_eq!(first.page_num, 1);
        assert_eq!(second.page_num, 2);
        assert_eq!(disk.num_pages(file_id).unwrap(), 2);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (disk, _dir) = test_disk();
        let file_id = disk.open_file("rel.dat").unwrap();
        let pid = disk.allocate_page(file_id).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAA;
        data[PAGE_SIZE - 1] = 0xBB;
        disk.write_page(pid, &data).unwrap();

        let read = disk.read_page(pid).unwrap();
        assert_eq!(read[0], 0xAA);
        assert_eq!(read[PAGE_SIZE - 1], 0xBB);
    }

    #[test]
    fn test_allocated_page_is_zeroed() {
        let (disk, _dir) = test_disk();
        let file_id = disk.open_file("rel.dat").unwrap();
        let pid = disk.allocate_page(file_id).unwrap();

        let read = disk.read_page(pid).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_unallocated_page_fails() {
        let (disk, _dir) = test_disk();
        let file_id = disk.open_file("rel.dat").unwrap();

        let err = disk.read_page(PageId::new(file_id, 1)).unwrap_err();
        assert!(matches!(err, KilnError::PageNotFound(_)));

        let err = disk.read_page(PageId::new(file_id, 0)).unwrap_err();
        assert!(matches!(err, KilnError::PageNotFound(_)));
    }

    #[test]
    fn test_unknown_file_rejected() {
        let (disk, _dir) = test_disk();
        let err = disk.num_pages(99).unwrap_err();
        assert!(matches!(err, KilnError::UnknownFile(99)));
    }

    #[test]
    fn test_reopen_sees_existing_pages() {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };

        {
            let disk = DiskManager::new(config.clone()).unwrap();
            let file_id = disk.open_file("rel.dat").unwrap();
            disk.allocate_page(file_id).unwrap();
            disk.allocate_page(file_id).unwrap();
        }

        let disk = DiskManager::new(config).unwrap();
        let file_id = disk.open_file("rel.dat").unwrap();
        assert_eq!(disk.num_pages(file_id).unwrap(), 2);
    }
}
