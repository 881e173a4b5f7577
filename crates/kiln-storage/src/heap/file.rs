//! Heap file: a relation's records in buffer-managed slotted pages.

use crate::buffer::BufferManager;
use crate::heap::page::HeapPage;
use crate::tuple::RecordId;
use bytes::Bytes;
use kiln_common::page::PageId;
use kiln_common::{KilnError, Result};
use log::info;
use std::collections::VecDeque;
use std::sync::Arc;

/// A relation stored as a heap of slotted pages.
///
/// Records are append-only opaque byte strings; each is addressed by the
/// [`RecordId`] assigned at insertion. All page access goes through the
/// buffer manager, pinning pages only for the duration of one call.
pub struct HeapFile {
    buf: Arc<BufferManager>,
    file_id: u32,
    name: String,
}

impl HeapFile {
    /// Opens a relation by name, creating its heap file if absent.
    pub fn open_or_create(buf: Arc<BufferManager>, name: &str) -> Result<HeapFile> {
        let file_id = buf.disk().open_file(name)?;
        info!(
            "opened relation {name} ({} pages)",
            buf.disk().num_pages(file_id)?
        );
        Ok(Self {
            buf,
            file_id,
            name: name.to_string(),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the heap file ID.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of pages in the heap file.
    pub fn num_pages(&self) -> Result<u32> {
        self.buf.disk().num_pages(self.file_id)
    }

    /// Appends a record to the relation and returns its locator.
    ///
    /// Tries the last page first and extends the file when it is full.
    pub fn append(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() > HeapPage::MAX_RECORD {
            return Err(KilnError::RecordTooLarge {
                size: record.len(),
                max: HeapPage::MAX_RECORD,
            });
        }

        let num_pages = self.num_pages()?;
        if num_pages > 0 {
            let pid = PageId::new(self.file_id, num_pages);
            match self.append_to_page(pid, record)? {
                Some(rid) => return Ok(rid),
                None => {} // page full, extend below
            }
        }

        let pid = self.buf.alloc_page(self.file_id)?;
        let mut page = HeapPage::new();
        let slot = page.append(record)?;
        self.buf.with_page_mut(pid, |d| d.copy_from_slice(page.as_bytes()))?;
        self.buf.unpin_page(pid, true)?;
        Ok(RecordId::new(pid.page_num, slot.0))
    }

    /// Tries to append into an existing page; None means the page is full.
    fn append_to_page(&self, pid: PageId, record: &[u8]) -> Result<Option<RecordId>> {
        self.buf.read_page(pid)?;
        let mut page = self.buf.with_page(pid, HeapPage::from_bytes)?;
        match page.append(record) {
            Ok(slot) => {
                self.buf.with_page_mut(pid, |d| d.copy_from_slice(page.as_bytes()))?;
                self.buf.unpin_page(pid, true)?;
                Ok(Some(RecordId::new(pid.page_num, slot.0)))
            }
            Err(KilnError::PageFull) => {
                self.buf.unpin_page(pid, false)?;
                Ok(None)
            }
            Err(e) => {
                self.buf.unpin_page(pid, false)?;
                Err(e)
            }
        }
    }

    /// Fetches a record by locator, or None if the locator is out of range.
    pub fn record(&self, rid: RecordId) -> Result<Option<Bytes>> {
        if !rid.is_valid() || rid.page_num > self.num_pages()? {
            return Ok(None);
        }
        let pid = PageId::new(self.file_id, rid.page_num);
        self.buf.read_page(pid)?;
        let record = self
            .buf
            .with_page(pid, |d| HeapPage::from_bytes(d).record(crate::heap::SlotId(rid.slot)))?;
        self.buf.unpin_page(pid, false)?;
        Ok(record)
    }

    /// Scans all records in storage order.
    ///
    /// The returned iterator yields `(RecordId, record bytes)`; exhaustion
    /// signals end of stream.
    pub fn scan(&self) -> RecordScan<'_> {
        RecordScan {
            heap: self,
            next_page: 1,
            last_page: self.num_pages().unwrap_or(0),
            pending: VecDeque::new(),
            failed: false,
        }
    }

    /// Writes all of the relation's dirty pages back to disk.
    pub fn flush(&self) -> Result<()> {
        self.buf.flush_file(self.file_id)?;
        Ok(())
    }
}

/// Iterator over a heap file's records in storage order.
pub struct RecordScan<'a> {
    heap: &'a HeapFile,
    /// Next page to load (1-based).
    next_page: u32,
    /// Page count captured when the scan started.
    last_page: u32,
    /// Records of the current page not yet yielded.
    pending: VecDeque<(RecordId, Bytes)>,
    /// Set after an I/O error; the scan ends.
    failed: bool,
}

impl RecordScan<'_> {
    /// Loads the next page's records into the pending queue.
    fn load_next_page(&mut self) -> Result<()> {
        let pid = PageId::new(self.heap.file_id, self.next_page);
        self.next_page += 1;

        let buf = &self.heap.buf;
        buf.read_page(pid)?;
        let records = buf.with_page(pid, |d| {
            HeapPage::from_bytes(d)
                .records()
                .map(|(slot, bytes)| (RecordId::new(pid.page_num, slot.0), bytes))
                .collect::<Vec<_>>()
        })?;
        buf.unpin_page(pid, false)?;

        self.pending.extend(records);
        Ok(())
    }
}

impl Iterator for RecordScan<'_> {
    type Item = Result<(RecordId, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }
            if self.next_page > self.last_page {
                return None;
            }
            if let Err(e) = self.load_next_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}
