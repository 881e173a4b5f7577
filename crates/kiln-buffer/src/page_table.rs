//! Residency map from page IDs to buffer frames.

use crate::frame::FrameId;
use kiln_common::page::PageId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps resident pages to the frames that hold them.
pub struct PageTable {
    map: RwLock<HashMap<PageId, FrameId>>,
}

impl PageTable {
    /// Creates a page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Returns the frame holding a page, if resident.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.map.read().get(&page_id).copied()
    }

    /// Records that a page now occupies a frame.
    #[inline]
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.map.write().insert(page_id, frame_id);
    }

    /// Removes a page's residency entry, returning its frame if present.
    #[inline]
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.map.write().remove(&page_id)
    }

    /// Returns true if the page is resident.
    #[inline]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.map.read().contains_key(&page_id)
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Returns a snapshot of all residency entries.
    pub fn entries(&self) -> Vec<(PageId, FrameId)> {
        self.map.read().iter().map(|(&p, &f)| (p, f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let table = PageTable::new(16);
        let pid = PageId::new(0, 5);

        assert!(table.get(pid).is_none());

        table.insert(pid, FrameId(3));
        assert_eq!(table.get(pid), Some(FrameId(3)));
        assert!(table.contains(pid));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(pid), Some(FrameId(3)));
        assert!(table.get(pid).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_overwrites() {
        let table = PageTable::new(16);
        let pid = PageId::new(1, 9);

        table.insert(pid, FrameId(1));
        table.insert(pid, FrameId(2));
        assert_eq!(table.get(pid), Some(FrameId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_entries_snapshot() {
        let table = PageTable::new(16);
        table.insert(PageId::new(0, 1), FrameId(0));
        table.insert(PageId::new(0, 2), FrameId(1));

        let mut entries = table.entries();
        entries.sort_by_key(|(p, _)| p.page_num);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (PageId::new(0, 1), FrameId(0)));
        assert_eq!(entries[1], (PageId::new(0, 2), FrameId(1)));
    }
}
