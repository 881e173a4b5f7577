//! Disk-resident B+ tree index over one integer attribute of a relation.
//!
//! The index maps `i32` keys to [`RecordId`]s. Data entries live only in
//! leaf pages, which are chained through right-sibling links for range
//! scans; internal pages carry separator keys. Inserts descend from the
//! root, splitting full nodes on the way back up and promoting a new root
//! when the old root splits. At most one scan per index is active at a
//! time.
//!
//! All page access goes through the [`BufferManager`]: every read or
//! allocation pins a page and is balanced by exactly one unpin on every
//! return path, pages are unpinned dirty exactly when they were modified,
//! and an active scan keeps precisely its current leaf pinned.

mod meta;
mod node;
mod scan;

pub use meta::{IndexMeta, META_PAGE_NUM};
pub use node::{
    page_level, InternalNode, LeafNode, Node, INTERNAL_CAPACITY, LEAF_CAPACITY, LEAF_LEVEL,
};
pub use scan::{ScanOp, ScanRange};

use crate::buffer::BufferManager;
use crate::heap::HeapFile;
use crate::tuple::{key_at, RecordId};
use kiln_common::page::PageId;
use kiln_common::types::KeyType;
use kiln_common::{KilnError, Result};
use log::{debug, info};
use scan::ScanState;
use std::sync::Arc;

/// A B+ tree index over a single integer attribute.
pub struct BTreeIndex {
    buf: Arc<BufferManager>,
    /// Index file name, `"{relation}.{attr_byte_offset}"`.
    index_name: String,
    /// File ID of the index file.
    file_id: u32,
    /// Current root page number, mirrored in the meta page.
    root_page_num: u32,
    /// Byte offset of the indexed attribute within a record.
    attr_byte_offset: usize,
    /// Scan state machine; `Positioned` holds the one pinned leaf.
    scan: ScanState,
}

impl std::fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeIndex")
            .field("index_name", &self.index_name)
            .field("file_id", &self.file_id)
            .field("root_page_num", &self.root_page_num)
            .field("attr_byte_offset", &self.attr_byte_offset)
            .field("scan", &self.scan)
            .finish()
    }
}

impl BTreeIndex {
    /// Opens the index for `relation` on the attribute at
    /// `attr_byte_offset`, building it from the relation's records if the
    /// index file does not exist yet.
    ///
    /// The index file is named `"{relation}.{attr_byte_offset}"`. When the
    /// file exists, its meta page is validated against the arguments;
    /// a mismatch raises [`KilnError::BadIndexInfo`]. Only
    /// [`KeyType::Int`] keys are supported.
    pub fn open_or_create(
        buf: Arc<BufferManager>,
        relation: &HeapFile,
        attr_byte_offset: usize,
        key_type: KeyType,
    ) -> Result<BTreeIndex> {
        if key_type != KeyType::Int {
            return Err(KilnError::UnsupportedKeyType(key_type));
        }

        let index_name = format!("{}.{}", relation.name(), attr_byte_offset);
        let file_id = buf.disk().open_file(&index_name)?;

        if buf.disk().num_pages(file_id)? > 0 {
            Self::open_existing(buf, relation, attr_byte_offset, key_type, index_name, file_id)
        } else {
            Self::create(buf, relation, attr_byte_offset, key_type, index_name, file_id)
        }
    }

    /// Opens an existing index file, validating its meta page.
    fn open_existing(
        buf: Arc<BufferManager>,
        relation: &HeapFile,
        attr_byte_offset: usize,
        key_type: KeyType,
        index_name: String,
        file_id: u32,
    ) -> Result<BTreeIndex> {
        let meta_pid = PageId::new(file_id, META_PAGE_NUM);
        buf.read_page(meta_pid)?;
        let meta = buf.with_page(meta_pid, |d| IndexMeta::parse(meta_pid, d))?;
        buf.unpin_page(meta_pid, false)?;
        let meta = meta?;

        if !meta.matches(relation.name(), attr_byte_offset, key_type) {
            return Err(KilnError::BadIndexInfo(index_name));
        }

        info!("opened index {index_name}, root page {}", meta.root_page_num);
        Ok(BTreeIndex {
            buf,
            index_name,
            file_id,
            root_page_num: meta.root_page_num,
            attr_byte_offset,
            scan: ScanState::Idle,
        })
    }

    /// Creates the index file and bulk loads it from the relation.
    fn create(
        buf: Arc<BufferManager>,
        relation: &HeapFile,
        attr_byte_offset: usize,
        key_type: KeyType,
        index_name: String,
        file_id: u32,
    ) -> Result<BTreeIndex> {
        let mut index = BTreeIndex {
            buf,
            index_name,
            file_id,
            root_page_num: 0,
            attr_byte_offset,
            scan: ScanState::Idle,
        };

        let meta_pid = index.buf.alloc_page(file_id)?;
        let root_pid = index.alloc_leaf()?;
        index.root_page_num = root_pid.page_num;

        let meta = IndexMeta::new(relation.name(), attr_byte_offset, key_type, root_pid.page_num);
        index.buf.with_page_mut(meta_pid, |d| meta.write_to(d))?;
        index.buf.unpin_page(meta_pid, true)?;
        index.buf.unpin_page(root_pid, true)?;

        let mut entries = 0u64;
        for record in relation.scan() {
            let (rid, record) = record?;
            let key = key_at(&record, attr_byte_offset)?;
            index.insert_entry(key, rid)?;
            entries += 1;
        }
        index.buf.flush_file(file_id)?;

        info!("built index {} from {entries} records", index.index_name);
        Ok(index)
    }

    /// Returns the index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the index file ID.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the current root page number.
    pub fn root_page_num(&self) -> u32 {
        self.root_page_num
    }

    /// Returns the byte offset of the indexed attribute.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    fn pid(&self, page_num: u32) -> PageId {
        PageId::new(self.file_id, page_num)
    }

    // =========================================================================
    // Node allocation
    // =========================================================================

    /// Allocates a fresh leaf page. The page stays pinned; the caller
    /// unpins it dirty once it is filled in.
    fn alloc_leaf(&self) -> Result<PageId> {
        let pid = self.buf.alloc_page(self.file_id)?;
        self.buf.with_page_mut(pid, |d| LeafNode::new().write_to(d))?;
        Ok(pid)
    }

    /// Allocates a fresh internal page at `level`. The page stays pinned;
    /// the caller unpins it dirty once it is filled in.
    fn alloc_internal(&self, level: i32) -> Result<PageId> {
        let pid = self.buf.alloc_page(self.file_id)?;
        self.buf
            .with_page_mut(pid, |d| InternalNode::new(level).write_to(d))?;
        Ok(pid)
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts a `(key, rid)` entry into the index.
    ///
    /// Descends from the root; a split bubbling out of the root allocates a
    /// new root and records it in the meta page.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let root = self.root_page_num;
        let root_pid = self.pid(root);
        self.buf.read_page(root_pid)?;
        let root_level = self.buf.with_page(root_pid, page_level)?;
        self.buf.unpin_page(root_pid, false)?;

        if let Some((mid_key, new_right)) = self.insert_node(key, rid, root)? {
            let level = if root_level == LEAF_LEVEL {
                1
            } else {
                root_level + 1
            };
            let new_root_pid = self.alloc_internal(level)?;
            self.buf.with_page_mut(new_root_pid, |d| {
                let mut node = InternalNode::new(level);
                node.keys.push(mid_key);
                node.children.push(root);
                node.children.push(new_right);
                node.write_to(d);
            })?;
            self.buf.unpin_page(new_root_pid, true)?;

            self.root_page_num = new_root_pid.page_num;
            self.update_root(new_root_pid.page_num)?;
            debug!(
                "root promoted to page {} at level {level} (separator {mid_key})",
                new_root_pid.page_num
            );
        }
        Ok(())
    }

    /// Recursive insert: returns the `(separator, new right page)` of a
    /// split that the caller must absorb, or None.
    fn insert_node(&self, key: i32, rid: RecordId, page_num: u32) -> Result<Option<(i32, u32)>> {
        let pid = self.pid(page_num);
        self.buf.read_page(pid)?;
        let level = self.buf.with_page(pid, page_level)?;

        if level == LEAF_LEVEL {
            self.buf.unpin_page(pid, false)?;
            return self.leaf_insert(page_num, key, rid);
        }

        let child = self.buf.with_page(pid, |d| {
            let node = InternalNode::parse(d);
            node.children[node.child_slot(key)]
        })?;
        self.buf.unpin_page(pid, false)?;

        match self.insert_node(key, rid, child)? {
            None => Ok(None),
            Some((mid_key, new_child)) => self.internal_insert(page_num, mid_key, new_child),
        }
    }

    /// Inserts into a leaf, splitting when full.
    fn leaf_insert(&self, page_num: u32, key: i32, rid: RecordId) -> Result<Option<(i32, u32)>> {
        let pid = self.pid(page_num);
        self.buf.read_page(pid)?;
        let mut leaf = self.buf.with_page(pid, LeafNode::parse)?;

        if leaf.is_full() {
            // The probe did not modify the page; the split re-reads it.
            self.buf.unpin_page(pid, false)?;
            return self.leaf_split(page_num, key, rid).map(Some);
        }

        let at = leaf.insert_slot(key);
        leaf.keys.insert(at, key);
        leaf.rids.insert(at, rid);
        self.buf.with_page_mut(pid, |d| leaf.write_to(d))?;
        self.buf.unpin_page(pid, true)?;
        Ok(None)
    }

    /// Splits a full leaf around an incoming entry.
    ///
    /// The lower half stays in place, the upper half moves to a new right
    /// sibling, and the new sibling's smallest key is the separator copied
    /// up to the parent.
    fn leaf_split(&self, page_num: u32, key: i32, rid: RecordId) -> Result<(i32, u32)> {
        let pid = self.pid(page_num);
        self.buf.read_page(pid)?;
        let mut leaf = self.buf.with_page(pid, LeafNode::parse)?;

        let at = leaf.insert_slot(key);
        leaf.keys.insert(at, key);
        leaf.rids.insert(at, rid);

        let split_at = LEAF_CAPACITY / 2;
        let new_pid = self.alloc_leaf()?;
        let right = LeafNode {
            keys: leaf.keys.split_off(split_at),
            rids: leaf.rids.split_off(split_at),
            right_sibling: leaf.right_sibling,
        };
        leaf.right_sibling = new_pid.page_num;
        let mid_key = right.keys[0];

        self.buf.with_page_mut(new_pid, |d| right.write_to(d))?;
        self.buf.unpin_page(new_pid, true)?;
        self.buf.with_page_mut(pid, |d| leaf.write_to(d))?;
        self.buf.unpin_page(pid, true)?;

        debug!("leaf {page_num} split, new leaf {} (mid key {mid_key})", new_pid.page_num);
        Ok((mid_key, new_pid.page_num))
    }

    /// Inserts a separator and right child into an internal node,
    /// splitting when full.
    fn internal_insert(
        &self,
        page_num: u32,
        sep_key: i32,
        right_child: u32,
    ) -> Result<Option<(i32, u32)>> {
        let pid = self.pid(page_num);
        self.buf.read_page(pid)?;
        let mut node = self.buf.with_page(pid, InternalNode::parse)?;

        if node.is_full() {
            self.buf.unpin_page(pid, false)?;
            return self.internal_split(page_num, sep_key, right_child).map(Some);
        }

        let at = node.insert_slot(sep_key);
        node.keys.insert(at, sep_key);
        node.children.insert(at + 1, right_child);
        self.buf.with_page_mut(pid, |d| node.write_to(d))?;
        self.buf.unpin_page(pid, true)?;
        Ok(None)
    }

    /// Splits a full internal node around an incoming separator.
    ///
    /// Unlike a leaf split, the middle key moves up: it lands in the
    /// parent and is removed from both halves.
    fn internal_split(
        &self,
        page_num: u32,
        sep_key: i32,
        right_child: u32,
    ) -> Result<(i32, u32)> {
        let pid = self.pid(page_num);
        self.buf.read_page(pid)?;
        let mut node = self.buf.with_page(pid, InternalNode::parse)?;

        let at = node.insert_slot(sep_key);
        node.keys.insert(at, sep_key);
        node.children.insert(at + 1, right_child);

        let mid_at = INTERNAL_CAPACITY / 2;
        let mid_key = node.keys[mid_at];
        let new_pid = self.alloc_internal(node.level)?;
        let right = InternalNode {
            level: node.level,
            keys: node.keys.split_off(mid_at + 1),
            children: node.children.split_off(mid_at + 1),
        };
        node.keys.truncate(mid_at);

        self.buf.with_page_mut(new_pid, |d| right.write_to(d))?;
        self.buf.unpin_page(new_pid, true)?;
        self.buf.with_page_mut(pid, |d| node.write_to(d))?;
        self.buf.unpin_page(pid, true)?;

        debug!(
            "internal {page_num} split, new node {} (promoted key {mid_key})",
            new_pid.page_num
        );
        Ok((mid_key, new_pid.page_num))
    }

    /// Records a new root page number in the meta page.
    fn update_root(&self, new_root: u32) -> Result<()> {
        let meta_pid = self.pid(META_PAGE_NUM);
        self.buf.read_page(meta_pid)?;
        self.buf.with_page_mut(meta_pid, |d| IndexMeta::set_root(d, new_root))?;
        self.buf.unpin_page(meta_pid, true)?;
        Ok(())
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Positions a scan on the first entry satisfying the range.
    ///
    /// Rejects invalid operators with `BadOpcodes` and `low > high` with
    /// `BadScanrange`. If an earlier scan is still active it is ended
    /// first. `NoSuchKeyFound` is raised when the probed leaf proves no key
    /// can satisfy the range; a qualifying key reached only through the
    /// right-sibling hop is taken without a high-bound re-check, so a
    /// key beyond the high bound there surfaces as `IndexScanCompleted` on
    /// the first `scan_next` instead.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: ScanOp,
        high: i32,
        high_op: ScanOp,
    ) -> Result<()> {
        let range = ScanRange::new(low, low_op, high, high_op)?;

        match self.scan {
            ScanState::Positioned { .. } => self.end_scan()?,
            ScanState::Completed => self.scan = ScanState::Idle,
            ScanState::Idle => {}
        }

        // Descend to the leaf that may hold the low bound. The leaf stays
        // pinned; interior pages are unpinned as soon as a child is chosen.
        let mut page_num = self.root_page_num;
        loop {
            let pid = self.pid(page_num);
            self.buf.read_page(pid)?;
            if self.buf.with_page(pid, page_level)? == LEAF_LEVEL {
                break;
            }
            let child = self.buf.with_page(pid, |d| {
                let internal = InternalNode::parse(d);
                internal.children[internal.child_slot(range.low)]
            })?;
            self.buf.unpin_page(pid, false)?;
            page_num = child;
        }

        let pid = self.pid(page_num);
        let leaf = self.buf.with_page(pid, LeafNode::parse)?;

        // Probe for the smallest entry satisfying the low predicate. A key
        // past the high bound before one satisfies the low bound proves the
        // range empty, as does a qualifying key that itself lies outside
        // the high bound.
        let mut positioned = None;
        for (i, &key) in leaf.keys.iter().enumerate() {
            if range.satisfies_low(key) {
                if range.exceeds_high(key) {
                    self.buf.unpin_page(pid, false)?;
                    return Err(KilnError::NoSuchKeyFound);
                }
                positioned = Some(i);
                break;
            }
            if range.past_high(key) {
                self.buf.unpin_page(pid, false)?;
                return Err(KilnError::NoSuchKeyFound);
            }
        }

        match positioned {
            Some(next_entry) => {
                self.scan = ScanState::Positioned {
                    leaf: page_num,
                    next_entry,
                    range,
                };
            }
            None => {
                // Every key here precedes the range; the first entry of the
                // right sibling, if any, is the starting point.
                if leaf.right_sibling == 0 {
                    self.buf.unpin_page(pid, false)?;
                    return Err(KilnError::NoSuchKeyFound);
                }
                let sibling = leaf.right_sibling;
                self.buf.unpin_page(pid, false)?;
                self.buf.read_page(self.pid(sibling))?;
                self.scan = ScanState::Positioned {
                    leaf: sibling,
                    next_entry: 0,
                    range,
                };
            }
        }
        Ok(())
    }

    /// Yields the record locator of the next qualifying entry.
    ///
    /// Raises `ScanNotInitialized` without an active scan and
    /// `IndexScanCompleted` once the range is exhausted; the call that
    /// yields the final qualifying entry itself succeeds.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let (leaf_num, next_entry, range) = match self.scan {
            ScanState::Idle => return Err(KilnError::ScanNotInitialized),
            ScanState::Completed => return Err(KilnError::IndexScanCompleted),
            ScanState::Positioned {
                leaf,
                next_entry,
                range,
            } => (leaf, next_entry, range),
        };

        let pid = self.pid(leaf_num);
        let leaf = self.buf.with_page(pid, LeafNode::parse)?;

        let key = match leaf.keys.get(next_entry) {
            Some(&key) => key,
            None => {
                // Positioned past the leaf's entries; nothing left to yield.
                self.buf.unpin_page(pid, false)?;
                self.scan = ScanState::Completed;
                return Err(KilnError::IndexScanCompleted);
            }
        };

        if range.exceeds_high(key) {
            self.buf.unpin_page(pid, false)?;
            self.scan = ScanState::Completed;
            return Err(KilnError::IndexScanCompleted);
        }

        let rid = leaf.rids[next_entry];
        let next = next_entry + 1;
        if next == leaf.keys.len() {
            // End of this leaf: advance to the right sibling, or record
            // completion so it is reported on the next call.
            self.buf.unpin_page(pid, false)?;
            if leaf.right_sibling == 0 {
                self.scan = ScanState::Completed;
            } else {
                self.buf.read_page(self.pid(leaf.right_sibling))?;
                self.scan = ScanState::Positioned {
                    leaf: leaf.right_sibling,
                    next_entry: 0,
                    range,
                };
            }
        } else {
            self.scan = ScanState::Positioned {
                leaf: leaf_num,
                next_entry: next,
                range,
            };
        }
        Ok(rid)
    }

    /// Terminates the current scan, unpinning its leaf.
    ///
    /// Raises `ScanNotInitialized` if no scan is active.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan {
            ScanState::Idle => Err(KilnError::ScanNotInitialized),
            ScanState::Positioned { leaf, .. } => {
                self.buf.unpin_page(self.pid(leaf), false)?;
                self.scan = ScanState::Idle;
                Ok(())
            }
            ScanState::Completed => {
                self.scan = ScanState::Idle;
                Ok(())
            }
        }
    }
}

impl Drop for BTreeIndex {
    /// Ends any active scan and flushes the index file, best effort.
    fn drop(&mut self) {
        if let ScanState::Positioned { leaf, .. } = self.scan {
            let _ = self.buf.unpin_page(self.pid(leaf), false);
        }
        self.scan = ScanState::Idle;
        let _ = self.buf.flush_file(self.file_id);
    }
}
