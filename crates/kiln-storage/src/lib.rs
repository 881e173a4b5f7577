//! Storage engine for KilnDB.
//!
//! This crate provides:
//! - Disk manager for page-level I/O over named data files
//! - Buffer manager mediating all page access through the buffer pool
//! - Heap files storing a relation's records in slotted pages
//! - A disk-resident B+ tree index over a single integer attribute

mod buffer;
mod disk;
mod heap;
mod index;
mod tuple;

pub use buffer::BufferManager;
pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::{HeapFile, HeapPage, RecordScan, SlotId};
pub use index::{
    BTreeIndex, IndexMeta, InternalNode, LeafNode, Node, ScanOp, ScanRange, INTERNAL_CAPACITY,
    LEAF_CAPACITY, LEAF_LEVEL, META_PAGE_NUM,
};
pub use tuple::RecordId;
