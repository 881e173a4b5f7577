//! Buffer pool management for KilnDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Pin counting so callers control page residency
//! - Dirty page tracking for deferred write-back
//! - Clock (second-chance) eviction of unpinned frames

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage};
pub use replacer::{ClockReplacer, Replacer};
