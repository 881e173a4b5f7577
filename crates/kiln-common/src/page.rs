//! Page identifiers and the page buffer type.

use serde::{Deserialize, Serialize};

/// Page size in bytes (8 KiB).
pub const PAGE_SIZE: usize = 8 * 1024;

/// Reserved page number meaning "no page".
///
/// Page numbers are 1-based throughout KilnDB so that on-disk structures can
/// use 0 as an end-of-data or null-pointer sentinel.
pub const INVALID_PAGE_NUM: u32 = 0;

/// A raw page buffer.
pub type PageData = [u8; PAGE_SIZE];

/// Unique identifier for a page: a data file plus a 1-based page number
/// within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// Identifier of the data file this page belongs to.
    pub file_id: u32,
    /// 1-based page number within the file; 0 is [`INVALID_PAGE_NUM`].
    pub page_num: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Returns true if this PageId refers to an actual page.
    pub fn is_valid(&self) -> bool {
        self.page_num != INVALID_PAGE_NUM
    }

    /// Packs the PageId into a single u64.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }

    /// Unpacks a PageId from its u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_num: value as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}
