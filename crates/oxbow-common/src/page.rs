//! Page identifiers for oxbow storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (8 KiB).
pub const PAGE_SIZE: usize = 8 * 1024;

/// Page number 0 is reserved as the nil/sentinel value. Data pages are
/// numbered from 1 within their file.
pub const NIL_PAGE_NO: u32 = 0;

/// Unique identifier for a page across all open files.
///
/// Combines the file id assigned by the file manager with the 1-based page
/// number inside that file. Node-internal pointers store only the page
/// number; the file id is supplied by the owning index or heap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier assigned at open/create time.
    pub file_id: u32,
    /// 1-based page number within the file (0 = nil).
    pub page_no: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_no: u32) -> Self {
        Self { file_id, page_no }
    }

    /// Packs the PageId into a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_no as u64)
    }

    /// Unpacks a PageId from its u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_no: value as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_no)
    }
}
