//! Error types for oxbow.

use thiserror::Error;

/// Result type alias using OxbowError.
pub type Result<T> = std::result::Result<T, OxbowError>;

/// Errors that can occur in oxbow operations.
#[derive(Debug, Error)]
pub enum OxbowError {
    // I/O and file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    // Page and buffer pool errors
    #[error("page {page_no} does not exist in file {file_id}")]
    PageNotFound { file_id: u32, page_no: u32 },

    #[error("page {page_no} of file {file_id} is not pinned")]
    PageNotPinned { file_id: u32, page_no: u32 },

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page full, unable to insert record")]
    PageFull,

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("record not found: {0}")]
    RecordNotFound(String),

    // Index errors
    #[error("index metadata does not match: {0}")]
    BadIndexInfo(String),

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    // Scan errors
    #[error("scan operator not in the permitted set")]
    BadOpcodes,

    #[error("scan range low bound exceeds high bound")]
    BadScanrange,

    #[error("no key found in the given range")]
    NoSuchKeyFound,

    #[error("scan not initialized")]
    ScanNotInitialized,

    #[error("index scan completed")]
    IndexScanCompleted,
}
