//! Heap relation storage.
//!
//! - HeapPage: slotted page format for variable-length records
//! - HeapFile: append-only relation file
//! - HeapScan: forward scan in file order

mod file;
mod page;
mod scan;

pub use file::HeapFile;
pub use page::{HeapPage, HEAP_HEADER_SIZE, MAX_RECORD_SIZE, SLOT_SIZE};
pub use scan::HeapScan;
