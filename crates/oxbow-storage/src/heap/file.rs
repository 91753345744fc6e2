//! Heap relation file: append-only record storage over slotted pages.

use crate::heap::page::HeapPage;
use crate::heap::scan::HeapScan;
use crate::pager::Pager;
use crate::record::RecordId;
use bytes::Bytes;
use std::sync::Arc;
use oxbow_common::page::PageId;
use oxbow_common::{OxbowError, Result};

/// A record-oriented relation file.
///
/// Records are appended into slotted pages and addressed by
/// `(page_no, slot_no)`. Pages are numbered from 1, so the record id
/// `(0, 0)` never refers to a stored record.
pub struct HeapFile {
    /// Pager mediating all page access.
    pager: Arc<Pager>,
    /// File id assigned by the file manager.
    file_id: u32,
    /// Relation name (also the file name).
    name: String,
}

impl HeapFile {
    /// Creates a new relation file.
    pub fn create(pager: &Arc<Pager>, name: &str) -> Result<Self> {
        let file_id = pager.file_manager().create_file(name)?;
        Ok(Self {
            pager: Arc::clone(pager),
            file_id,
            name: name.to_string(),
        })
    }

    /// Opens an existing relation file.
    pub fn open(pager: &Arc<Pager>, name: &str) -> Result<Self> {
        let file_id = pager.file_manager().open_file(name)?;
        Ok(Self {
            pager: Arc::clone(pager),
            file_id,
            name: name.to_string(),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file id.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the pager this relation uses.
    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// Returns the number of pages in the relation.
    pub fn num_pages(&self) -> Result<u32> {
        self.pager.file_manager().num_pages(self.file_id)
    }

    /// Appends a record, returning its record id.
    ///
    /// Tries the last page first and allocates a fresh page when it is full.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        let pager = Arc::clone(&self.pager);

        let last_page = self.num_pages()?;
        if last_page >= 1 {
            let page_id = PageId::new(self.file_id, last_page);
            let frame = pager.fetch_page(page_id)?;
            let inserted = {
                let mut data = frame.write_data();
                HeapPage::insert_record(&mut data[..], record)
            };
            match inserted {
                Ok(slot_no) => {
                    pager.unpin_page(page_id, true)?;
                    return Ok(RecordId::new(last_page, slot_no));
                }
                Err(OxbowError::PageFull) => {
                    pager.unpin_page(page_id, false)?;
                }
                Err(e) => {
                    pager.unpin_page(page_id, false)?;
                    return Err(e);
                }
            }
        }

        let (page_id, frame) = pager.alloc_page(self.file_id)?;
        let inserted = {
            let mut data = frame.write_data();
            HeapPage::init(&mut data[..]);
            HeapPage::insert_record(&mut data[..], record)
        };
        match inserted {
            Ok(slot_no) => {
                pager.unpin_page(page_id, true)?;
                Ok(RecordId::new(page_id.page_no, slot_no))
            }
            Err(e) => {
                pager.unpin_page(page_id, true)?;
                Err(e)
            }
        }
    }

    /// Fetches the bytes of a stored record.
    pub fn record(&self, rid: RecordId) -> Result<Bytes> {
        let pager = Arc::clone(&self.pager);
        let page_id = PageId::new(self.file_id, rid.page_no);

        let frame = pager.fetch_page(page_id)?;
        let record = {
            let data = frame.read_data();
            HeapPage::record(&data[..], rid.slot_no).map(Bytes::copy_from_slice)
        };
        pager.unpin_page(page_id, false)?;

        record.ok_or_else(|| OxbowError::RecordNotFound(format!("{} in {}", rid, self.name)))
    }

    /// Starts a forward scan over the relation.
    pub fn scan(&self) -> HeapScan<'_> {
        HeapScan::new(self)
    }

    /// Writes all dirty pages of the relation back to disk.
    pub fn flush(&self) -> Result<usize> {
        self.pager.flush_file(self.file_id)
    }
}
