//! Forward scan over a heap relation.

use crate::heap::file::HeapFile;
use crate::heap::page::HeapPage;
use crate::record::RecordId;
use bytes::Bytes;
use std::sync::Arc;
use oxbow_common::page::PageId;
use oxbow_common::Result;

/// Sequential scanner yielding every record of a relation in file order.
///
/// Exhaustion is reported as `Ok(None)`; the caller never sees an
/// end-of-file failure.
pub struct HeapScan<'a> {
    heap: &'a HeapFile,
    next_page: u32,
    next_slot: u16,
}

impl<'a> HeapScan<'a> {
    pub(crate) fn new(heap: &'a HeapFile) -> Self {
        Self {
            heap,
            next_page: 1,
            next_slot: 0,
        }
    }

    /// Returns the next record and its id, or None when the relation is
    /// exhausted.
    pub fn next_record(&mut self) -> Result<Option<(RecordId, Bytes)>> {
        let pager = Arc::clone(self.heap.pager());
        let num_pages = self.heap.num_pages()?;

        while self.next_page <= num_pages {
            let page_id = PageId::new(self.heap.file_id(), self.next_page);
            let frame = pager.fetch_page(page_id)?;

            let found = {
                let data = frame.read_data();
                let slot_count = HeapPage::slot_count(&data[..]);
                let mut found = None;
                while self.next_slot < slot_count {
                    let slot_no = self.next_slot;
                    self.next_slot += 1;
                    if let Some(record) = HeapPage::record(&data[..], slot_no) {
                        found = Some((
                            RecordId::new(self.next_page, slot_no),
                            Bytes::copy_from_slice(record),
                        ));
                        break;
                    }
                }
                found
            };
            pager.unpin_page(page_id, false)?;

            if found.is_some() {
                return Ok(found);
            }

            self.next_page += 1;
            self.next_slot = 0;
        }

        Ok(None)
    }
}
