//! Range scans over the B+Tree index.

use super::index::BTreeIndex;
use super::meta::IndexMeta;
use super::node::{self, InternalNode, LeafNode};
use crate::record::RecordId;
use std::sync::Arc;
use oxbow_common::page::{PageId, NIL_PAGE_NO};
use oxbow_common::{OxbowError, Result};

/// Comparison operator carried by a range scan bound.
///
/// The low bound takes `Gt`/`Gte`, the high bound `Lt`/`Lte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Per-index scan state. A running scan keeps one leaf pinned between
/// `scan_next` calls; `end_scan` releases it.
#[derive(Debug)]
pub(super) struct ScanState {
    pub(super) executing: bool,
    pub(super) low_val: i32,
    pub(super) high_val: i32,
    pub(super) low_op: RangeOp,
    pub(super) high_op: RangeOp,
    /// The pinned leaf the scan is positioned on.
    pub(super) current_page_no: u32,
    /// Entry index within the current leaf.
    pub(super) next_entry: usize,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            executing: false,
            low_val: 0,
            high_val: 0,
            low_op: RangeOp::Gte,
            high_op: RangeOp::Lte,
            current_page_no: NIL_PAGE_NO,
            next_entry: 0,
        }
    }
}

impl BTreeIndex {
    /// Positions a scan on the first entry satisfying the low bound.
    ///
    /// Fails with `BadOpcodes` for a misplaced operator, `BadScanrange`
    /// when `low_val > high_val`, and `NoSuchKeyFound` (after ending the
    /// scan) when no entry qualifies.
    pub fn start_scan(
        &mut self,
        low_val: i32,
        low_op: RangeOp,
        high_val: i32,
        high_op: RangeOp,
    ) -> Result<()> {
        if low_op != RangeOp::Gt && low_op != RangeOp::Gte {
            return Err(OxbowError::BadOpcodes);
        }
        if high_op != RangeOp::Lt && high_op != RangeOp::Lte {
            return Err(OxbowError::BadOpcodes);
        }
        if low_val > high_val {
            return Err(OxbowError::BadScanrange);
        }

        // A prior scan would leak its pinned leaf if simply overwritten.
        if self.scan.executing {
            self.end_scan()?;
        }

        self.scan.low_val = low_val;
        self.scan.high_val = high_val;
        self.scan.low_op = low_op;
        self.scan.high_op = high_op;
        self.scan.executing = true;

        let pager = Arc::clone(&self.pager);

        // The metadata page holds the authoritative root.
        let meta_pid = PageId::new(self.file_id, self.header_page_no);
        let meta_frame = pager.fetch_page(meta_pid)?;
        let root_no = {
            let data = meta_frame.read_data();
            IndexMeta::from_bytes(&data[..])?.root_page_no
        };
        pager.unpin_page(meta_pid, false)?;

        // Descend to the leaf covering the low bound, pinning each child
        // before releasing its parent.
        let mut current = root_no;
        let mut frame = pager.fetch_page(PageId::new(self.file_id, current))?;
        loop {
            let next = {
                let data = frame.read_data();
                if node::is_leaf(&data[..]) {
                    None
                } else if InternalNode::key_count(&data[..]) == 0 {
                    // Never-seeded root: the index holds no entries.
                    Some(NIL_PAGE_NO)
                } else {
                    let index = InternalNode::search_index(&data[..], low_val);
                    Some(InternalNode::child(&data[..], index))
                }
            };
            match next {
                None => break,
                Some(NIL_PAGE_NO) => {
                    pager.unpin_page(PageId::new(self.file_id, current), false)?;
                    self.scan.executing = false;
                    return Err(OxbowError::NoSuchKeyFound);
                }
                Some(child) => {
                    let child_frame = pager.fetch_page(PageId::new(self.file_id, child))?;
                    pager.unpin_page(PageId::new(self.file_id, current), false)?;
                    current = child;
                    frame = child_frame;
                }
            }
        }
        self.scan.current_page_no = current;

        // Position on the first entry satisfying the low bound.
        let (position, key_count, right_sibling) = {
            let data = frame.read_data();
            let count = LeafNode::key_count(&data[..]);
            let mut position = None;
            for i in 0..count {
                let key = LeafNode::key(&data[..], i);
                let qualifies = match low_op {
                    RangeOp::Gte => key >= low_val,
                    _ => key > low_val,
                };
                if qualifies {
                    position = Some(i);
                    break;
                }
            }
            (position, count, LeafNode::right_sibling(&data[..]))
        };

        match position {
            Some(index) => {
                self.scan.next_entry = index;
            }
            None if right_sibling == NIL_PAGE_NO => {
                // No qualifying entry and no further leaf: park past the
                // end so the sentinel is observed below.
                self.scan.next_entry = key_count;
            }
            None => {
                let sibling_pid = PageId::new(self.file_id, right_sibling);
                pager.fetch_page(sibling_pid)?;
                pager.unpin_page(PageId::new(self.file_id, current), false)?;
                self.scan.current_page_no = right_sibling;
                self.scan.next_entry = 0;
            }
        }

        // The entry under the cursor must also satisfy the high bound.
        let current_pid = PageId::new(self.file_id, self.scan.current_page_no);
        let frame = pager.fetch_page(current_pid)?;
        let qualifies = {
            let data = frame.read_data();
            self.entry_in_range(&data[..], self.scan.next_entry)
        };
        pager.unpin_page(current_pid, false)?;

        if !qualifies {
            self.end_scan()?;
            return Err(OxbowError::NoSuchKeyFound);
        }
        Ok(())
    }

    /// Yields the record id under the cursor and advances it.
    ///
    /// Fails with `ScanNotInitialized` when no scan is active and with
    /// `IndexScanCompleted` once the range is exhausted; the scan stays
    /// active until `end_scan`.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        if !self.scan.executing {
            return Err(OxbowError::ScanNotInitialized);
        }

        let pager = Arc::clone(&self.pager);
        let current_pid = PageId::new(self.file_id, self.scan.current_page_no);

        // Probe the current leaf under a short-lived pin of its own; the
        // scan's pin on the leaf stays in place.
        let frame = pager.fetch_page(current_pid)?;
        let entry = self.scan.next_entry;
        let (rid, advance, right_sibling, key_count) = {
            let data = frame.read_data();
            let count = LeafNode::key_count(&data[..]);
            if !self.entry_in_range(&data[..], entry) {
                (None, false, NIL_PAGE_NO, count)
            } else {
                let rid = LeafNode::rid(&data[..], entry);
                // Step past the entry; an exhausted or empty position sends
                // the cursor to the right sibling.
                let next = entry + 1;
                let advance = next >= count || LeafNode::rid(&data[..], next).is_empty();
                (Some(rid), advance, LeafNode::right_sibling(&data[..]), count)
            }
        };
        pager.unpin_page(current_pid, false)?;

        let Some(rid) = rid else {
            return Err(OxbowError::IndexScanCompleted);
        };

        if advance {
            if right_sibling == NIL_PAGE_NO {
                // Last leaf: park past the end; the next call observes the
                // sentinel and completes.
                self.scan.next_entry = key_count;
            } else {
                // Hand the scan's pin off to the sibling: pin it, then
                // release the old leaf exactly once.
                let sibling_pid = PageId::new(self.file_id, right_sibling);
                pager.fetch_page(sibling_pid)?;
                pager.unpin_page(current_pid, false)?;
                self.scan.current_page_no = right_sibling;
                self.scan.next_entry = 0;
            }
        } else {
            self.scan.next_entry = entry + 1;
        }

        Ok(rid)
    }

    /// Releases the pinned leaf and deactivates the scan.
    pub fn end_scan(&mut self) -> Result<()> {
        if !self.scan.executing {
            return Err(OxbowError::ScanNotInitialized);
        }
        self.scan.executing = false;
        self.pager
            .unpin_page(PageId::new(self.file_id, self.scan.current_page_no), false)?;
        self.scan.current_page_no = NIL_PAGE_NO;
        Ok(())
    }

    /// True if the leaf entry at `index` exists, is not the empty-slot
    /// sentinel, and does not exceed the high bound.
    fn entry_in_range(&self, data: &[u8], index: usize) -> bool {
        if index >= LeafNode::key_count(data) {
            return false;
        }
        if LeafNode::rid(data, index).is_empty() {
            return false;
        }
        let key = LeafNode::key(data, index);
        if key > self.scan.high_val {
            return false;
        }
        !(key == self.scan.high_val && self.scan.high_op == RangeOp::Lt)
    }
}
