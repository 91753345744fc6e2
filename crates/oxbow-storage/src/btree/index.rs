//! B+Tree secondary index over a heap relation.
//!
//! Maps an integer attribute of every relation record to its record id.
//! The tree lives in its own paged file: page 1 holds the metadata, the
//! root starts on page 2 and moves when root splits promote a new one.
//! All node access goes through the pager with pin/unpin discipline; node
//! contents are mutated in place on the pinned buffers.

use super::constants::{INTERNAL_CAPACITY, LEAF_CAPACITY};
use super::meta::{IndexMeta, RELATION_NAME_MAX};
use super::node::{self, InternalNode, LeafNode};
use super::scan::ScanState;
use crate::heap::HeapFile;
use crate::pager::Pager;
use crate::record::RecordId;
use std::sync::Arc;
use oxbow_buffer::BufferFrame;
use oxbow_common::page::{PageId, NIL_PAGE_NO};
use oxbow_common::types::AttrType;
use oxbow_common::{OxbowError, Result};

/// Disk-resident B+Tree index on one integer attribute of a relation.
///
/// Single-threaded: every operation takes `&mut self` and completes before
/// the next begins. A running scan holds one pinned leaf between calls.
pub struct BTreeIndex {
    pub(super) pager: Arc<Pager>,
    pub(super) file_id: u32,
    /// External index file name, `"<relation>.<attrByteOffset>"`.
    pub(super) index_name: String,
    /// Page number of the metadata page.
    pub(super) header_page_no: u32,
    /// Cached root page number; the metadata page holds the authoritative copy.
    pub(super) root_page_no: u32,
    pub(super) scan: ScanState,
}

impl BTreeIndex {
    /// Opens the index for `relation` on the attribute at `attr_byte_offset`,
    /// creating and bulk-populating it from the relation if it does not
    /// exist yet.
    ///
    /// On open, the stored metadata must agree with every argument or the
    /// call fails with `BadIndexInfo`.
    pub fn open_or_create(
        pager: &Arc<Pager>,
        relation: &HeapFile,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let index_name = format!("{}.{}", relation.name(), attr_byte_offset);

        match pager.file_manager().open_file(&index_name) {
            Ok(file_id) => Self::open_existing(
                pager,
                file_id,
                index_name,
                relation.name(),
                attr_byte_offset,
                attr_type,
            ),
            Err(OxbowError::FileNotFound(_)) => {
                Self::create(pager, relation, index_name, attr_byte_offset, attr_type)
            }
            Err(e) => Err(e),
        }
    }

    fn open_existing(
        pager: &Arc<Pager>,
        file_id: u32,
        index_name: String,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let header_page_no = 1;
        let meta_pid = PageId::new(file_id, header_page_no);

        let frame = pager.fetch_page(meta_pid)?;
        let meta = {
            let data = frame.read_data();
            IndexMeta::from_bytes(&data[..])
        };
        pager.unpin_page(meta_pid, false)?;
        let meta = meta?;

        if meta.relation_name != relation_name
            || meta.attr_type != attr_type
            || meta.attr_byte_offset as usize != attr_byte_offset
        {
            return Err(OxbowError::BadIndexInfo(index_name));
        }

        Ok(Self {
            pager: Arc::clone(pager),
            file_id,
            index_name,
            header_page_no,
            root_page_no: meta.root_page_no,
            scan: ScanState::default(),
        })
    }

    fn create(
        pager: &Arc<Pager>,
        relation: &HeapFile,
        index_name: String,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        if relation.name().len() > RELATION_NAME_MAX {
            return Err(OxbowError::BadIndexInfo(index_name));
        }

        let file_id = pager.file_manager().create_file(&index_name)?;

        // Page 1: metadata. Page 2: the initial root, an empty internal
        // node that the first insert seeds with two leaves.
        let (meta_pid, meta_frame) = pager.alloc_page(file_id)?;
        let (root_pid, root_frame) = pager.alloc_page(file_id)?;

        {
            let mut data = root_frame.write_data();
            InternalNode::init(&mut data[..], 0);
        }

        let meta = IndexMeta {
            relation_name: relation.name().to_string(),
            attr_byte_offset: attr_byte_offset as u32,
            attr_type,
            root_page_no: root_pid.page_no,
        };
        {
            let mut data = meta_frame.write_data();
            data[..IndexMeta::SIZE].copy_from_slice(&meta.to_bytes());
        }

        pager.unpin_page(meta_pid, true)?;
        pager.unpin_page(root_pid, true)?;

        let mut index = Self {
            pager: Arc::clone(pager),
            file_id,
            index_name,
            header_page_no: meta_pid.page_no,
            root_page_no: root_pid.page_no,
            scan: ScanState::default(),
        };

        let mut relation_scan = relation.scan();
        while let Some((rid, record)) = relation_scan.next_record()? {
            let key = extract_key(&record, attr_byte_offset)?;
            index.insert_entry(key, rid)?;
        }
        index.pager.flush_file(file_id)?;

        Ok(index)
    }

    /// Returns the external index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the index file id.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the current root page number.
    pub fn root_page_no(&self) -> u32 {
        self.root_page_no
    }

    /// Returns the pager this index uses.
    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// Inserts one (key, rid) pair. Always succeeds; the tree grows as
    /// needed and duplicate keys are permitted.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        self.insert(key, self.root_page_no, rid)
    }

    /// Recursive descent insert.
    fn insert(&mut self, key: i32, page_no: u32, rid: RecordId) -> Result<()> {
        let pager = Arc::clone(&self.pager);
        let pid = PageId::new(self.file_id, page_no);
        let frame = pager.fetch_page(pid)?;

        let leaf = {
            let data = frame.read_data();
            node::is_leaf(&data[..])
        };
        let mut dirty = false;

        if !leaf {
            let key_count = {
                let data = frame.read_data();
                InternalNode::key_count(&data[..])
            };
            if key_count == 0 {
                self.seed_root(frame, page_no, key, rid)?;
                dirty = true;
            } else {
                let child = {
                    let data = frame.read_data();
                    let index = InternalNode::search_index(&data[..], key);
                    InternalNode::child(&data[..], index)
                };
                self.insert(key, child, rid)?;
            }
        } else {
            let key_count = {
                let data = frame.read_data();
                LeafNode::key_count(&data[..])
            };
            if key_count < LEAF_CAPACITY {
                let mut data = frame.write_data();
                LeafNode::insert_sorted(&mut data[..], key, rid);
                dirty = true;
            } else {
                self.split_leaf_insert(page_no, key, rid)?;
                dirty = true;
            }
        }

        pager.unpin_page(pid, dirty)
    }

    /// First insert into the empty root: seed two leaves under it.
    ///
    /// The seed separator is one past the inserted key, so the key sorts
    /// into the left leaf and everything at or above the separator goes
    /// right.
    fn seed_root(
        &self,
        root_frame: &BufferFrame,
        root_page_no: u32,
        key: i32,
        rid: RecordId,
    ) -> Result<()> {
        let pager = Arc::clone(&self.pager);
        let (left_pid, left_frame) = pager.alloc_page(self.file_id)?;
        let (right_pid, right_frame) = pager.alloc_page(self.file_id)?;

        {
            let mut left = left_frame.write_data();
            LeafNode::init(&mut left[..]);
            LeafNode::set_key(&mut left[..], 0, key);
            LeafNode::set_rid(&mut left[..], 0, rid);
            LeafNode::set_key_count(&mut left[..], 1);
            LeafNode::set_parent(&mut left[..], root_page_no);
            LeafNode::set_right_sibling(&mut left[..], right_pid.page_no);
        }
        {
            let mut right = right_frame.write_data();
            LeafNode::init(&mut right[..]);
            LeafNode::set_parent(&mut right[..], root_page_no);
        }
        {
            let mut root = root_frame.write_data();
            InternalNode::set_key(&mut root[..], 0, key.wrapping_add(1));
            InternalNode::set_child(&mut root[..], 0, left_pid.page_no);
            InternalNode::set_child(&mut root[..], 1, right_pid.page_no);
            InternalNode::set_level(&mut root[..], 1);
            InternalNode::set_key_count(&mut root[..], 1);
        }

        pager.unpin_page(left_pid, true)?;
        pager.unpin_page(right_pid, true)?;
        Ok(())
    }

    /// Splits a full leaf, routes the pending entry into the proper half,
    /// and merges the resulting one-key stub into the old parent.
    fn split_leaf_insert(&mut self, page_no: u32, key: i32, rid: RecordId) -> Result<()> {
        let pager = Arc::clone(&self.pager);
        let pid = PageId::new(self.file_id, page_no);
        let frame = pager.fetch_page(pid)?;

        let (new_pid, new_frame) = pager.alloc_page(self.file_id)?;
        let old_parent;
        let separator;
        {
            let mut left = frame.write_data();
            let mut right = new_frame.write_data();
            LeafNode::init(&mut right[..]);
            LeafNode::split_into(&mut left[..], &mut right[..]);

            // Splice the new leaf into the sibling chain.
            LeafNode::set_right_sibling(&mut right[..], LeafNode::right_sibling(&left[..]));
            LeafNode::set_right_sibling(&mut left[..], new_pid.page_no);

            old_parent = LeafNode::parent(&left[..]);
            separator = LeafNode::key(&right[..], 0);
        }

        // One-key internal stub over the two halves.
        let (stub_pid, stub_frame) = pager.alloc_page(self.file_id)?;
        {
            let mut stub = stub_frame.write_data();
            InternalNode::init(&mut stub[..], 1);
            InternalNode::set_key(&mut stub[..], 0, separator);
            InternalNode::set_child(&mut stub[..], 0, page_no);
            InternalNode::set_child(&mut stub[..], 1, new_pid.page_no);
            InternalNode::set_key_count(&mut stub[..], 1);

            let mut left = frame.write_data();
            LeafNode::set_parent(&mut left[..], stub_pid.page_no);
            let mut right = new_frame.write_data();
            LeafNode::set_parent(&mut right[..], stub_pid.page_no);
        }

        if key < separator {
            let mut left = frame.write_data();
            LeafNode::insert_sorted(&mut left[..], key, rid);
        } else {
            let mut right = new_frame.write_data();
            LeafNode::insert_sorted(&mut right[..], key, rid);
        }

        self.combine(stub_pid.page_no, old_parent)?;

        pager.unpin_page(pid, true)?;
        pager.unpin_page(new_pid, true)?;
        pager.unpin_page(stub_pid, true)?;
        Ok(())
    }

    /// Merges a one-separator stub into an existing internal node.
    ///
    /// Either the node has room (the separator is spliced in and the stub's
    /// two children reparented), or the node splits and the promotion
    /// recurses through a fresh stub, replacing the root at the top.
    fn combine(&mut self, stub_no: u32, parent_no: u32) -> Result<()> {
        let pager = Arc::clone(&self.pager);
        let stub_pid = PageId::new(self.file_id, stub_no);
        let parent_pid = PageId::new(self.file_id, parent_no);

        let stub_frame = pager.fetch_page(stub_pid)?;
        let parent_frame = pager.fetch_page(parent_pid)?;

        let (separator, left_child, right_child, stub_level) = {
            let stub = stub_frame.read_data();
            (
                InternalNode::key(&stub[..], 0),
                InternalNode::child(&stub[..], 0),
                InternalNode::child(&stub[..], 1),
                InternalNode::level(&stub[..]),
            )
        };
        let parent_count = {
            let parent = parent_frame.read_data();
            InternalNode::key_count(&parent[..])
        };

        if parent_count < INTERNAL_CAPACITY {
            {
                let mut parent = parent_frame.write_data();
                InternalNode::insert_separator(
                    &mut parent[..],
                    separator,
                    left_child,
                    right_child,
                );
            }
            self.set_parent_of(left_child, parent_no, stub_level == 1)?;
            self.set_parent_of(right_child, parent_no, stub_level == 1)?;
        } else {
            self.split_internal(parent_no, parent_frame, separator, left_child, right_child)?;
        }

        pager.unpin_page(stub_pid, false)?;
        pager.unpin_page(parent_pid, true)?;
        Ok(())
    }

    /// Splits a full internal node around its middle key and pushes the
    /// promotion upward, replacing the root if the split node was it.
    fn split_internal(
        &mut self,
        parent_no: u32,
        parent_frame: &BufferFrame,
        separator: i32,
        left_child: u32,
        right_child: u32,
    ) -> Result<()> {
        let pager = Arc::clone(&self.pager);
        let (sibling_pid, sibling_frame) = pager.alloc_page(self.file_id)?;
        let (promoted_pid, promoted_frame) = pager.alloc_page(self.file_id)?;

        let promoted_key;
        {
            let mut parent = parent_frame.write_data();
            let mut sibling = sibling_frame.write_data();
            InternalNode::init(&mut sibling[..], 0);
            promoted_key = InternalNode::split_into(&mut parent[..], &mut sibling[..]);
        }
        {
            let mut promoted = promoted_frame.write_data();
            InternalNode::init(&mut promoted[..], 0);
            InternalNode::set_key(&mut promoted[..], 0, promoted_key);
            InternalNode::set_child(&mut promoted[..], 0, parent_no);
            InternalNode::set_child(&mut promoted[..], 1, sibling_pid.page_no);
            InternalNode::set_key_count(&mut promoted[..], 1);
        }

        // The pending separator lands in whichever half its key routes to;
        // both halves just halved, so it cannot overflow.
        if separator < promoted_key {
            let mut parent = parent_frame.write_data();
            InternalNode::insert_separator(&mut parent[..], separator, left_child, right_child);
        } else {
            let mut sibling = sibling_frame.write_data();
            InternalNode::insert_separator(&mut sibling[..], separator, left_child, right_child);
        }

        // Re-point every child of both halves at the half that now holds it.
        let (parent_level, parent_count) = {
            let parent = parent_frame.read_data();
            (
                InternalNode::level(&parent[..]),
                InternalNode::key_count(&parent[..]),
            )
        };
        for i in 0..=parent_count {
            let child = {
                let parent = parent_frame.read_data();
                InternalNode::child(&parent[..], i)
            };
            self.set_parent_of(child, parent_no, parent_level == 1)?;
        }

        let (sibling_level, sibling_count) = {
            let sibling = sibling_frame.read_data();
            (
                InternalNode::level(&sibling[..]),
                InternalNode::key_count(&sibling[..]),
            )
        };
        for i in 0..=sibling_count {
            let child = {
                let sibling = sibling_frame.read_data();
                InternalNode::child(&sibling[..], i)
            };
            self.set_parent_of(child, sibling_pid.page_no, sibling_level == 1)?;
        }

        let grandparent = {
            let parent = parent_frame.read_data();
            InternalNode::parent(&parent[..])
        };
        {
            let mut parent = parent_frame.write_data();
            InternalNode::set_parent(&mut parent[..], promoted_pid.page_no);
            let mut sibling = sibling_frame.write_data();
            InternalNode::set_parent(&mut sibling[..], promoted_pid.page_no);
        }

        if grandparent == NIL_PAGE_NO {
            // The split node was the root; the fresh parent takes over.
            self.update_root(promoted_pid.page_no)?;
        } else {
            self.combine(promoted_pid.page_no, grandparent)?;
        }

        pager.unpin_page(sibling_pid, true)?;
        pager.unpin_page(promoted_pid, true)?;
        Ok(())
    }

    /// Rewrites a child's parent back-pointer.
    fn set_parent_of(&self, child_no: u32, parent_no: u32, child_is_leaf: bool) -> Result<()> {
        let pager = Arc::clone(&self.pager);
        let pid = PageId::new(self.file_id, child_no);
        let frame = pager.fetch_page(pid)?;
        {
            let mut data = frame.write_data();
            if child_is_leaf {
                LeafNode::set_parent(&mut data[..], parent_no);
            } else {
                InternalNode::set_parent(&mut data[..], parent_no);
            }
        }
        pager.unpin_page(pid, true)
    }

    /// Records a new root in the metadata page and the cached copy.
    fn update_root(&mut self, new_root_no: u32) -> Result<()> {
        let pager = Arc::clone(&self.pager);
        let meta_pid = PageId::new(self.file_id, self.header_page_no);
        let frame = pager.fetch_page(meta_pid)?;
        {
            let mut data = frame.write_data();
            IndexMeta::set_root_page_no(&mut data[..], new_root_no);
        }
        pager.unpin_page(meta_pid, true)?;
        self.root_page_no = new_root_no;
        Ok(())
    }

    /// Ends any live scan, flushes the index file, and releases it.
    pub fn close(&mut self) -> Result<()> {
        if self.scan.executing {
            match self.end_scan() {
                Ok(()) | Err(OxbowError::PageNotPinned { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.pager.flush_file(self.file_id)?;
        self.pager.file_manager().close_file(self.file_id)?;
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Extracts the integer key at `attr_byte_offset` from a record.
fn extract_key(record: &[u8], attr_byte_offset: usize) -> Result<i32> {
    let end = attr_byte_offset + 4;
    if record.len() < end {
        return Err(OxbowError::IndexCorrupted(
            "record shorter than the indexed attribute".to_string(),
        ));
    }
    Ok(i32::from_le_bytes([
        record[attr_byte_offset],
        record[attr_byte_offset + 1],
        record[attr_byte_offset + 2],
        record[attr_byte_offset + 3],
    ]))
}
