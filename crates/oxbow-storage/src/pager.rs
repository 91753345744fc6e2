//! Pager: the pin/unpin page access protocol over pool and file manager.

use crate::file::FileManager;
use std::sync::Arc;
use oxbow_buffer::{BufferFrame, BufferPool};
use oxbow_common::page::PageId;
use oxbow_common::Result;

/// Mediates all page access for heap files and indexes.
///
/// Every fetch or allocation pins a frame; the caller must unpin it exactly
/// once, declaring whether the page was mutated. Dirty pages travel back to
/// disk either on an explicit flush or when the pool evicts them.
pub struct Pager {
    /// File manager for page I/O.
    disk: Arc<FileManager>,
    /// Buffer pool holding resident pages.
    pool: Arc<BufferPool>,
}

impl Pager {
    /// Creates a new pager.
    pub fn new(disk: Arc<FileManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    /// Returns the underlying file manager.
    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.disk
    }

    /// Returns the underlying buffer pool.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Pins a page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        if let Some(victim) = evicted {
            self.disk.write_page(victim.page_id, &victim.data)?;
        }
        Ok(frame)
    }

    /// Allocates a fresh page at the end of a file.
    ///
    /// The page is zero-filled on disk and returned pinned.
    pub fn alloc_page(&self, file_id: u32) -> Result<(PageId, &BufferFrame)> {
        let page_id = self.disk.allocate_page(file_id)?;
        let (frame, evicted) = self.pool.new_page(page_id)?;
        if let Some(victim) = evicted {
            self.disk.write_page(victim.page_id, &victim.data)?;
        }
        Ok((page_id, frame))
    }

    /// Unpins a page, recording whether it was mutated.
    ///
    /// Fails with PageNotPinned when the page holds no pin.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        self.pool.unpin_page(page_id, dirty)
    }

    /// Writes every dirty resident page of a file back to disk and syncs
    /// the file. Returns the number of pages written.
    pub fn flush_file(&self, file_id: u32) -> Result<usize> {
        let disk = &self.disk;
        let flushed = self
            .pool
            .flush_file(file_id, |pid, data| {
                let mut page = [0u8; oxbow_common::PAGE_SIZE];
                page.copy_from_slice(data);
                disk.write_page(pid, &page)
            })?;
        disk.flush_file(file_id)?;
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManagerConfig;
    use tempfile::tempdir;
    use oxbow_buffer::BufferPoolConfig;
    use oxbow_common::{OxbowError, PAGE_SIZE};

    fn create_test_pager(num_frames: usize) -> (Arc<Pager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            FileManager::new(FileManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames }));
        (Arc::new(Pager::new(disk, pool)), dir)
    }

    #[test]
    fn test_alloc_returns_pinned_zeroed_page() {
        let (pager, _dir) = create_test_pager(8);
        let file_id = pager.file_manager().create_file("relA").unwrap();

        let (pid, frame) = pager.alloc_page(file_id).unwrap();
        assert_eq!(pid.page_no, 1);
        assert!(frame.is_pinned());
        assert!(frame.read_data().iter().all(|&b| b == 0));

        pager.unpin_page(pid, false).unwrap();
    }

    #[test]
    fn test_fetch_reads_through_to_disk() {
        let (pager, _dir) = create_test_pager(2);
        let file_id = pager.file_manager().create_file("relA").unwrap();

        let (pid, frame) = pager.alloc_page(file_id).unwrap();
        frame.write_data()[0] = 0x5A;
        pager.unpin_page(pid, true).unwrap();
        pager.flush_file(file_id).unwrap();

        // Push the page out of the pool.
        for _ in 0..2 {
            let (other, _) = pager.alloc_page(file_id).unwrap();
            pager.unpin_page(other, false).unwrap();
        }
        assert!(!pager.buffer_pool().contains(pid));

        let frame = pager.fetch_page(pid).unwrap();
        assert_eq!(frame.read_data()[0], 0x5A);
        pager.unpin_page(pid, false).unwrap();
    }

    #[test]
    fn test_evicted_dirty_page_written_back() {
        let (pager, _dir) = create_test_pager(1);
        let file_id = pager.file_manager().create_file("relA").unwrap();

        let (pid, frame) = pager.alloc_page(file_id).unwrap();
        frame.write_data()[7] = 0x99;
        pager.unpin_page(pid, true).unwrap();

        // Allocating another page evicts the dirty one through the pager.
        let (pid2, _) = pager.alloc_page(file_id).unwrap();
        pager.unpin_page(pid2, false).unwrap();

        let data = pager.file_manager().read_page(pid).unwrap();
        assert_eq!(data[7], 0x99);
    }

    #[test]
    fn test_unpin_unpinned_page_fails() {
        let (pager, _dir) = create_test_pager(4);
        let file_id = pager.file_manager().create_file("relA").unwrap();

        let (pid, _) = pager.alloc_page(file_id).unwrap();
        pager.unpin_page(pid, false).unwrap();

        assert!(matches!(
            pager.unpin_page(pid, false),
            Err(OxbowError::PageNotPinned { .. })
        ));
    }

    #[test]
    fn test_flush_file_writes_dirty_pages() {
        let (pager, _dir) = create_test_pager(8);
        let file_id = pager.file_manager().create_file("relA").unwrap();

        let (pid, frame) = pager.alloc_page(file_id).unwrap();
        {
            let mut data = frame.write_data();
            data[0] = 0x11;
            data[PAGE_SIZE - 1] = 0x22;
        }
        pager.unpin_page(pid, true).unwrap();

        let flushed = pager.flush_file(file_id).unwrap();
        assert_eq!(flushed, 1);

        let data = pager.file_manager().read_page(pid).unwrap();
        assert_eq!(data[0], 0x11);
        assert_eq!(data[PAGE_SIZE - 1], 0x22);
    }

    #[test]
    fn test_pin_nesting() {
        let (pager, _dir) = create_test_pager(4);
        let file_id = pager.file_manager().create_file("relA").unwrap();

        let (pid, frame) = pager.alloc_page(file_id).unwrap();
        assert_eq!(frame.pin_count(), 1);

        let frame2 = pager.fetch_page(pid).unwrap();
        assert_eq!(frame2.pin_count(), 2);

        pager.unpin_page(pid, false).unwrap();
        pager.unpin_page(pid, false).unwrap();
        assert_eq!(frame.pin_count(), 0);
    }
}
