//! File manager for page-level I/O over named database files.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use oxbow_common::page::{PageId, PAGE_SIZE};
use oxbow_common::{OxbowError, Result};

/// Configuration for the file manager.
#[derive(Debug, Clone)]
pub struct FileManagerConfig {
    /// Base directory for database files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages of named database files.
///
/// Files are registered by name (heap relations and index files carry
/// user-visible names) and addressed afterwards through the `u32` file id
/// assigned at open/create time. Pages are numbered from 1; page number 0
/// is the nil sentinel and is never stored.
pub struct FileManager {
    /// Configuration.
    config: FileManagerConfig,
    /// Open file state.
    inner: Mutex<Inner>,
}

struct Inner {
    /// Open file handles keyed by file id.
    files: HashMap<u32, FileHandle>,
    /// Name to file id mapping for open files.
    by_name: HashMap<String, u32>,
    /// Next file id to hand out.
    next_file_id: u32,
}

/// Handle for an open database file.
struct FileHandle {
    /// The OS file handle.
    file: File,
    /// Registered name.
    name: String,
    /// Number of allocated pages.
    num_pages: u32,
}

impl FileManager {
    /// Creates a new file manager, creating the data directory if needed.
    pub fn new(config: FileManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                files: HashMap::new(),
                by_name: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    fn register(&self, inner: &mut Inner, name: &str, file: File, num_pages: u32) -> u32 {
        let file_id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.files.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        inner.by_name.insert(name.to_string(), file_id);
        file_id
    }

    /// Creates a new database file and returns its file id.
    ///
    /// Fails with FileExists if a file of that name is already present.
    pub fn create_file(&self, name: &str) -> Result<u32> {
        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(name) {
            return Err(OxbowError::FileExists(name.to_string()));
        }

        let path = self.file_path(name);
        if path.exists() {
            return Err(OxbowError::FileExists(name.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(self.register(&mut inner, name, file, 0))
    }

    /// Opens an existing database file and returns its file id.
    ///
    /// Fails with FileNotFound if no file of that name exists.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        let mut inner = self.inner.lock();
        if let Some(&file_id) = inner.by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OxbowError::FileNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(self.register(&mut inner, name, file, num_pages))
    }

    /// Returns the registered name of an open file.
    pub fn file_name(&self, file_id: u32) -> Option<String> {
        self.inner
            .lock()
            .files
            .get(&file_id)
            .map(|h| h.name.clone())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(OxbowError::PageNotFound {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            })?;

        if page_id.page_no == 0 || page_id.page_no > handle.num_pages {
            return Err(OxbowError::PageNotFound {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(OxbowError::PageNotFound {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            })?;

        if page_id.page_no == 0 || page_id.page_no > handle.num_pages {
            return Err(OxbowError::PageNotFound {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Allocates the next page of a file, extending it with a zeroed page.
    ///
    /// Page numbers are handed out sequentially starting at 1.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&file_id)
            .ok_or(OxbowError::PageNotFound {
                file_id,
                page_no: 0,
            })?;

        let page_no = handle.num_pages + 1;
        let offset = (page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_no;
        Ok(PageId::new(file_id, page_no))
    }

    /// Returns the number of allocated pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let inner = self.inner.lock();
        inner
            .files
            .get(&file_id)
            .map(|h| h.num_pages)
            .ok_or(OxbowError::PageNotFound {
                file_id,
                page_no: 0,
            })
    }

    /// Flushes a file's pending writes to disk.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(handle) = inner.files.get(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes an open file, syncing it first.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.files.remove(&file_id) {
            inner.by_name.remove(&handle.name);
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Removes a database file, closing it first if open.
    pub fn remove_file(&self, name: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if let Some(file_id) = inner.by_name.remove(name) {
                inner.files.remove(&file_id);
            }
        }

        let path = self.file_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OxbowError::FileNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.by_name.clear();
        for (_, handle) in inner.files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
