use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::TransferError;
use crate::treehash::{LEAF_SIZE, TreeHash, TreeHasher};

/// Anything the archive can be read from.
pub trait ArchiveSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveSource for T {}

/// Shared, read-only handle to the archive being uploaded.
///
/// Clones share one read cursor behind a single lock, so at most one
/// reader seeks and reads at a time. The lock is held only for the
/// duration of [`read_range`](Self::read_range).
#[derive(Clone)]
pub struct Archive {
    source: Arc<Mutex<Box<dyn ArchiveSource>>>,
    len: u64,
}

impl Archive {
    /// Wraps a seekable source. The length is taken from its end position.
    pub fn new(mut source: impl ArchiveSource + 'static) -> Result<Self, TransferError> {
        let len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        let source: Box<dyn ArchiveSource> = Box::new(source);
        Ok(Self {
            source: Arc::new(Mutex::new(source)),
            len,
        })
    }

    /// Opens a file on disk as an archive.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        Self::new(File::open(path)?)
    }

    /// Total archive size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads exactly `len` bytes starting at `offset`. Blocking.
    pub fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(TransferError::OutOfBounds {
                offset,
                len,
                archive_len: self.len,
            });
        }

        let mut buf = vec![0u8; len as usize];
        let mut source = self.source.lock().map_err(|_| TransferError::Poisoned)?;
        source.seek(SeekFrom::Start(offset))?;
        source.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Tree hash of the whole archive, read leaf by leaf. Blocking.
    pub fn tree_hash(&self) -> Result<TreeHash, TransferError> {
        let mut hasher = TreeHasher::new();
        let mut offset = 0;
        while offset < self.len {
            let take = (self.len - offset).min(LEAF_SIZE as u64);
            let leaf = self.read_range(offset, take)?;
            hasher.update(&leaf);
            offset += take;
        }
        Ok(hasher.finish())
    }
}
