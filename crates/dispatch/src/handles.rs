// Path: crates/dispatch/src/handles.rs

//! Open-handle bookkeeping for files and directories.
//!
//! Handles are plain monotonic tokens the kernel passes back on `read`,
//! `write`, and `readdir`. Directory handles capture a listing snapshot at
//! open time so paging stays stable while the directory changes underneath.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use canopy_api::protocol::DirEntry;
use canopy_types::error::FsError;
use canopy_types::inode::InodeNumber;

struct DirHandle {
    ino: InodeNumber,
    entries: Vec<DirEntry>,
}

/// The per-dispatcher handle table.
pub struct HandleTable {
    next: AtomicU64,
    files: Mutex<HashMap<u64, InodeNumber>>,
    dirs: Mutex<HashMap<u64, DirHandle>>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        HandleTable {
            next: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn open_file(&self, ino: InodeNumber) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.files.lock().insert(fh, ino);
        fh
    }

    pub(crate) fn verify_file(&self, fh: u64, ino: InodeNumber) -> Result<(), FsError> {
        match self.files.lock().get(&fh) {
            Some(open_ino) if *open_ino == ino => Ok(()),
            _ => Err(FsError::InvalidArgument(format!(
                "unknown file handle {fh} for inode {ino}"
            ))),
        }
    }

    pub(crate) fn release_file(&self, fh: u64) {
        self.files.lock().remove(&fh);
    }

    pub(crate) fn open_dir(&self, ino: InodeNumber, entries: Vec<DirEntry>) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.dirs.lock().insert(fh, DirHandle { ino, entries });
        fh
    }

    /// Entries strictly after `offset`, which is the `offset` field of the
    /// last entry the kernel consumed (zero to start).
    pub(crate) fn read_dir(
        &self,
        fh: u64,
        ino: InodeNumber,
        offset: u64,
    ) -> Result<Vec<DirEntry>, FsError> {
        let dirs = self.dirs.lock();
        let handle = dirs.get(&fh).ok_or_else(|| {
            FsError::InvalidArgument(format!("unknown directory handle {fh}"))
        })?;
        if handle.ino != ino {
            return Err(FsError::InvalidArgument(format!(
                "directory handle {fh} does not belong to inode {ino}"
            )));
        }
        Ok(handle
            .entries
            .iter()
            .filter(|entry| entry.offset > offset)
            .cloned()
            .collect())
    }

    pub(crate) fn release_dir(&self, fh: u64) {
        self.dirs.lock().remove(&fh);
    }
}
