// Path: crates/inodes/src/mem_overlay.rs

//! An in-memory overlay.
//!
//! The durable on-disk overlay is an external collaborator; this
//! implementation satisfies the same contract from process memory and backs
//! tests and single-process mounts.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use canopy_api::overlay::Overlay;
use canopy_types::error::FsError;
use canopy_types::inode::{ChildEntry, InodeNumber};
use canopy_types::path::PathComponent;

#[derive(Default)]
struct OverlayEntry {
    data: Vec<u8>,
    children: BTreeMap<PathComponent, ChildEntry>,
}

/// [`Overlay`] storage held entirely in process memory.
#[derive(Default)]
pub struct MemoryOverlay {
    entries: Mutex<HashMap<InodeNumber, OverlayEntry>>,
}

impl MemoryOverlay {
    /// An empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(
        &self,
        ino: InodeNumber,
        f: impl FnOnce(&mut OverlayEntry) -> T,
    ) -> Result<T, FsError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&ino)
            .ok_or_else(|| FsError::Internal(format!("overlay entry missing for inode {ino}")))?;
        Ok(f(entry))
    }
}

#[async_trait]
impl Overlay for MemoryOverlay {
    async fn allocate(&self, ino: InodeNumber) -> Result<(), FsError> {
        self.entries.lock().entry(ino).or_default();
        Ok(())
    }

    async fn read(&self, ino: InodeNumber, offset: u64, len: usize) -> Result<Bytes, FsError> {
        self.with_entry(ino, |entry| {
            let start = (offset as usize).min(entry.data.len());
            let end = start.saturating_add(len).min(entry.data.len());
            Bytes::copy_from_slice(entry.data.get(start..end).unwrap_or(&[]))
        })
    }

    async fn write(&self, ino: InodeNumber, offset: u64, data: &[u8]) -> Result<u64, FsError> {
        self.with_entry(ino, |entry| {
            let end = offset as usize + data.len();
            if entry.data.len() < end {
                entry.data.resize(end, 0);
            }
            if let Some(slot) = entry.data.get_mut(offset as usize..end) {
                slot.copy_from_slice(data);
            }
            entry.data.len() as u64
        })
    }

    async fn truncate(&self, ino: InodeNumber, new_size: u64) -> Result<(), FsError> {
        self.with_entry(ino, |entry| {
            entry.data.resize(new_size as usize, 0);
        })
    }

    async fn list_children(&self, ino: InodeNumber) -> Result<Vec<ChildEntry>, FsError> {
        self.with_entry(ino, |entry| entry.children.values().cloned().collect())
    }

    async fn set_child(&self, ino: InodeNumber, child: ChildEntry) -> Result<(), FsError> {
        self.with_entry(ino, |entry| {
            entry.children.insert(child.name.clone(), child);
        })
    }

    async fn remove_child(&self, ino: InodeNumber, name: &PathComponent) -> Result<(), FsError> {
        self.with_entry(ino, |entry| {
            entry.children.remove(name);
        })
    }

    async fn flush(&self) -> Result<(), FsError> {
        Ok(())
    }
}
