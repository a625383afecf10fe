// Path: crates/inodes/src/inode.rs

//! Live in-memory inode objects.
//!
//! An inode is shared by the map, by in-flight operations, and by strong
//! handles returned to the dispatcher; its lifetime is the longest holder.
//! The parent pointer is a bare inode number resolved through the map, so a
//! parent never keeps a child loaded and unload is legal without refcount
//! thrash.
//!
//! The two kinds share a base (number, parentage, ownership, timestamps)
//! behind a short mutex and carry kind-specific state behind an async
//! rwlock: reads of one inode run in parallel, writes serialize, and an
//! operation may suspend mid-fetch while holding only its own inode's lock.

use std::time::SystemTime;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::RwLock;

use canopy_types::error::FsError;
use canopy_types::inode::{Attributes, InodeNumber, InodeType};
use canopy_types::path::PathComponent;

use crate::file::FileState;
use crate::tree::TreeState;

/// Attributes common to any inode kind.
#[derive(Debug, Clone)]
pub struct InodeBase {
    /// The parent tree's number; `None` for the root and for unlinked
    /// inodes awaiting their final forget.
    pub parent: Option<InodeNumber>,
    /// This inode's name in its parent; `None` for the root.
    pub name: Option<PathComponent>,
    /// Full mode bits including the file-type bits.
    pub mode: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Descriptor count: 1 plus any extra hard links.
    pub links: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status-change time.
    pub ctime: SystemTime,
}

impl InodeBase {
    pub(crate) fn new(
        parent: Option<InodeNumber>,
        name: Option<PathComponent>,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Self {
        let now = SystemTime::now();
        InodeBase {
            parent,
            name,
            mode,
            uid,
            gid,
            links: 1,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

/// Kind-specific inode state behind the per-inode operation lock.
pub enum InodeState {
    /// Directory state.
    Tree(RwLock<TreeState>),
    /// File, executable, or symlink state.
    File(RwLock<FileState>),
}

/// One live inode.
pub struct Inode {
    number: InodeNumber,
    state: InodeState,
    base: Mutex<InodeBase>,
}

impl Inode {
    /// Builds a tree inode.
    pub(crate) fn new_tree(
        number: InodeNumber,
        base: InodeBase,
        state: TreeState,
    ) -> Self {
        Inode {
            number,
            state: InodeState::Tree(RwLock::new(state)),
            base: Mutex::new(base),
        }
    }

    /// Builds a file inode.
    pub(crate) fn new_file(
        number: InodeNumber,
        base: InodeBase,
        state: FileState,
    ) -> Self {
        Inode {
            number,
            state: InodeState::File(RwLock::new(state)),
            base: Mutex::new(base),
        }
    }

    /// The kernel-visible inode number.
    pub fn number(&self) -> InodeNumber {
        self.number
    }

    /// The coarse type tag.
    pub fn inode_type(&self) -> InodeType {
        match self.state {
            InodeState::Tree(_) => InodeType::Tree,
            InodeState::File(_) => InodeType::File,
        }
    }

    /// True for tree inodes.
    pub fn is_tree(&self) -> bool {
        matches!(self.state, InodeState::Tree(_))
    }

    /// Locks and returns the shared base attributes.
    pub fn base(&self) -> MutexGuard<'_, InodeBase> {
        self.base.lock()
    }

    /// The tree state lock, or `NotADirectory` for a file inode.
    pub(crate) fn tree_state(&self) -> Result<&RwLock<TreeState>, FsError> {
        match &self.state {
            InodeState::Tree(lock) => Ok(lock),
            InodeState::File(_) => Err(FsError::NotADirectory(self.number)),
        }
    }

    /// The file state lock, or `IsADirectory` for a tree inode.
    pub(crate) fn file_state(&self) -> Result<&RwLock<FileState>, FsError> {
        match &self.state {
            InodeState::File(lock) => Ok(lock),
            InodeState::Tree(_) => Err(FsError::IsADirectory(self.number)),
        }
    }

    /// Non-blocking materialization probe for the unload sweep. `None` when
    /// the state lock is contended (the sweep skips such inodes).
    pub(crate) fn probe_is_clean(&self) -> Option<bool> {
        match &self.state {
            InodeState::Tree(lock) => lock
                .try_read()
                .ok()
                .map(|state| matches!(&*state, TreeState::Clean { .. })),
            InodeState::File(lock) => lock
                .try_read()
                .ok()
                .map(|state| matches!(&*state, FileState::Clean { .. })),
        }
    }

    /// Assembles kernel-visible attributes from the base plus the
    /// kind-specific size and link count.
    pub(crate) fn attributes_with(&self, size: u64, nlink: u32) -> Attributes {
        let base = self.base.lock();
        Attributes {
            ino: self.number,
            size,
            mode: base.mode,
            nlink,
            uid: base.uid,
            gid: base.gid,
            atime: base.atime,
            mtime: base.mtime,
            ctime: base.ctime,
        }
    }

    /// Records a content modification.
    pub(crate) fn touch_modified(&self) {
        let now = SystemTime::now();
        let mut base = self.base.lock();
        base.mtime = now;
        base.ctime = now;
    }

    /// Records an access.
    pub(crate) fn touch_accessed(&self) {
        self.base.lock().atime = SystemTime::now();
    }
}

impl std::fmt::Debug for Inode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inode")
            .field("number", &self.number)
            .field("type", &self.inode_type())
            .finish()
    }
}
