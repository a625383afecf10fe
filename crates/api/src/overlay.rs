// Path: crates/api/src/overlay.rs

//! Per-inode typed storage for user mutations.

use async_trait::async_trait;
use bytes::Bytes;

use canopy_types::error::FsError;
use canopy_types::inode::{ChildEntry, InodeNumber};
use canopy_types::path::PathComponent;

/// The overlay contract the inode engine consumes.
///
/// The overlay stores the diverged state of materialized inodes: file
/// contents keyed by inode number, and the child maps of materialized
/// trees. The durable overlay is an external collaborator; an in-process
/// memory implementation ships with the inode crate for tests and
/// single-process mounts.
///
/// All operations are keyed by inode number, which the caller guarantees
/// has been [`allocate`](Overlay::allocate)d first.
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Reserves overlay storage for an inode about to materialize.
    async fn allocate(&self, ino: InodeNumber) -> Result<(), FsError>;

    /// Reads up to `len` bytes of a file's overlay contents at `offset`.
    /// Reads past the end return the available prefix, empty at or past the
    /// end.
    async fn read(&self, ino: InodeNumber, offset: u64, len: usize) -> Result<Bytes, FsError>;

    /// Writes `data` at `offset`, zero-filling any gap, and returns the
    /// file's new total size.
    async fn write(&self, ino: InodeNumber, offset: u64, data: &[u8]) -> Result<u64, FsError>;

    /// Truncates or zero-extends a file to `new_size`.
    async fn truncate(&self, ino: InodeNumber, new_size: u64) -> Result<(), FsError>;

    /// Lists a materialized tree's child descriptors.
    async fn list_children(&self, ino: InodeNumber) -> Result<Vec<ChildEntry>, FsError>;

    /// Inserts or replaces one child descriptor of a materialized tree.
    async fn set_child(&self, ino: InodeNumber, entry: ChildEntry) -> Result<(), FsError>;

    /// Removes one child descriptor of a materialized tree.
    async fn remove_child(&self, ino: InodeNumber, name: &PathComponent) -> Result<(), FsError>;

    /// Flushes pending overlay state; inodes holding overlay state may not
    /// be unloaded until this has completed.
    async fn flush(&self) -> Result<(), FsError>;
}
