// Path: crates/types/src/inode.rs

//! Inode numbers, child descriptors, and kernel-visible attribute records.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::object::EntryKind;
use crate::path::PathComponent;

/// A kernel-visible inode number: a non-zero 64-bit integer.
///
/// `1` is the mount root. Numbers are assigned monotonically and never
/// reused within a mount's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InodeNumber(u64);

impl InodeNumber {
    /// The mount root.
    pub const ROOT: InodeNumber = InodeNumber(1);

    /// Wraps a raw kernel inode number. Zero is not a valid number; callers
    /// decoding kernel requests validate before constructing.
    pub const fn new(raw: u64) -> Self {
        InodeNumber(raw)
    }

    /// The raw 64-bit value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// True for the mount root.
    pub const fn is_root(self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl std::fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The coarse type tag of an inode: a directory tree or a file-like leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeType {
    /// A directory backed by a source tree and/or overlay child map.
    Tree,
    /// A regular file, executable, or symlink.
    File,
}

impl InodeType {
    /// The inode type implied by a tree-entry kind.
    pub fn from_entry_kind(kind: EntryKind) -> Self {
        if kind.is_tree() {
            InodeType::Tree
        } else {
            InodeType::File
        }
    }
}

/// One child of a tree inode as the parent tracks it.
///
/// `source_hash` is present while the child's state is fully derivable from
/// the source tree; it is cleared when the child diverges. `inode` is
/// assigned lazily on first lookup and cleared again when the child inode is
/// unloaded, reverting the descriptor to its source form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    /// The child's name in the parent.
    pub name: PathComponent,
    /// Mode bits, canonical for the entry kind unless imported verbatim.
    pub mode: u32,
    /// The entry kind.
    pub kind: EntryKind,
    /// The live inode number, if the child has been looked up.
    pub inode: Option<InodeNumber>,
    /// The source object hash, if the child is still clean.
    pub source_hash: Option<Hash>,
}

impl ChildEntry {
    /// Builds a clean descriptor pointing at a source object.
    pub fn from_source(name: PathComponent, kind: EntryKind, mode: u32, hash: Hash) -> Self {
        ChildEntry {
            name,
            mode,
            kind,
            inode: None,
            source_hash: Some(hash),
        }
    }

    /// Builds a descriptor for a newly created (overlay-only) child.
    pub fn materialized(name: PathComponent, kind: EntryKind, mode: u32) -> Self {
        ChildEntry {
            name,
            mode,
            kind,
            inode: None,
            source_hash: None,
        }
    }
}

/// The kernel-visible attributes of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    /// The inode number.
    pub ino: InodeNumber,
    /// Size in bytes; zero for trees.
    pub size: u64,
    /// Full mode bits including the file-type bits.
    pub mode: u32,
    /// Link count: `2 + subdirectories` for trees, `1` for files.
    pub nlink: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status-change time.
    pub ctime: SystemTime,
}

/// A sparse set of attribute changes, as delivered by a kernel `setattr`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrChanges {
    /// New permission bits, if changing.
    pub mode: Option<u32>,
    /// New owning user id, if changing.
    pub uid: Option<u32>,
    /// New owning group id, if changing.
    pub gid: Option<u32>,
    /// New size, if truncating or extending. Invalid on trees.
    pub size: Option<u64>,
    /// New access time, if changing.
    pub atime: Option<SystemTime>,
    /// New modification time, if changing.
    pub mtime: Option<SystemTime>,
}

impl AttrChanges {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
            && self.size.is_none()
            && self.atime.is_none()
            && self.mtime.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_one() {
        assert_eq!(InodeNumber::ROOT.get(), 1);
        assert!(InodeNumber::ROOT.is_root());
        assert!(!InodeNumber::new(2).is_root());
    }

    #[test]
    fn child_entry_source_form() {
        let entry = ChildEntry::from_source(
            PathComponent::new("a").unwrap(),
            EntryKind::Regular,
            EntryKind::Regular.mode(),
            Hash::digest(b"a"),
        );
        assert!(entry.source_hash.is_some());
        assert!(entry.inode.is_none());

        let created = ChildEntry::materialized(
            PathComponent::new("b").unwrap(),
            EntryKind::Tree,
            EntryKind::Tree.mode(),
        );
        assert!(created.source_hash.is_none());
    }

    #[test]
    fn empty_changes() {
        assert!(AttrChanges::default().is_empty());
        let changes = AttrChanges {
            size: Some(0),
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }
}
