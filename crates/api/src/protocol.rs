// Path: crates/api/src/protocol.rs

//! Decoded kernel-protocol requests and shaped replies.
//!
//! The transport decodes opcodes and arguments off the kernel device and
//! hands the dispatcher one [`FsRequest`] per request, together with the
//! caller's [`RequestContext`]. The dispatcher answers with an [`FsReply`]
//! or an error whose kernel error number is fixed by
//! [`KernelErrno`](canopy_types::error::KernelErrno). The transport is
//! required to call `Forget` with the exact kernel lookup count and to
//! re-deliver unacknowledged requests on reconnect.

use std::time::Duration;

use bytes::Bytes;

use canopy_types::inode::{AttrChanges, Attributes, InodeNumber};
use canopy_types::object::EntryKind;
use canopy_types::path::PathComponent;

/// The kernel-supplied identity of the process issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Requesting user id.
    pub uid: u32,
    /// Requesting group id.
    pub gid: u32,
    /// Requesting process id.
    pub pid: u32,
}

impl RequestContext {
    /// A root-identity context, used by tests and internal maintenance.
    pub const ROOT: RequestContext = RequestContext {
        uid: 0,
        gid: 0,
        pid: 0,
    };
}

/// One decoded kernel request.
#[derive(Debug, Clone)]
pub enum FsRequest {
    /// Resolve `name` under `parent`; a success increments the child's
    /// kernel lookup count by one.
    Lookup {
        /// Parent directory inode.
        parent: InodeNumber,
        /// Child name.
        name: PathComponent,
    },
    /// Drop `nlookup` kernel references from an inode. No reply is sent.
    Forget {
        /// The inode being forgotten.
        ino: InodeNumber,
        /// The kernel-reported count to subtract.
        nlookup: u64,
    },
    /// Read an inode's attributes.
    GetAttr {
        /// Target inode.
        ino: InodeNumber,
    },
    /// Apply a sparse set of attribute changes.
    SetAttr {
        /// Target inode.
        ino: InodeNumber,
        /// The changes to apply.
        changes: AttrChanges,
    },
    /// Read a symlink's target.
    ReadLink {
        /// Target inode.
        ino: InodeNumber,
    },
    /// Create a device-less regular file node.
    MkNod {
        /// Parent directory inode.
        parent: InodeNumber,
        /// New entry name.
        name: PathComponent,
        /// Permission bits for the new file.
        mode: u32,
    },
    /// Create a directory.
    MkDir {
        /// Parent directory inode.
        parent: InodeNumber,
        /// New entry name.
        name: PathComponent,
        /// Permission bits for the new directory.
        mode: u32,
    },
    /// Create a symlink to `target`.
    Symlink {
        /// Parent directory inode.
        parent: InodeNumber,
        /// New entry name.
        name: PathComponent,
        /// Link target bytes.
        target: Bytes,
    },
    /// Create a hard link to an existing inode.
    Link {
        /// The inode being linked.
        ino: InodeNumber,
        /// Directory receiving the new entry.
        new_parent: InodeNumber,
        /// New entry name.
        new_name: PathComponent,
    },
    /// Remove a non-directory entry.
    Unlink {
        /// Parent directory inode.
        parent: InodeNumber,
        /// Entry name.
        name: PathComponent,
    },
    /// Remove an empty directory.
    RmDir {
        /// Parent directory inode.
        parent: InodeNumber,
        /// Entry name.
        name: PathComponent,
    },
    /// Atomically move an entry, overwriting per POSIX rename rules.
    Rename {
        /// Source directory inode.
        parent: InodeNumber,
        /// Source entry name.
        name: PathComponent,
        /// Destination directory inode.
        new_parent: InodeNumber,
        /// Destination entry name.
        new_name: PathComponent,
    },
    /// Open a file and allocate a handle.
    Open {
        /// Target inode.
        ino: InodeNumber,
        /// Kernel open flags.
        flags: u32,
    },
    /// Read from an open file.
    Read {
        /// Target inode.
        ino: InodeNumber,
        /// Handle from [`FsRequest::Open`].
        fh: u64,
        /// Byte offset.
        offset: u64,
        /// Maximum bytes to return.
        size: u32,
    },
    /// Write to an open file, materializing it on first write.
    Write {
        /// Target inode.
        ino: InodeNumber,
        /// Handle from [`FsRequest::Open`].
        fh: u64,
        /// Byte offset.
        offset: u64,
        /// The bytes to write.
        data: Bytes,
    },
    /// Release an open file handle.
    Release {
        /// Target inode.
        ino: InodeNumber,
        /// The handle being released.
        fh: u64,
    },
    /// Atomically create and open a regular file.
    Create {
        /// Parent directory inode.
        parent: InodeNumber,
        /// New entry name.
        name: PathComponent,
        /// Permission bits for the new file.
        mode: u32,
        /// Kernel open flags.
        flags: u32,
    },
    /// Open a directory for listing.
    OpenDir {
        /// Target inode.
        ino: InodeNumber,
    },
    /// Page through an open directory's entries.
    ReadDir {
        /// Target inode.
        ino: InodeNumber,
        /// Handle from [`FsRequest::OpenDir`].
        fh: u64,
        /// Resume offset: the `offset` of the last entry already seen, or
        /// zero to start.
        offset: u64,
    },
    /// Release an open directory handle.
    ReleaseDir {
        /// Target inode.
        ino: InodeNumber,
        /// The handle being released.
        fh: u64,
    },
    /// Read one extended attribute.
    GetXAttr {
        /// Target inode.
        ino: InodeNumber,
        /// Attribute name.
        name: String,
    },
    /// List the defined extended attribute names.
    ListXAttr {
        /// Target inode.
        ino: InodeNumber,
    },
}

impl FsRequest {
    /// True for operations that may mutate the tree and therefore journal a
    /// delta on success.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            FsRequest::SetAttr { .. }
                | FsRequest::MkNod { .. }
                | FsRequest::MkDir { .. }
                | FsRequest::Symlink { .. }
                | FsRequest::Link { .. }
                | FsRequest::Unlink { .. }
                | FsRequest::RmDir { .. }
                | FsRequest::Rename { .. }
                | FsRequest::Write { .. }
                | FsRequest::Create { .. }
        )
    }
}

/// The entry payload returned by `Lookup`, `Create`, and the directory
/// mutation operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEntry {
    /// The resolved child's attributes (which carry its inode number).
    pub attr: Attributes,
    /// How long the kernel may cache the attributes.
    pub attr_timeout: Duration,
    /// How long the kernel may cache the name→inode binding.
    pub entry_timeout: Duration,
}

/// The attribute payload returned by `GetAttr` and `SetAttr`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyAttr {
    /// The inode's attributes.
    pub attr: Attributes,
    /// How long the kernel may cache them.
    pub attr_timeout: Duration,
}

/// The handle payload returned by `Open`, `OpenDir`, and `Create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyOpen {
    /// The allocated handle, passed back on `Read`/`Write`/`ReadDir`.
    pub fh: u64,
}

/// One directory entry in a `ReadDir` page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// The entry's inode number.
    pub ino: InodeNumber,
    /// Resume offset to pass back to continue after this entry.
    pub offset: u64,
    /// The entry kind.
    pub kind: EntryKind,
    /// The entry name.
    pub name: String,
}

/// One shaped kernel reply.
#[derive(Debug, Clone)]
pub enum FsReply {
    /// Reply to `Lookup`, `MkNod`, `MkDir`, `Symlink`, and `Link`.
    Entry(ReplyEntry),
    /// Reply to `GetAttr` and `SetAttr`.
    Attr(ReplyAttr),
    /// Reply to `ReadLink` (target bytes) and `Read` (data).
    Data(Bytes),
    /// Reply to `Write`: bytes accepted.
    Written(u32),
    /// Reply to `Open` and `OpenDir`.
    Open(ReplyOpen),
    /// Reply to `Create`: the new entry plus its open handle.
    Created {
        /// The created entry.
        entry: ReplyEntry,
        /// The open handle.
        open: ReplyOpen,
    },
    /// Reply to `ReadDir`: one page of entries, empty at end.
    Directory(Vec<DirEntry>),
    /// Reply to `GetXAttr`.
    XAttr(Bytes),
    /// Reply to `ListXAttr`: defined attribute names.
    XAttrNames(Vec<String>),
    /// Reply to operations with no payload (`Forget`, `Release`,
    /// `ReleaseDir`, `Unlink`, `RmDir`, `Rename`).
    Unit,
}
