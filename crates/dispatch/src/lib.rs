// Path: crates/dispatch/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! The kernel-protocol dispatcher.
//!
//! A stateless adapter between decoded kernel requests and the inode
//! engine: each request resolves inodes through the mount, invokes the
//! matching operation, and shapes a protocol reply with attribute and
//! entry validity. The dispatcher is safe for concurrent invocation from
//! any number of protocol worker threads and never blocks one; every
//! operation is async end to end.
//!
//! Successful mutations append one journal delta; failed operations append
//! nothing.

pub mod handles;

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use canopy_api::protocol::{
    DirEntry, FsReply, FsRequest, ReplyAttr, ReplyEntry, ReplyOpen, RequestContext,
};
use canopy_inodes::{Inode, Mount};
use canopy_journal::DeltaKind;
use canopy_types::error::FsError;
use canopy_types::inode::InodeNumber;
use canopy_types::object::EntryKind;
use canopy_types::path::{PathComponent, RepoPath};

use crate::handles::HandleTable;

/// How long the kernel may cache attributes and entries of clean inodes.
/// Clean state cannot change without going through this service, so a
/// bounded positive validity is safe; materialized inodes report zero.
pub const CLEAN_VALIDITY: Duration = Duration::from_secs(3600);

/// The dispatcher for one mount.
pub struct Dispatcher {
    mount: Arc<Mount>,
    handles: HandleTable,
}

impl Dispatcher {
    /// Builds a dispatcher over a mount.
    pub fn new(mount: Arc<Mount>) -> Self {
        Dispatcher {
            mount,
            handles: HandleTable::new(),
        }
    }

    /// The mount this dispatcher serves.
    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    /// Handles one decoded kernel request. The error, if any, maps to a
    /// kernel error number through
    /// [`KernelErrno`](canopy_types::error::KernelErrno).
    #[instrument(skip(self, ctx, request), fields(op = request_name(&request)))]
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        request: FsRequest,
    ) -> Result<FsReply, FsError> {
        match request {
            FsRequest::Lookup { parent, name } => self.lookup(parent, &name).await,
            FsRequest::Forget { ino, nlookup } => {
                self.mount.map().dec_fs_refcount(ino, nlookup);
                Ok(FsReply::Unit)
            }
            FsRequest::GetAttr { ino } => {
                let inode = self.mount.inode(ino)?;
                let attr = self.mount.attributes_of(&inode).await?;
                Ok(FsReply::Attr(ReplyAttr {
                    attr,
                    attr_timeout: self.validity(&inode).await,
                }))
            }
            FsRequest::SetAttr { ino, changes } => {
                let attr = self.mount.setattr(ino, &changes).await?;
                self.journal_changed(ino);
                let inode = self.mount.inode(ino)?;
                Ok(FsReply::Attr(ReplyAttr {
                    attr,
                    attr_timeout: self.validity(&inode).await,
                }))
            }
            FsRequest::ReadLink { ino } => Ok(FsReply::Data(self.mount.readlink(ino).await?)),
            FsRequest::MkNod { parent, name, mode } => {
                self.make_child(parent, name, file_kind_for(mode), mode, ctx, None)
                    .await
            }
            FsRequest::MkDir { parent, name, mode } => {
                self.make_child(parent, name, EntryKind::Tree, mode, ctx, None)
                    .await
            }
            FsRequest::Symlink {
                parent,
                name,
                target,
            } => {
                self.make_child(parent, name, EntryKind::Symlink, 0o777, ctx, Some(target))
                    .await
            }
            FsRequest::Link {
                ino,
                new_parent,
                new_name,
            } => {
                let inode = self.mount.link(ino, new_parent, &new_name).await?;
                self.journal_created(new_parent, &new_name);
                let entry = self.entry_reply(&inode).await?;
                self.mount.map().inc_fs_refcount(inode.number(), 1);
                Ok(FsReply::Entry(entry))
            }
            FsRequest::Unlink { parent, name } => self.remove(parent, name, false).await,
            FsRequest::RmDir { parent, name } => self.remove(parent, name, true).await,
            FsRequest::Rename {
                parent,
                name,
                new_parent,
                new_name,
            } => {
                let from = self.path_of_child(parent, &name);
                let changed = self
                    .mount
                    .rename(parent, &name, new_parent, &new_name)
                    .await?;
                if changed {
                    let to = self.path_of_child(new_parent, &new_name);
                    if let (Some(from), Some(to)) = (from, to) {
                        self.mount.journal().record(DeltaKind::Renamed { from, to });
                    }
                }
                Ok(FsReply::Unit)
            }
            FsRequest::Open { ino, flags } => {
                let inode = self.mount.inode(ino)?;
                if inode.is_tree() {
                    return Err(FsError::IsADirectory(ino));
                }
                let _ = flags;
                Ok(FsReply::Open(ReplyOpen {
                    fh: self.handles.open_file(ino),
                }))
            }
            FsRequest::Read {
                ino,
                fh,
                offset,
                size,
            } => {
                self.handles.verify_file(fh, ino)?;
                let data = self.mount.read(ino, offset, size as usize).await?;
                Ok(FsReply::Data(data))
            }
            FsRequest::Write {
                ino,
                fh,
                offset,
                data,
            } => {
                self.handles.verify_file(fh, ino)?;
                let written = self.mount.write(ino, offset, &data).await?;
                self.journal_changed(ino);
                Ok(FsReply::Written(written))
            }
            FsRequest::Release { ino, fh } => {
                let _ = ino;
                self.handles.release_file(fh);
                Ok(FsReply::Unit)
            }
            FsRequest::Create {
                parent,
                name,
                mode,
                flags,
            } => {
                let _ = flags;
                let inode = self
                    .mount
                    .create_child(parent, &name, file_kind_for(mode), mode, ctx, None)
                    .await?;
                self.journal_created(parent, &name);
                let entry = self.entry_reply(&inode).await?;
                self.mount.map().inc_fs_refcount(inode.number(), 1);
                let open = ReplyOpen {
                    fh: self.handles.open_file(inode.number()),
                };
                Ok(FsReply::Created { entry, open })
            }
            FsRequest::OpenDir { ino } => {
                let entries = self.snapshot_dir(ino).await?;
                Ok(FsReply::Open(ReplyOpen {
                    fh: self.handles.open_dir(ino, entries),
                }))
            }
            FsRequest::ReadDir { ino, fh, offset } => {
                let page = self.handles.read_dir(fh, ino, offset)?;
                Ok(FsReply::Directory(page))
            }
            FsRequest::ReleaseDir { ino, fh } => {
                let _ = ino;
                self.handles.release_dir(fh);
                Ok(FsReply::Unit)
            }
            FsRequest::GetXAttr { ino, name } => {
                Ok(FsReply::XAttr(self.mount.getxattr(ino, &name).await?))
            }
            FsRequest::ListXAttr { ino } => {
                Ok(FsReply::XAttrNames(self.mount.listxattr(ino)?))
            }
        }
    }

    async fn lookup(
        &self,
        parent: InodeNumber,
        name: &PathComponent,
    ) -> Result<FsReply, FsError> {
        let inode = self.mount.lookup_child(parent, name).await?;
        let entry = self.entry_reply(&inode).await?;
        // The kernel now holds one more reference to this entry.
        self.mount.map().inc_fs_refcount(inode.number(), 1);
        Ok(FsReply::Entry(entry))
    }

    async fn make_child(
        &self,
        parent: InodeNumber,
        name: PathComponent,
        kind: EntryKind,
        mode: u32,
        ctx: &RequestContext,
        symlink_target: Option<bytes::Bytes>,
    ) -> Result<FsReply, FsError> {
        let inode = self
            .mount
            .create_child(
                parent,
                &name,
                kind,
                mode,
                ctx,
                symlink_target.as_deref(),
            )
            .await?;
        self.journal_created(parent, &name);
        let entry = self.entry_reply(&inode).await?;
        self.mount.map().inc_fs_refcount(inode.number(), 1);
        Ok(FsReply::Entry(entry))
    }

    async fn remove(
        &self,
        parent: InodeNumber,
        name: PathComponent,
        expect_dir: bool,
    ) -> Result<FsReply, FsError> {
        let removed = self.mount.remove_child(parent, &name, expect_dir).await?;
        if let Some(path) = self.path_of_child(parent, &removed) {
            self.mount.journal().record(DeltaKind::Removed(path));
        }
        Ok(FsReply::Unit)
    }

    async fn entry_reply(&self, inode: &Arc<Inode>) -> Result<ReplyEntry, FsError> {
        let attr = self.mount.attributes_of(inode).await?;
        let validity = self.validity(inode).await;
        Ok(ReplyEntry {
            attr,
            attr_timeout: validity,
            entry_timeout: validity,
        })
    }

    async fn validity(&self, inode: &Arc<Inode>) -> Duration {
        if self.mount.is_materialized(inode).await {
            Duration::ZERO
        } else {
            CLEAN_VALIDITY
        }
    }

    /// Synthesizes `.` and `..`, then the effective children in sorted
    /// order.
    async fn snapshot_dir(&self, ino: InodeNumber) -> Result<Vec<DirEntry>, FsError> {
        let inode = self.mount.inode(ino)?;
        if !inode.is_tree() {
            return Err(FsError::NotADirectory(ino));
        }
        let parent = inode.base().parent.unwrap_or(ino);

        let mut entries = vec![
            DirEntry {
                ino,
                offset: 1,
                kind: EntryKind::Tree,
                name: ".".to_string(),
            },
            DirEntry {
                ino: parent,
                offset: 2,
                kind: EntryKind::Tree,
                name: "..".to_string(),
            },
        ];
        for child in self.mount.list_dir(ino).await? {
            let offset = entries.len() as u64 + 1;
            entries.push(DirEntry {
                ino: child.ino,
                offset,
                kind: child.kind,
                name: child.name.to_string(),
            });
        }
        Ok(entries)
    }

    fn journal_changed(&self, ino: InodeNumber) {
        if let Ok(path) = self.mount.resolve_path(ino) {
            self.mount.journal().record(DeltaKind::Changed(path));
        }
    }

    fn journal_created(&self, parent: InodeNumber, name: &PathComponent) {
        if let Some(path) = self.path_of_child(parent, name) {
            self.mount.journal().record(DeltaKind::Created(path));
        }
    }

    fn path_of_child(&self, parent: InodeNumber, name: &PathComponent) -> Option<RepoPath> {
        self.mount
            .resolve_path(parent)
            .ok()
            .map(|path| path.join(name.clone()))
    }
}

fn file_kind_for(mode: u32) -> EntryKind {
    if mode & 0o111 != 0 {
        EntryKind::Executable
    } else {
        EntryKind::Regular
    }
}

fn request_name(request: &FsRequest) -> &'static str {
    match request {
        FsRequest::Lookup { .. } => "lookup",
        FsRequest::Forget { .. } => "forget",
        FsRequest::GetAttr { .. } => "getattr",
        FsRequest::SetAttr { .. } => "setattr",
        FsRequest::ReadLink { .. } => "readlink",
        FsRequest::MkNod { .. } => "mknod",
        FsRequest::MkDir { .. } => "mkdir",
        FsRequest::Symlink { .. } => "symlink",
        FsRequest::Link { .. } => "link",
        FsRequest::Unlink { .. } => "unlink",
        FsRequest::RmDir { .. } => "rmdir",
        FsRequest::Rename { .. } => "rename",
        FsRequest::Open { .. } => "open",
        FsRequest::Read { .. } => "read",
        FsRequest::Write { .. } => "write",
        FsRequest::Release { .. } => "release",
        FsRequest::Create { .. } => "create",
        FsRequest::OpenDir { .. } => "opendir",
        FsRequest::ReadDir { .. } => "readdir",
        FsRequest::ReleaseDir { .. } => "releasedir",
        FsRequest::GetXAttr { .. } => "getxattr",
        FsRequest::ListXAttr { .. } => "listxattr",
    }
}
