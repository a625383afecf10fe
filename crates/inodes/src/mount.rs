// Path: crates/inodes/src/mount.rs

//! One mount: the inode map wired to its object store, overlay, and
//! journal, plus every inode operation the dispatcher invokes.
//!
//! There is no process-wide state here. Each mount owns its own map and
//! service handles; the daemon front-end holds the mount set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::debug;

use canopy_api::object_store::ObjectStore;
use canopy_api::overlay::Overlay;
use canopy_api::protocol::RequestContext;
use canopy_journal::Journal;
use canopy_types::error::FsError;
use canopy_types::hash::Hash;
use canopy_types::inode::{AttrChanges, Attributes, ChildEntry, InodeNumber};
use canopy_types::object::{BlobMetadata, EntryKind};
use canopy_types::path::{PathComponent, RepoPath};

use crate::file::FileState;
use crate::inode::{Inode, InodeBase};
use crate::map::InodeMap;
use crate::tree::{find_child, TreeState};

/// The extended attribute exposing a file's content sha-1.
pub const XATTR_SHA1: &str = "user.sha1";

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Per-mount settings fixed at mount time.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// The root tree's hash in the object store.
    pub root_hash: Hash,
    /// Whether name lookups are byte-exact or ASCII case-folded.
    pub case_sensitive: bool,
    /// Owner reported for inodes loaded from source objects.
    pub uid: u32,
    /// Group reported for inodes loaded from source objects.
    pub gid: u32,
    /// Journal ring capacity.
    pub journal_capacity: usize,
}

impl MountConfig {
    /// A mount of `root_hash` with host-conventional defaults.
    pub fn new(root_hash: Hash) -> Self {
        MountConfig {
            root_hash,
            case_sensitive: true,
            uid: 0,
            gid: 0,
            journal_capacity: Journal::DEFAULT_CAPACITY,
        }
    }
}

/// One entry of a directory listing, in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    /// The child's live inode number.
    pub ino: InodeNumber,
    /// The entry kind.
    pub kind: EntryKind,
    /// The entry name.
    pub name: PathComponent,
}

/// A live mount.
pub struct Mount {
    config: MountConfig,
    object_store: Arc<dyn ObjectStore>,
    overlay: Arc<dyn Overlay>,
    journal: Arc<Journal>,
    map: InodeMap,
}

impl Mount {
    /// Creates a mount rooted at `config.root_hash`. The root inode is
    /// always materialized; its child map is loaded from the source tree up
    /// front and mirrored to the overlay.
    pub async fn new(
        config: MountConfig,
        object_store: Arc<dyn ObjectStore>,
        overlay: Arc<dyn Overlay>,
    ) -> Result<Arc<Mount>, FsError> {
        let tree = object_store
            .get_tree(config.root_hash)
            .await
            .map_err(FsError::from)?
            .ok_or_else(|| FsError::NotFound(format!("root tree {}", config.root_hash)))?;
        let children = TreeState::child_map_from(&tree);

        let root = Arc::new(Inode::new_tree(
            InodeNumber::ROOT,
            InodeBase::new(None, None, 0o040755, config.uid, config.gid),
            TreeState::materialized(children.clone()),
        ));
        let map = InodeMap::new();
        map.insert_root(root);

        let journal = Arc::new(Journal::new(config.journal_capacity));
        let mount = Arc::new(Mount {
            config,
            object_store,
            overlay,
            journal,
            map,
        });

        mount.overlay.allocate(InodeNumber::ROOT).await?;
        for entry in children.values() {
            mount
                .overlay
                .set_child(InodeNumber::ROOT, entry.clone())
                .await?;
        }
        debug!(root = %mount.config.root_hash, "mount initialized");
        Ok(mount)
    }

    /// Rebuilds a mount from a takeover snapshot of its inode map.
    pub fn restore_from_takeover(
        config: MountConfig,
        object_store: Arc<dyn ObjectStore>,
        overlay: Arc<dyn Overlay>,
        snapshot: &[u8],
    ) -> Result<Arc<Mount>, FsError> {
        let map = InodeMap::restore_from_takeover(snapshot)?;
        if map.get(InodeNumber::ROOT).is_none() {
            return Err(FsError::Internal("takeover snapshot has no root".into()));
        }
        let journal = Arc::new(Journal::new(config.journal_capacity));
        Ok(Arc::new(Mount {
            config,
            object_store,
            overlay,
            journal,
            map,
        }))
    }

    /// The mount's inode map.
    pub fn map(&self) -> &InodeMap {
        &self.map
    }

    /// The mount's journal.
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// The root tree hash the mount was created from.
    pub fn root_hash(&self) -> Hash {
        self.config.root_hash
    }

    /// Whether name lookups are byte-exact.
    pub fn case_sensitive(&self) -> bool {
        self.config.case_sensitive
    }

    /// Serializes the inode map for handoff to a successor daemon.
    pub fn snapshot_for_takeover(&self) -> Result<Vec<u8>, FsError> {
        self.map.snapshot_for_takeover()
    }

    /// Resolves a live inode; unknown and reaped numbers are stale.
    pub fn inode(&self, number: InodeNumber) -> Result<Arc<Inode>, FsError> {
        self.map.get(number).ok_or(FsError::StaleInode(number))
    }

    /// Resolves `name` under `parent`, loading (and numbering) the child if
    /// this is its first lookup. Concurrent lookups of the same child
    /// serialize on the parent and observe the same inode number.
    pub async fn lookup_child(
        &self,
        parent_number: InodeNumber,
        name: &PathComponent,
    ) -> Result<Arc<Inode>, FsError> {
        let parent = self.inode(parent_number)?;
        let lock = parent.tree_state()?;
        self.ensure_tree_children(&parent).await?;

        {
            let state = lock.read().await;
            let children = state
                .children()
                .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
            let Some(entry) = find_child(children, name, self.config.case_sensitive) else {
                return Err(FsError::NotFound(format!("{name}")));
            };
            if let Some(number) = entry.inode {
                if let Some(inode) = self.map.get(number) {
                    return Ok(inode);
                }
            }
        }

        // First lookup of this child: assign under the parent's write lock
        // so exactly one number is ever handed out per (parent, name).
        let mut state = lock.write().await;
        let case_sensitive = self.config.case_sensitive;
        let children = state
            .children_mut()
            .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
        let key = match find_child(children, name, case_sensitive) {
            Some(entry) => entry.name.clone(),
            None => return Err(FsError::NotFound(format!("{name}"))),
        };
        let entry = children
            .get_mut(&key)
            .ok_or_else(|| FsError::Internal("child vanished under lock".into()))?;
        self.register_child_locked(parent_number, entry)
    }

    /// Reads an inode's attributes. Never mutates.
    pub async fn getattr(&self, number: InodeNumber) -> Result<Attributes, FsError> {
        let inode = self.inode(number)?;
        self.attributes_of(&inode).await
    }

    /// Assembles the kernel-visible attributes of a live inode.
    pub async fn attributes_of(&self, inode: &Arc<Inode>) -> Result<Attributes, FsError> {
        if inode.is_tree() {
            self.ensure_tree_children(inode).await?;
            let lock = inode.tree_state()?;
            let state = lock.read().await;
            let subdirs = state
                .children()
                .map(|children| children.values().filter(|e| e.kind.is_tree()).count())
                .unwrap_or(0);
            Ok(inode.attributes_with(0, 2 + subdirs as u32))
        } else {
            let size = self.file_metadata(inode).await?.size;
            let links = inode.base().links;
            Ok(inode.attributes_with(size, links))
        }
    }

    /// Applies a sparse set of attribute changes and returns the result.
    /// A size change on a tree is invalid; on a file it forces
    /// materialization.
    pub async fn setattr(
        &self,
        number: InodeNumber,
        changes: &AttrChanges,
    ) -> Result<Attributes, FsError> {
        let inode = self.inode(number)?;
        if changes.size.is_some() && inode.is_tree() {
            return Err(FsError::InvalidArgument(
                "size change on a directory".into(),
            ));
        }

        if let Some(new_size) = changes.size {
            self.materialize_file(&inode).await?;
            let lock = inode.file_state()?;
            let mut state = lock.write().await;
            self.overlay.truncate(number, new_size).await?;
            if let FileState::Materialized { size } = &mut *state {
                *size = new_size;
            }
        }

        {
            let mut base = inode.base();
            if let Some(mode) = changes.mode {
                base.mode = (base.mode & S_IFMT) | (mode & !S_IFMT);
            }
            if let Some(uid) = changes.uid {
                base.uid = uid;
            }
            if let Some(gid) = changes.gid {
                base.gid = gid;
            }
            if let Some(atime) = changes.atime {
                base.atime = atime;
            }
            if let Some(mtime) = changes.mtime {
                base.mtime = mtime;
            }
            base.ctime = SystemTime::now();
        }
        self.attributes_of(&inode).await
    }

    /// Reads up to `len` bytes at `offset` from a file.
    pub async fn read(
        &self,
        number: InodeNumber,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, FsError> {
        let inode = self.inode(number)?;
        let lock = inode.file_state()?;
        let state = lock.read().await;
        let data = match &*state {
            FileState::Materialized { .. } => self.overlay.read(number, offset, len).await?,
            FileState::Clean { source, .. } => {
                let contents = self.fetch_blob_contents(*source).await?;
                let start = (offset as usize).min(contents.len());
                let end = start.saturating_add(len).min(contents.len());
                contents.slice(start..end)
            }
        };
        drop(state);
        inode.touch_accessed();
        Ok(data)
    }

    /// Writes `data` at `offset`, materializing the file (and its ancestor
    /// chain) on first write. Returns the number of bytes accepted.
    pub async fn write(
        &self,
        number: InodeNumber,
        offset: u64,
        data: &[u8],
    ) -> Result<u32, FsError> {
        let inode = self.inode(number)?;
        inode.file_state()?;
        self.materialize_file(&inode).await?;

        let lock = inode.file_state()?;
        let mut state = lock.write().await;
        let new_size = self.overlay.write(number, offset, data).await?;
        if let FileState::Materialized { size } = &mut *state {
            *size = new_size;
        }
        drop(state);
        inode.touch_modified();
        Ok(data.len() as u32)
    }

    /// Reads a symlink's target bytes.
    pub async fn readlink(&self, number: InodeNumber) -> Result<Bytes, FsError> {
        let inode = self.inode(number)?;
        if inode.base().mode & S_IFMT != S_IFLNK {
            return Err(FsError::InvalidArgument(format!(
                "inode {number} is not a symlink"
            )));
        }
        let lock = inode.file_state()?;
        let state = lock.read().await;
        match &*state {
            FileState::Materialized { size } => {
                self.overlay.read(number, 0, *size as usize).await
            }
            FileState::Clean { source, .. } => self.fetch_blob_contents(*source).await,
        }
    }

    /// Creates a child (file, directory, or symlink) under `parent`,
    /// materializing the parent chain. Fails with `Exists` when the name is
    /// already present in the parent's effective children.
    pub async fn create_child(
        &self,
        parent_number: InodeNumber,
        name: &PathComponent,
        kind: EntryKind,
        perms: u32,
        ctx: &RequestContext,
        symlink_target: Option<&[u8]>,
    ) -> Result<Arc<Inode>, FsError> {
        let parent = self.inode(parent_number)?;
        parent.tree_state()?;
        self.ensure_tree_children(&parent).await?;
        self.materialize_tree_chain(&parent).await?;

        let mode = match kind {
            EntryKind::Tree => 0o040000 | (perms & !S_IFMT),
            EntryKind::Symlink => S_IFLNK | 0o777,
            EntryKind::Regular | EntryKind::Executable => 0o100000 | (perms & !S_IFMT),
        };
        let initial_size = symlink_target.map(|t| t.len() as u64).unwrap_or(0);

        let lock = parent.tree_state()?;
        let (child, entry) = {
            let mut state = lock.write().await;
            let children = state
                .children_mut()
                .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
            if find_child(children, name, self.config.case_sensitive).is_some() {
                return Err(FsError::Exists(format!("{name}")));
            }

            let base = InodeBase::new(
                Some(parent_number),
                Some(name.clone()),
                mode,
                ctx.uid,
                ctx.gid,
            );
            let child = if kind.is_tree() {
                self.map.register(|n| {
                    Inode::new_tree(n, base, TreeState::materialized(BTreeMap::new()))
                })
            } else {
                self.map
                    .register(|n| Inode::new_file(n, base, FileState::materialized(initial_size)))
            };

            let mut entry = ChildEntry::materialized(name.clone(), kind, mode);
            entry.inode = Some(child.number());
            children.insert(name.clone(), entry.clone());
            (child, entry)
        };

        self.overlay.allocate(child.number()).await?;
        if let Some(target) = symlink_target {
            self.overlay.write(child.number(), 0, target).await?;
        }
        self.overlay.set_child(parent_number, entry).await?;
        parent.touch_modified();
        Ok(child)
    }

    /// Adds a second descriptor for an existing file inode.
    pub async fn link(
        &self,
        number: InodeNumber,
        new_parent_number: InodeNumber,
        new_name: &PathComponent,
    ) -> Result<Arc<Inode>, FsError> {
        let target = self.inode(number)?;
        if target.is_tree() {
            return Err(FsError::PermissionDenied(
                "hard links to directories are not allowed".into(),
            ));
        }
        let new_parent = self.inode(new_parent_number)?;
        new_parent.tree_state()?;
        self.ensure_tree_children(&new_parent).await?;
        self.materialize_tree_chain(&new_parent).await?;

        // Capture the target's source form before taking the parent lock.
        let source_hash = {
            let state = target.file_state()?.read().await;
            state.source()
        };
        let (mode, kind) = {
            let base = target.base();
            (base.mode, entry_kind_for_mode(base.mode))
        };

        let lock = new_parent.tree_state()?;
        let entry = {
            let mut state = lock.write().await;
            let children = state
                .children_mut()
                .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
            if find_child(children, new_name, self.config.case_sensitive).is_some() {
                return Err(FsError::Exists(format!("{new_name}")));
            }
            let entry = ChildEntry {
                name: new_name.clone(),
                mode,
                kind,
                inode: Some(number),
                source_hash,
            };
            children.insert(new_name.clone(), entry.clone());
            entry
        };

        {
            let mut base = target.base();
            base.links += 1;
            base.ctime = SystemTime::now();
        }
        self.overlay.set_child(new_parent_number, entry).await?;
        new_parent.touch_modified();
        Ok(target)
    }

    /// Removes the named child. `expect_dir` selects rmdir semantics:
    /// the child must be an empty directory; otherwise unlink semantics,
    /// where the child must not be a directory. Returns the exact stored
    /// name removed.
    pub async fn remove_child(
        &self,
        parent_number: InodeNumber,
        name: &PathComponent,
        expect_dir: bool,
    ) -> Result<PathComponent, FsError> {
        let parent = self.inode(parent_number)?;
        parent.tree_state()?;
        self.ensure_tree_children(&parent).await?;

        let child = self.lookup_child(parent_number, name).await?;
        if expect_dir {
            if !child.is_tree() {
                return Err(FsError::NotADirectory(child.number()));
            }
            self.ensure_tree_children(&child).await?;
        } else if child.is_tree() {
            return Err(FsError::IsADirectory(child.number()));
        }

        self.materialize_tree_chain(&parent).await?;

        let removed_name = if expect_dir {
            // Parent and child tree locks, in inode-number order.
            let parent_lock = parent.tree_state()?;
            let child_lock = child.tree_state()?;
            let (mut parent_state, child_state);
            if parent.number() <= child.number() {
                parent_state = parent_lock.write().await;
                child_state = child_lock.write().await;
            } else {
                child_state = child_lock.write().await;
                parent_state = parent_lock.write().await;
            }
            let empty = child_state
                .children()
                .map(|children| children.is_empty())
                .unwrap_or(false);
            if !empty {
                return Err(FsError::NotEmpty(format!("{name}")));
            }
            Self::take_child_entry(
                &mut parent_state,
                name,
                self.config.case_sensitive,
                child.number(),
            )?
        } else {
            let mut parent_state = parent.tree_state()?.write().await;
            Self::take_child_entry(
                &mut parent_state,
                name,
                self.config.case_sensitive,
                child.number(),
            )?
        };

        {
            let mut base = child.base();
            base.links = base.links.saturating_sub(1);
            if base.links == 0 || child.is_tree() {
                base.parent = None;
                base.name = None;
            }
            base.ctime = SystemTime::now();
        }
        self.overlay
            .remove_child(parent_number, &removed_name)
            .await?;
        parent.touch_modified();
        Ok(removed_name)
    }

    /// Moves an entry, atomic within the mount. Both parents materialize;
    /// the source descriptor moves keeping its inode number; an existing
    /// target is overwritten under POSIX rules. Returns `false` for the
    /// degenerate same-place rename, which changes nothing.
    pub async fn rename(
        &self,
        parent_number: InodeNumber,
        name: &PathComponent,
        new_parent_number: InodeNumber,
        new_name: &PathComponent,
    ) -> Result<bool, FsError> {
        let parent = self.inode(parent_number)?;
        let new_parent = self.inode(new_parent_number)?;
        parent.tree_state()?;
        new_parent.tree_state()?;
        self.ensure_tree_children(&parent).await?;
        self.ensure_tree_children(&new_parent).await?;

        if parent_number == new_parent_number && name == new_name {
            // A same-place rename is a no-op, but a missing source is still
            // an error that leaves state unchanged.
            let state = parent.tree_state()?.read().await;
            let children = state
                .children()
                .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
            if find_child(children, name, self.config.case_sensitive).is_none() {
                return Err(FsError::NotFound(format!("{name}")));
            }
            return Ok(false);
        }

        let moving = self.lookup_child(parent_number, name).await?;
        let target = match self.lookup_child(new_parent_number, new_name).await {
            Ok(existing) => Some(existing),
            Err(FsError::NotFound(_)) => None,
            Err(other) => return Err(other),
        };
        if let Some(existing) = &target {
            // Source and destination resolving to the same entry (case-folded
            // mounts) is a successful no-op.
            if existing.number() == moving.number() {
                return Ok(false);
            }
            if moving.is_tree() && !existing.is_tree() {
                return Err(FsError::NotADirectory(existing.number()));
            }
            if !moving.is_tree() && existing.is_tree() {
                return Err(FsError::IsADirectory(existing.number()));
            }
            if existing.is_tree() {
                self.ensure_tree_children(existing).await?;
                let state = existing.tree_state()?.read().await;
                let empty = state
                    .children()
                    .map(|children| children.is_empty())
                    .unwrap_or(false);
                if !empty {
                    return Err(FsError::NotEmpty(format!("{new_name}")));
                }
            }
        }

        self.materialize_tree_chain(&parent).await?;
        if parent_number != new_parent_number {
            self.materialize_tree_chain(&new_parent).await?;
        }

        let (removed_name, moved_entry) = {
            // Tree-mutation locks in inode-number order; a same-parent
            // rename needs only one.
            let parent_lock = parent.tree_state()?;
            if parent_number == new_parent_number {
                let mut state = parent_lock.write().await;
                let removed = Self::take_child_entry(
                    &mut state,
                    name,
                    self.config.case_sensitive,
                    moving.number(),
                )?;
                let entry = Self::insert_moved(&mut state, new_name, &moving)?;
                (removed, entry)
            } else {
                let new_parent_lock = new_parent.tree_state()?;
                let (mut src_state, mut dst_state);
                if parent.number() <= new_parent.number() {
                    src_state = parent_lock.write().await;
                    dst_state = new_parent_lock.write().await;
                } else {
                    dst_state = new_parent_lock.write().await;
                    src_state = parent_lock.write().await;
                }
                let removed = Self::take_child_entry(
                    &mut src_state,
                    name,
                    self.config.case_sensitive,
                    moving.number(),
                )?;
                let entry = Self::insert_moved(&mut dst_state, new_name, &moving)?;
                (removed, entry)
            }
        };

        {
            let mut base = moving.base();
            base.parent = Some(new_parent_number);
            base.name = Some(new_name.clone());
            base.ctime = SystemTime::now();
        }
        if let Some(existing) = target {
            let mut base = existing.base();
            base.parent = None;
            base.name = None;
        }

        self.overlay.remove_child(parent_number, &removed_name).await?;
        self.overlay.set_child(new_parent_number, moved_entry).await?;
        parent.touch_modified();
        new_parent.touch_modified();
        Ok(true)
    }

    /// The effective children of a directory in sorted name order, loading
    /// inode numbers for entries seen for the first time.
    pub async fn list_dir(&self, number: InodeNumber) -> Result<Vec<DirListing>, FsError> {
        let parent = self.inode(number)?;
        let lock = parent.tree_state()?;
        self.ensure_tree_children(&parent).await?;

        let mut state = lock.write().await;
        let children = state
            .children_mut()
            .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
        let mut listing = Vec::with_capacity(children.len());
        for entry in children.values_mut() {
            let inode = self.register_child_locked(number, entry)?;
            listing.push(DirListing {
                ino: inode.number(),
                kind: entry.kind,
                name: entry.name.clone(),
            });
        }
        Ok(listing)
    }

    /// One defined extended attribute: the content sha-1 of a file.
    pub async fn getxattr(&self, number: InodeNumber, name: &str) -> Result<Bytes, FsError> {
        let inode = self.inode(number)?;
        if name != XATTR_SHA1 || inode.is_tree() {
            return Err(FsError::NoAttribute(name.to_string()));
        }
        let metadata = self.file_metadata(&inode).await?;
        Ok(Bytes::from(metadata.content_hash.to_hex()))
    }

    /// The defined extended attribute names for an inode.
    pub fn listxattr(&self, number: InodeNumber) -> Result<Vec<String>, FsError> {
        let inode = self.inode(number)?;
        if inode.is_tree() {
            Ok(Vec::new())
        } else {
            Ok(vec![XATTR_SHA1.to_string()])
        }
    }

    /// Whether an inode currently holds materialized state, which shapes
    /// the attribute validity returned to the kernel.
    pub async fn is_materialized(&self, inode: &Arc<Inode>) -> bool {
        if let Ok(lock) = inode.tree_state() {
            return lock.read().await.is_materialized();
        }
        match inode.file_state() {
            Ok(lock) => lock.read().await.is_materialized(),
            Err(_) => false,
        }
    }

    /// The repository-relative path of a live, linked inode.
    pub fn resolve_path(&self, number: InodeNumber) -> Result<RepoPath, FsError> {
        let mut components = Vec::new();
        let mut cursor = self.inode(number)?;
        while !cursor.number().is_root() {
            let (parent, name) = {
                let base = cursor.base();
                (base.parent, base.name.clone())
            };
            let (Some(parent), Some(name)) = (parent, name) else {
                return Err(FsError::StaleInode(cursor.number()));
            };
            components.push(name);
            cursor = self.inode(parent)?;
        }
        components.reverse();
        Ok(RepoPath::from_components(components))
    }

    // ---- internals ----

    /// Fetches a clean tree's child list on demand. Concurrent callers for
    /// the same tree serialize on its state lock, so the object store sees
    /// at most one fetch.
    pub(crate) async fn ensure_tree_children(&self, inode: &Arc<Inode>) -> Result<(), FsError> {
        let lock = inode.tree_state()?;
        {
            if lock.read().await.children().is_some() {
                return Ok(());
            }
        }
        let mut state = lock.write().await;
        let TreeState::Clean { source, cached } = &mut *state else {
            return Ok(());
        };
        if cached.is_some() {
            return Ok(());
        }
        let source = *source;
        let tree = self
            .object_store
            .get_tree(source)
            .await
            .map_err(FsError::from)?
            .ok_or_else(|| FsError::NotFound(format!("tree {source}")))?;
        *cached = Some(TreeState::child_map_from(&tree));
        Ok(())
    }

    /// Constructs (or revives) the live inode for a child descriptor. The
    /// caller holds the parent's tree-state write lock.
    fn register_child_locked(
        &self,
        parent_number: InodeNumber,
        entry: &mut ChildEntry,
    ) -> Result<Arc<Inode>, FsError> {
        if let Some(number) = entry.inode {
            if let Some(inode) = self.map.get(number) {
                return Ok(inode);
            }
        }
        let Some(source) = entry.source_hash else {
            // A materialized child must stay loaded; a descriptor with
            // neither a live inode nor a source form is corrupt.
            return Err(FsError::Internal(format!(
                "materialized child {} has no live inode",
                entry.name
            )));
        };

        let mode = st_mode_for(entry.kind, entry.mode);
        let base = InodeBase::new(
            Some(parent_number),
            Some(entry.name.clone()),
            mode,
            self.config.uid,
            self.config.gid,
        );
        let inode = if entry.kind.is_tree() {
            self.map
                .register(|n| Inode::new_tree(n, base, TreeState::clean(source)))
        } else {
            self.map
                .register(|n| Inode::new_file(n, base, FileState::clean(source)))
        };
        entry.inode = Some(inode.number());
        Ok(inode)
    }

    /// Copies a clean file's contents into the overlay and flips its state,
    /// then propagates materialization through the ancestor chain.
    async fn materialize_file(&self, inode: &Arc<Inode>) -> Result<(), FsError> {
        let lock = inode.file_state()?;
        {
            let mut state = lock.write().await;
            let FileState::Clean { source, .. } = &*state else {
                return Ok(());
            };
            let source = *source;
            let contents = self.fetch_blob_contents(source).await?;
            self.overlay.allocate(inode.number()).await?;
            if !contents.is_empty() {
                self.overlay.write(inode.number(), 0, &contents).await?;
            }
            *state = FileState::materialized(contents.len() as u64);
        }
        self.propagate_materialization(inode).await
    }

    /// Materializes every tree from `tree` up to the root, parents first,
    /// then severs the chain's descriptors from their source hashes.
    pub(crate) async fn materialize_tree_chain(
        &self,
        tree: &Arc<Inode>,
    ) -> Result<(), FsError> {
        let mut chain = vec![Arc::clone(tree)];
        let mut cursor = Arc::clone(tree);
        loop {
            let parent = cursor.base().parent;
            match parent {
                None => break,
                Some(number) => {
                    let next = self.inode(number)?;
                    chain.push(Arc::clone(&next));
                    cursor = next;
                }
            }
        }

        let mut any_materialized = false;
        for node in chain.iter().rev() {
            if self.materialize_one_tree(node).await? {
                any_materialized = true;
            }
        }
        if !any_materialized {
            return Ok(());
        }

        // chain is leaf-first: (child, parent) pairs walk upward.
        for pair in chain.windows(2) {
            let (Some(child), Some(parent)) = (pair.first(), pair.get(1)) else {
                continue;
            };
            self.sever_descriptor(parent, child).await?;
        }
        Ok(())
    }

    /// Flips one clean tree to materialized, mirroring its children to the
    /// overlay. Returns whether a transition happened.
    async fn materialize_one_tree(&self, inode: &Arc<Inode>) -> Result<bool, FsError> {
        self.ensure_tree_children(inode).await?;
        let lock = inode.tree_state()?;
        let snapshot = {
            let mut state = lock.write().await;
            let current = std::mem::replace(
                &mut *state,
                TreeState::materialized(BTreeMap::new()),
            );
            match current {
                TreeState::Materialized { children } => {
                    *state = TreeState::materialized(children);
                    return Ok(false);
                }
                TreeState::Clean {
                    cached: Some(children),
                    ..
                } => {
                    let snapshot: Vec<ChildEntry> = children.values().cloned().collect();
                    *state = TreeState::materialized(children);
                    snapshot
                }
                TreeState::Clean {
                    source,
                    cached: None,
                } => {
                    *state = TreeState::clean(source);
                    return Err(FsError::Internal(
                        "materializing a tree with no child list".into(),
                    ));
                }
            }
        };

        self.overlay.allocate(inode.number()).await?;
        for entry in snapshot {
            self.overlay.set_child(inode.number(), entry).await?;
        }
        Ok(true)
    }

    /// Materializes the ancestor chain of a diverged child and clears its
    /// descriptor's source hash in the parent.
    async fn propagate_materialization(&self, child: &Arc<Inode>) -> Result<(), FsError> {
        let parent_number = child.base().parent;
        let Some(parent_number) = parent_number else {
            return Ok(());
        };
        let parent = self.inode(parent_number)?;
        self.materialize_tree_chain(&parent).await?;
        self.sever_descriptor(&parent, child).await
    }

    /// Clears the child's source hash in the parent's child map and mirrors
    /// the updated descriptor to the overlay.
    async fn sever_descriptor(
        &self,
        parent: &Arc<Inode>,
        child: &Arc<Inode>,
    ) -> Result<(), FsError> {
        let name = child.base().name.clone();
        let Some(name) = name else {
            return Ok(());
        };
        let lock = parent.tree_state()?;
        let updated = {
            let mut state = lock.write().await;
            let Some(children) = state.children_mut() else {
                return Ok(());
            };
            let Some(entry) = children.get_mut(&name) else {
                return Ok(());
            };
            if entry.inode != Some(child.number()) {
                return Ok(());
            }
            entry.source_hash = None;
            entry.clone()
        };
        self.overlay.set_child(parent.number(), updated).await
    }

    /// Size and content hash of a file: cached metadata for clean files
    /// (one object-store round trip, shared by concurrent callers),
    /// computed from the overlay for materialized ones.
    async fn file_metadata(&self, inode: &Arc<Inode>) -> Result<BlobMetadata, FsError> {
        let lock = inode.file_state()?;
        {
            let state = lock.read().await;
            match &*state {
                FileState::Materialized { size } => {
                    let size = *size;
                    drop(state);
                    let contents = self.overlay.read(inode.number(), 0, size as usize).await?;
                    return Ok(BlobMetadata {
                        content_hash: Hash::digest(&contents),
                        size,
                    });
                }
                FileState::Clean {
                    metadata: Some(metadata),
                    ..
                } => return Ok(*metadata),
                FileState::Clean { .. } => {}
            }
        }

        let mut state = lock.write().await;
        match &mut *state {
            FileState::Materialized { size } => {
                let size = *size;
                drop(state);
                let contents = self.overlay.read(inode.number(), 0, size as usize).await?;
                Ok(BlobMetadata {
                    content_hash: Hash::digest(&contents),
                    size,
                })
            }
            FileState::Clean { source, metadata } => {
                if let Some(metadata) = metadata {
                    return Ok(*metadata);
                }
                let source = *source;
                let fetched = self
                    .object_store
                    .get_blob_metadata(source)
                    .await
                    .map_err(FsError::from)?
                    .ok_or_else(|| FsError::NotFound(format!("blob {source}")))?;
                *metadata = Some(fetched);
                Ok(fetched)
            }
        }
    }

    async fn fetch_blob_contents(&self, source: Hash) -> Result<Bytes, FsError> {
        let blob = self
            .object_store
            .get_blob(source)
            .await
            .map_err(FsError::from)?
            .ok_or_else(|| FsError::NotFound(format!("blob {source}")))?;
        Ok(blob.to_contiguous())
    }

    /// Removes and returns a child descriptor, verifying it still refers to
    /// the inode the caller resolved.
    fn take_child_entry(
        state: &mut TreeState,
        name: &PathComponent,
        case_sensitive: bool,
        expected: InodeNumber,
    ) -> Result<PathComponent, FsError> {
        let children = state
            .children_mut()
            .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
        let key = match find_child(children, name, case_sensitive) {
            Some(entry) => entry.name.clone(),
            None => return Err(FsError::NotFound(format!("{name}"))),
        };
        match children.get(&key) {
            Some(entry) if entry.inode == Some(expected) => {}
            _ => return Err(FsError::NotFound(format!("{name}"))),
        }
        children.remove(&key);
        Ok(key)
    }

    /// Inserts the moved descriptor at its new name, dropping any
    /// overwritten target entry.
    fn insert_moved(
        state: &mut TreeState,
        new_name: &PathComponent,
        moving: &Arc<Inode>,
    ) -> Result<ChildEntry, FsError> {
        let children = state
            .children_mut()
            .ok_or_else(|| FsError::Internal("child list missing after load".into()))?;
        // A moved child that never diverged keeps its source form.
        let entry = ChildEntry {
            name: new_name.clone(),
            mode: moving.base().mode,
            kind: entry_kind_for_inode(moving),
            inode: Some(moving.number()),
            source_hash: moving_source(moving),
        };
        children.insert(new_name.clone(), entry.clone());
        Ok(entry)
    }
}

/// Full st_mode bits for a source entry, adding conventional permission
/// bits where git modes carry none.
fn st_mode_for(kind: EntryKind, raw_mode: u32) -> u32 {
    match kind {
        EntryKind::Tree => 0o040755,
        EntryKind::Symlink => S_IFLNK | 0o777,
        EntryKind::Regular | EntryKind::Executable => raw_mode,
    }
}

fn entry_kind_for_mode(mode: u32) -> EntryKind {
    match mode & S_IFMT {
        m if m == S_IFLNK => EntryKind::Symlink,
        0o040000 => EntryKind::Tree,
        _ if mode & 0o111 != 0 => EntryKind::Executable,
        _ => EntryKind::Regular,
    }
}

fn entry_kind_for_inode(inode: &Arc<Inode>) -> EntryKind {
    if inode.is_tree() {
        EntryKind::Tree
    } else {
        entry_kind_for_mode(inode.base().mode)
    }
}

/// The moved inode's source hash, if it is still clean. Non-blocking: the
/// caller holds tree-mutation locks and must not suspend.
fn moving_source(inode: &Arc<Inode>) -> Option<Hash> {
    if let Ok(lock) = inode.tree_state() {
        return lock.try_read().ok().and_then(|state| state.source());
    }
    match inode.file_state() {
        Ok(lock) => lock.try_read().ok().and_then(|state| state.source()),
        Err(_) => None,
    }
}
