// Path: crates/inodes/src/map.rs

//! The per-mount inode table: number allocation, kernel lookup-count
//! accounting, the unload sweep, and the takeover snapshot.
//!
//! The table and counts sit behind one short mutex. Anything that may
//! block (object-store fetches, overlay writes) happens outside it; the
//! sweep uses non-blocking state probes and skips whatever is contended.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use canopy_types::error::FsError;
use canopy_types::hash::Hash;
use canopy_types::inode::{ChildEntry, InodeNumber};
use canopy_types::path::PathComponent;

use crate::file::FileState;
use crate::inode::{Inode, InodeBase};
use crate::tree::TreeState;

struct MapEntry {
    inode: Arc<Inode>,
    fs_refcount: u64,
}

struct MapInner {
    live: HashMap<InodeNumber, MapEntry>,
    next: u64,
}

/// The bidirectional map between kernel-visible inode numbers and live
/// inode objects for one mount.
pub struct InodeMap {
    inner: Mutex<MapInner>,
}

impl InodeMap {
    /// An empty map; the allocator starts just above the reserved root
    /// number.
    pub fn new() -> Self {
        InodeMap {
            inner: Mutex::new(MapInner {
                live: HashMap::new(),
                next: InodeNumber::ROOT.get() + 1,
            }),
        }
    }

    /// Installs the root inode. The root is pinned: it is never swept.
    pub(crate) fn insert_root(&self, root: Arc<Inode>) {
        let mut inner = self.inner.lock();
        inner.live.insert(
            InodeNumber::ROOT,
            MapEntry {
                inode: root,
                fs_refcount: 0,
            },
        );
    }

    /// A strong handle to a live inode, or `None` for unknown and reaped
    /// numbers.
    pub fn get(&self, number: InodeNumber) -> Option<Arc<Inode>> {
        self.inner
            .lock()
            .live
            .get(&number)
            .map(|entry| Arc::clone(&entry.inode))
    }

    /// True if `number` is live.
    pub fn contains(&self, number: InodeNumber) -> bool {
        self.inner.lock().live.contains_key(&number)
    }

    /// The number of live inodes.
    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// True when only nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().live.is_empty()
    }

    /// Allocates a fresh number and registers the inode `build` constructs
    /// for it, atomically. Numbers are monotonic and never reused.
    pub(crate) fn register(&self, build: impl FnOnce(InodeNumber) -> Inode) -> Arc<Inode> {
        let mut inner = self.inner.lock();
        let number = InodeNumber::new(inner.next);
        inner.next += 1;
        let inode = Arc::new(build(number));
        inner.live.insert(
            number,
            MapEntry {
                inode: Arc::clone(&inode),
                fs_refcount: 0,
            },
        );
        trace!(%number, "inode registered");
        inode
    }

    /// Adds `count` kernel references to an inode.
    pub fn inc_fs_refcount(&self, number: InodeNumber, count: u64) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.live.get_mut(&number) {
            entry.fs_refcount += count;
        } else {
            error!(%number, "refcount increment for unknown inode");
        }
    }

    /// Subtracts `count` kernel references, as reported by a kernel forget.
    /// Underflow indicates a protocol bug; it is logged and clamped, never
    /// fatal.
    pub fn dec_fs_refcount(&self, number: InodeNumber, count: u64) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.live.get_mut(&number) else {
            error!(%number, "forget for unknown inode");
            return;
        };
        if entry.fs_refcount < count {
            error!(
                %number,
                have = entry.fs_refcount,
                forget = count,
                "kernel refcount underflow"
            );
            entry.fs_refcount = 0;
        } else {
            entry.fs_refcount -= count;
        }
    }

    /// The current kernel refcount of a live inode.
    pub fn fs_refcount(&self, number: InodeNumber) -> Option<u64> {
        self.inner.lock().live.get(&number).map(|e| e.fs_refcount)
    }

    /// Sweeps out every unload-eligible inode: kernel count zero, no
    /// in-process strong handle, and either still clean or already
    /// unlinked. Unload reverses a load exactly: the child's descriptor in
    /// its parent reverts to source-hash form. Returns how many inodes were
    /// unloaded.
    pub fn unload_unreferenced(&self) -> usize {
        let mut inner = self.inner.lock();

        let candidates: Vec<InodeNumber> = inner
            .live
            .iter()
            .filter_map(|(number, entry)| {
                if number.is_root() || entry.fs_refcount > 0 {
                    return None;
                }
                // The map's Arc must be the only holder: anything else means
                // an operation is still in flight on this inode.
                if Arc::strong_count(&entry.inode) > 1 {
                    return None;
                }
                let unlinked = entry.inode.base().parent.is_none();
                match entry.inode.probe_is_clean() {
                    Some(true) => Some(*number),
                    _ if unlinked => Some(*number),
                    _ => None,
                }
            })
            .collect();

        let mut unloaded = 0;
        for number in candidates {
            let Some(entry) = inner.live.get(&number) else {
                continue;
            };
            let (parent, name) = {
                let base = entry.inode.base();
                (base.parent, base.name.clone())
            };

            if let (Some(parent), Some(name)) = (parent, name) {
                if !Self::revert_descriptor(&inner, parent, &name, number) {
                    // Contended or not revertible; keep the inode loaded.
                    continue;
                }
            }
            inner.live.remove(&number);
            unloaded += 1;
            trace!(%number, "inode unloaded");
        }
        unloaded
    }

    /// Clears `child.inode` in the parent's child map, provided the
    /// descriptor can revert to source-hash form. Returns false when the
    /// parent state is contended or the descriptor must keep its inode.
    fn revert_descriptor(
        inner: &MapInner,
        parent: InodeNumber,
        name: &PathComponent,
        child_number: InodeNumber,
    ) -> bool {
        let Some(parent_entry) = inner.live.get(&parent) else {
            // Parent already gone; nothing references the child.
            return true;
        };
        let Ok(state_lock) = parent_entry.inode.tree_state() else {
            return true;
        };
        let Ok(mut state) = state_lock.try_write() else {
            return false;
        };
        let Some(children) = state.children_mut() else {
            return true;
        };
        let Some(child) = children.get_mut(name) else {
            return true;
        };
        if child.inode != Some(child_number) {
            return true;
        }
        if child.source_hash.is_none() {
            // A materialized descriptor has no source form to revert to.
            return false;
        }
        child.inode = None;
        true
    }

    /// Serializes the map for handoff to a successor daemon. The mount must
    /// be quiesced: any contended inode state fails the snapshot.
    pub fn snapshot_for_takeover(&self) -> Result<Vec<u8>, FsError> {
        let inner = self.inner.lock();
        let mut inodes = Vec::with_capacity(inner.live.len());
        for (number, entry) in &inner.live {
            let base = entry.inode.base().clone();
            let body = Self::serialize_body(&entry.inode)?;
            inodes.push(SerializedInode {
                number: *number,
                parent: base.parent,
                name: base.name,
                mode: base.mode,
                uid: base.uid,
                gid: base.gid,
                links: base.links,
                atime: base.atime,
                mtime: base.mtime,
                ctime: base.ctime,
                fs_refcount: entry.fs_refcount,
                body,
            });
        }
        let snapshot = SerializedMap {
            next: inner.next,
            inodes,
        };
        bincode::serialize(&snapshot).map_err(|e| FsError::Internal(e.to_string()))
    }

    /// Rebuilds a map from a takeover snapshot. The allocator resumes above
    /// the maximum restored number.
    pub fn restore_from_takeover(bytes: &[u8]) -> Result<Self, FsError> {
        let snapshot: SerializedMap =
            bincode::deserialize(bytes).map_err(|e| FsError::Parse(e.to_string()))?;

        let mut live = HashMap::with_capacity(snapshot.inodes.len());
        let mut max_number = InodeNumber::ROOT.get();
        for record in snapshot.inodes {
            max_number = max_number.max(record.number.get());
            let base = InodeBase {
                parent: record.parent,
                name: record.name,
                mode: record.mode,
                uid: record.uid,
                gid: record.gid,
                links: record.links,
                atime: record.atime,
                mtime: record.mtime,
                ctime: record.ctime,
            };
            let inode = match record.body {
                SerializedBody::CleanTree { source } => Arc::new(Inode::new_tree(
                    record.number,
                    base,
                    TreeState::clean(source),
                )),
                SerializedBody::MaterializedTree { children } => {
                    let children = children
                        .into_iter()
                        .map(|child| (child.name.clone(), child))
                        .collect();
                    Arc::new(Inode::new_tree(
                        record.number,
                        base,
                        TreeState::materialized(children),
                    ))
                }
                SerializedBody::CleanFile { source } => Arc::new(Inode::new_file(
                    record.number,
                    base,
                    FileState::clean(source),
                )),
                SerializedBody::MaterializedFile { size } => Arc::new(Inode::new_file(
                    record.number,
                    base,
                    FileState::materialized(size),
                )),
            };
            live.insert(
                record.number,
                MapEntry {
                    inode,
                    fs_refcount: record.fs_refcount,
                },
            );
        }

        Ok(InodeMap {
            inner: Mutex::new(MapInner {
                live,
                next: snapshot.next.max(max_number + 1),
            }),
        })
    }

    fn serialize_body(inode: &Arc<Inode>) -> Result<SerializedBody, FsError> {
        if let Ok(lock) = inode.tree_state() {
            let state = lock
                .try_read()
                .map_err(|_| FsError::Internal("takeover snapshot of a busy mount".into()))?;
            return Ok(match &*state {
                TreeState::Clean { source, .. } => SerializedBody::CleanTree { source: *source },
                TreeState::Materialized { children } => SerializedBody::MaterializedTree {
                    children: children.values().cloned().collect(),
                },
            });
        }
        let lock = inode.file_state().map_err(|e| FsError::Internal(e.to_string()))?;
        let state = lock
            .try_read()
            .map_err(|_| FsError::Internal("takeover snapshot of a busy mount".into()))?;
        Ok(match &*state {
            FileState::Clean { source, .. } => SerializedBody::CleanFile { source: *source },
            FileState::Materialized { size } => SerializedBody::MaterializedFile { size: *size },
        })
    }
}

impl Default for InodeMap {
    fn default() -> Self {
        InodeMap::new()
    }
}

#[derive(Serialize, Deserialize)]
enum SerializedBody {
    CleanTree { source: Hash },
    MaterializedTree { children: Vec<ChildEntry> },
    CleanFile { source: Hash },
    MaterializedFile { size: u64 },
}

#[derive(Serialize, Deserialize)]
struct SerializedInode {
    number: InodeNumber,
    parent: Option<InodeNumber>,
    name: Option<PathComponent>,
    mode: u32,
    uid: u32,
    gid: u32,
    links: u32,
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
    fs_refcount: u64,
    body: SerializedBody,
}

#[derive(Serialize, Deserialize)]
struct SerializedMap {
    next: u64,
    inodes: Vec<SerializedInode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::object::EntryKind;

    fn register_clean_file(map: &InodeMap, parent: InodeNumber, name: &str) -> Arc<Inode> {
        map.register(|number| {
            Inode::new_file(
                number,
                InodeBase::new(
                    Some(parent),
                    Some(PathComponent::new(name).unwrap()),
                    EntryKind::Regular.mode(),
                    0,
                    0,
                ),
                FileState::clean(Hash::digest(name.as_bytes())),
            )
        })
    }

    #[test]
    fn numbers_are_monotonic_and_start_above_root() {
        let map = InodeMap::new();
        let a = register_clean_file(&map, InodeNumber::ROOT, "a");
        let b = register_clean_file(&map, InodeNumber::ROOT, "b");
        assert_eq!(a.number().get(), 2);
        assert_eq!(b.number().get(), 3);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn refcounts_and_underflow_clamp() {
        let map = InodeMap::new();
        let a = register_clean_file(&map, InodeNumber::ROOT, "a");
        let number = a.number();
        drop(a);

        map.inc_fs_refcount(number, 2);
        assert_eq!(map.fs_refcount(number), Some(2));
        map.dec_fs_refcount(number, 5);
        assert_eq!(map.fs_refcount(number), Some(0));
    }

    #[test]
    fn sweep_unloads_only_eligible_inodes() {
        let map = InodeMap::new();
        let held = register_clean_file(&map, InodeNumber::ROOT, "held");
        let forgotten = register_clean_file(&map, InodeNumber::ROOT, "forgotten");
        let referenced = register_clean_file(&map, InodeNumber::ROOT, "referenced");
        let forgotten_number = forgotten.number();
        let referenced_number = referenced.number();
        drop(forgotten);
        drop(referenced);

        map.inc_fs_refcount(referenced_number, 1);

        let unloaded = map.unload_unreferenced();
        assert_eq!(unloaded, 1);
        assert!(!map.contains(forgotten_number));
        // A strong handle pins the inode regardless of kernel count.
        assert!(map.contains(held.number()));
        // A kernel reference pins it too.
        assert!(map.contains(referenced_number));

        map.dec_fs_refcount(referenced_number, 1);
        assert_eq!(map.unload_unreferenced(), 1);
        assert!(!map.contains(referenced_number));
    }

    #[test]
    fn snapshot_restore_round_trip_resumes_allocator() {
        let map = InodeMap::new();
        let a = register_clean_file(&map, InodeNumber::ROOT, "a");
        let a_number = a.number();
        map.inc_fs_refcount(a_number, 3);
        drop(a);

        let bytes = map.snapshot_for_takeover().unwrap();
        let restored = InodeMap::restore_from_takeover(&bytes).unwrap();

        assert_eq!(restored.fs_refcount(a_number), Some(3));
        let fresh = register_clean_file(&restored, InodeNumber::ROOT, "b");
        assert!(fresh.number() > a_number);
    }
}
