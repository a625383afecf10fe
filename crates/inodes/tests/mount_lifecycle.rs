// Path: crates/inodes/tests/mount_lifecycle.rs

//! Inode map and inode lifecycle tests against an in-memory object store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use canopy_api::object_store::ObjectStore;
use canopy_api::protocol::RequestContext;
use canopy_inodes::{MemoryOverlay, Mount, MountConfig};
use canopy_types::error::{FsError, StoreError};
use canopy_types::hash::Hash;
use canopy_types::inode::{AttrChanges, InodeNumber};
use canopy_types::object::{Blob, BlobMetadata, EntryKind, Tree, TreeEntry};
use canopy_types::path::PathComponent;

#[derive(Default)]
struct FakeObjectStore {
    trees: Mutex<HashMap<Hash, Tree>>,
    blobs: Mutex<HashMap<Hash, Blob>>,
    tree_fetches: AtomicU64,
    blob_fetches: AtomicU64,
}

impl FakeObjectStore {
    fn insert_tree(&self, tree: Tree) -> Hash {
        let key = Hash::digest(&tree.serialize());
        self.trees.lock().insert(key, tree);
        key
    }

    fn insert_blob(&self, contents: &'static [u8]) -> Hash {
        let blob = Blob::from_bytes(Hash::NULL, Bytes::from_static(contents));
        let key = blob.framed_hash();
        self.blobs.lock().insert(key, blob);
        key
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn get_tree(&self, hash: Hash) -> Result<Option<Tree>, StoreError> {
        self.tree_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.trees.lock().get(&hash).cloned())
    }

    async fn get_blob(&self, hash: Hash) -> Result<Option<Blob>, StoreError> {
        self.blob_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.lock().get(&hash).cloned())
    }

    async fn get_blob_metadata(&self, hash: Hash) -> Result<Option<BlobMetadata>, StoreError> {
        Ok(self.blobs.lock().get(&hash).map(|blob| BlobMetadata {
            content_hash: blob.content_hash(),
            size: blob.total_len(),
        }))
    }
}

fn component(name: &str) -> PathComponent {
    PathComponent::new(name).unwrap()
}

/// Root tree: `a` = "hello", `b` = "foo", `sub/` containing `c` = "sea".
fn seed_store() -> (Arc<FakeObjectStore>, Hash) {
    let store = Arc::new(FakeObjectStore::default());
    let a = store.insert_blob(b"hello");
    let b = store.insert_blob(b"foo");
    let c = store.insert_blob(b"sea");

    let sub = store.insert_tree(
        Tree::new(
            Hash::NULL,
            vec![TreeEntry::new(component("c"), c, EntryKind::Regular)],
        )
        .unwrap(),
    );
    let root = store.insert_tree(
        Tree::new(
            Hash::NULL,
            vec![
                TreeEntry::new(component("a"), a, EntryKind::Regular),
                TreeEntry::new(component("b"), b, EntryKind::Regular),
                TreeEntry::new(component("sub"), sub, EntryKind::Tree),
            ],
        )
        .unwrap(),
    );
    (store, root)
}

async fn seed_mount() -> (Arc<FakeObjectStore>, Arc<Mount>) {
    let (store, root) = seed_store();
    let mount = Mount::new(
        MountConfig::new(root),
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::new(MemoryOverlay::new()),
    )
    .await
    .unwrap();
    (store, mount)
}

#[tokio::test]
async fn lookup_assigns_stable_numbers() {
    let (_store, mount) = seed_mount().await;

    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    let again = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    assert_eq!(a.number(), again.number());
    assert_eq!(a.number().get(), 2);

    let b = mount
        .lookup_child(InodeNumber::ROOT, &component("b"))
        .await
        .unwrap();
    assert_eq!(b.number().get(), 3);

    let missing = mount
        .lookup_child(InodeNumber::ROOT, &component("nope"))
        .await;
    assert!(matches!(missing, Err(FsError::NotFound(_))));
}

#[tokio::test]
async fn concurrent_lookups_share_one_load() {
    let (store, mount) = seed_mount().await;
    let sub = mount
        .lookup_child(InodeNumber::ROOT, &component("sub"))
        .await
        .unwrap();

    // Two workers race to resolve the same unexplored child.
    let before = store.tree_fetches.load(Ordering::SeqCst);
    let m1 = Arc::clone(&mount);
    let m2 = Arc::clone(&mount);
    let sub_ino = sub.number();
    let (first, second) = tokio::join!(
        tokio::spawn(async move { m1.lookup_child(sub_ino, &component("c")).await }),
        tokio::spawn(async move { m2.lookup_child(sub_ino, &component("c")).await }),
    );
    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();

    assert_eq!(first.number(), second.number());
    let fetches = store.tree_fetches.load(Ordering::SeqCst) - before;
    assert_eq!(fetches, 1, "sub's child list must be fetched exactly once");
}

#[tokio::test]
async fn getattr_reports_sizes_and_links() {
    let (_store, mount) = seed_mount().await;

    let root_attr = mount.getattr(InodeNumber::ROOT).await.unwrap();
    assert_eq!(root_attr.mode & 0o170000, 0o040000);
    assert_eq!(root_attr.nlink, 3, "dot, dotdot, and one subdirectory");

    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    let attr = mount.getattr(a.number()).await.unwrap();
    assert_eq!(attr.size, 5);
    assert_eq!(attr.nlink, 1);
}

#[tokio::test]
async fn read_clean_then_write_materializes() {
    let (_store, mount) = seed_mount().await;
    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();

    let data = mount.read(a.number(), 0, 5).await.unwrap();
    assert_eq!(data.as_ref(), b"hello");
    assert!(!mount.is_materialized(&a).await);

    let written = mount.write(a.number(), 0, b"HELLO").await.unwrap();
    assert_eq!(written, 5);
    assert_eq!(mount.read(a.number(), 0, 5).await.unwrap().as_ref(), b"HELLO");

    assert!(mount.is_materialized(&a).await);
    let root = mount.inode(InodeNumber::ROOT).unwrap();
    assert!(mount.is_materialized(&root).await);
}

#[tokio::test]
async fn deep_write_materializes_the_whole_chain() {
    let (_store, mount) = seed_mount().await;
    let sub = mount
        .lookup_child(InodeNumber::ROOT, &component("sub"))
        .await
        .unwrap();
    let c = mount
        .lookup_child(sub.number(), &component("c"))
        .await
        .unwrap();

    assert!(!mount.is_materialized(&sub).await);
    mount.write(c.number(), 0, b"SEA").await.unwrap();

    assert!(mount.is_materialized(&c).await);
    assert!(mount.is_materialized(&sub).await);
}

#[tokio::test]
async fn create_fails_on_second_use_of_a_name() {
    let (_store, mount) = seed_mount().await;
    let ctx = RequestContext::ROOT;

    // Explore the existing children first, as a kernel would.
    mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    mount
        .lookup_child(InodeNumber::ROOT, &component("b"))
        .await
        .unwrap();

    let c = mount
        .create_child(
            InodeNumber::ROOT,
            &component("c"),
            EntryKind::Regular,
            0o644,
            &ctx,
            None,
        )
        .await
        .unwrap();
    assert!(c.number().get() >= 3);

    let err = mount
        .create_child(
            InodeNumber::ROOT,
            &component("c"),
            EntryKind::Regular,
            0o644,
            &ctx,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Exists(_)));

    let names: Vec<String> = mount
        .list_dir(InodeNumber::ROOT)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name.to_string())
        .collect();
    assert_eq!(names, vec!["a", "b", "c", "sub"]);
}

#[tokio::test]
async fn mkdir_then_rmdir_restores_the_visible_child_set() {
    let (_store, mount) = seed_mount().await;
    let ctx = RequestContext::ROOT;

    mount
        .create_child(
            InodeNumber::ROOT,
            &component("d"),
            EntryKind::Tree,
            0o755,
            &ctx,
            None,
        )
        .await
        .unwrap();
    mount
        .remove_child(InodeNumber::ROOT, &component("d"), true)
        .await
        .unwrap();

    let names: Vec<String> = mount
        .list_dir(InodeNumber::ROOT)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name.to_string())
        .collect();
    assert_eq!(names, vec!["a", "b", "sub"]);
}

#[tokio::test]
async fn rmdir_refuses_non_empty_and_non_directories() {
    let (_store, mount) = seed_mount().await;

    let err = mount
        .remove_child(InodeNumber::ROOT, &component("sub"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotEmpty(_)));

    let err = mount
        .remove_child(InodeNumber::ROOT, &component("a"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotADirectory(_)));

    let err = mount
        .remove_child(InodeNumber::ROOT, &component("sub"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::IsADirectory(_)));
}

#[tokio::test]
async fn rename_preserves_inode_numbers() {
    let (_store, mount) = seed_mount().await;
    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    let a_number = a.number();

    let changed = mount
        .rename(
            InodeNumber::ROOT,
            &component("a"),
            InodeNumber::ROOT,
            &component("renamed"),
        )
        .await
        .unwrap();
    assert!(changed);

    let renamed = mount
        .lookup_child(InodeNumber::ROOT, &component("renamed"))
        .await
        .unwrap();
    assert_eq!(renamed.number(), a_number);
    assert!(matches!(
        mount
            .lookup_child(InodeNumber::ROOT, &component("a"))
            .await,
        Err(FsError::NotFound(_))
    ));
}

#[tokio::test]
async fn rename_in_place_is_a_noop_and_missing_source_fails() {
    let (_store, mount) = seed_mount().await;

    let changed = mount
        .rename(
            InodeNumber::ROOT,
            &component("a"),
            InodeNumber::ROOT,
            &component("a"),
        )
        .await
        .unwrap();
    assert!(!changed);

    let err = mount
        .rename(
            InodeNumber::ROOT,
            &component("ghost"),
            InodeNumber::ROOT,
            &component("elsewhere"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));

    let names: Vec<String> = mount
        .list_dir(InodeNumber::ROOT)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name.to_string())
        .collect();
    assert_eq!(names, vec!["a", "b", "sub"]);
}

#[tokio::test]
async fn rename_overwrite_follows_posix_rules() {
    let (_store, mount) = seed_mount().await;

    // File over file: allowed, target replaced.
    mount
        .rename(
            InodeNumber::ROOT,
            &component("a"),
            InodeNumber::ROOT,
            &component("b"),
        )
        .await
        .unwrap();
    let b = mount
        .lookup_child(InodeNumber::ROOT, &component("b"))
        .await
        .unwrap();
    assert_eq!(mount.read(b.number(), 0, 5).await.unwrap().as_ref(), b"hello");

    // File over directory: refused.
    let err = mount
        .rename(
            InodeNumber::ROOT,
            &component("b"),
            InodeNumber::ROOT,
            &component("sub"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::IsADirectory(_)));

    // Directory over non-empty directory: refused.
    let ctx = RequestContext::ROOT;
    mount
        .create_child(
            InodeNumber::ROOT,
            &component("emptydir"),
            EntryKind::Tree,
            0o755,
            &ctx,
            None,
        )
        .await
        .unwrap();
    let err = mount
        .rename(
            InodeNumber::ROOT,
            &component("emptydir"),
            InodeNumber::ROOT,
            &component("sub"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotEmpty(_)));

    // Directory over empty directory: allowed; only the target must be
    // empty.
    let changed = mount
        .rename(
            InodeNumber::ROOT,
            &component("sub"),
            InodeNumber::ROOT,
            &component("emptydir"),
        )
        .await
        .unwrap();
    assert!(changed);
    let moved = mount
        .lookup_child(InodeNumber::ROOT, &component("emptydir"))
        .await
        .unwrap();
    assert!(mount
        .lookup_child(moved.number(), &component("c"))
        .await
        .is_ok());
}

#[tokio::test]
async fn setattr_truncate_materializes_and_resizes() {
    let (_store, mount) = seed_mount().await;
    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();

    let changes = AttrChanges {
        size: Some(2),
        ..Default::default()
    };
    let attr = mount.setattr(a.number(), &changes).await.unwrap();
    assert_eq!(attr.size, 2);
    assert!(mount.is_materialized(&a).await);
    assert_eq!(mount.read(a.number(), 0, 10).await.unwrap().as_ref(), b"he");

    let err = mount
        .setattr(InodeNumber::ROOT, &changes)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::InvalidArgument(_)));
}

#[tokio::test]
async fn forget_then_sweep_reaps_clean_inodes_and_renumbers() {
    let (_store, mount) = seed_mount().await;
    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    let number = a.number();
    mount.map().inc_fs_refcount(number, 2);
    drop(a);

    // Kernel still holds references: nothing to reap.
    assert_eq!(mount.map().unload_unreferenced(), 0);

    mount.map().dec_fs_refcount(number, 2);
    assert_eq!(mount.map().unload_unreferenced(), 1);
    assert!(mount.map().get(number).is_none());
    assert!(matches!(
        mount.getattr(number).await,
        Err(FsError::StaleInode(_))
    ));

    // The descriptor reverted to source form; a fresh lookup gets a fresh
    // number.
    let again = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    assert_ne!(again.number(), number);
    assert_eq!(
        mount.read(again.number(), 0, 5).await.unwrap().as_ref(),
        b"hello"
    );
}

#[tokio::test]
async fn materialized_inodes_survive_the_sweep() {
    let (_store, mount) = seed_mount().await;
    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    let number = a.number();
    mount.write(number, 0, b"dirty").await.unwrap();
    drop(a);

    assert_eq!(mount.map().unload_unreferenced(), 0);
    assert!(mount.map().get(number).is_some());
}

#[tokio::test]
async fn symlink_round_trip() {
    let (_store, mount) = seed_mount().await;
    let ctx = RequestContext::ROOT;

    let link = mount
        .create_child(
            InodeNumber::ROOT,
            &component("ln"),
            EntryKind::Symlink,
            0o777,
            &ctx,
            Some(b"a"),
        )
        .await
        .unwrap();
    assert_eq!(
        mount.readlink(link.number()).await.unwrap().as_ref(),
        b"a"
    );

    let err = mount.readlink(InodeNumber::ROOT).await.unwrap_err();
    assert!(matches!(err, FsError::InvalidArgument(_)));
}

#[tokio::test]
async fn sha1_xattr_tracks_content() {
    let (_store, mount) = seed_mount().await;
    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();

    let value = mount
        .getxattr(a.number(), canopy_inodes::mount::XATTR_SHA1)
        .await
        .unwrap();
    assert_eq!(value.as_ref(), Hash::digest(b"hello").to_hex().as_bytes());

    mount.write(a.number(), 0, b"HELLO").await.unwrap();
    let value = mount
        .getxattr(a.number(), canopy_inodes::mount::XATTR_SHA1)
        .await
        .unwrap();
    assert_eq!(value.as_ref(), Hash::digest(b"HELLO").to_hex().as_bytes());

    let err = mount.getxattr(a.number(), "user.unknown").await.unwrap_err();
    assert!(matches!(err, FsError::NoAttribute(_)));
}

#[tokio::test]
async fn takeover_snapshot_round_trip() {
    let (store, mount) = seed_mount().await;
    let a = mount
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    let a_number = a.number();
    mount.map().inc_fs_refcount(a_number, 1);
    drop(a);

    let snapshot = mount.snapshot_for_takeover().unwrap();
    let restored = Mount::restore_from_takeover(
        MountConfig::new(mount.root_hash()),
        store as Arc<dyn ObjectStore>,
        Arc::new(MemoryOverlay::new()),
        &snapshot,
    )
    .unwrap();

    assert_eq!(restored.map().fs_refcount(a_number), Some(1));
    let a = restored
        .lookup_child(InodeNumber::ROOT, &component("a"))
        .await
        .unwrap();
    assert_eq!(a.number(), a_number);
    assert_eq!(
        restored.read(a_number, 0, 5).await.unwrap().as_ref(),
        b"hello"
    );
}
