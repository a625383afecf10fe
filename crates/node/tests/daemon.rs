// Path: crates/node/tests/daemon.rs

//! Daemon front-end tests: config to serving mounts, and the management
//! lifecycle.

use std::sync::Arc;
use std::time::Duration;

use canopy_api::management::MountStatus;
use canopy_api::protocol::{FsReply, FsRequest, RequestContext};
use canopy_node::config::{DaemonConfig, MountPointConfig};
use canopy_node::daemon::Daemon;
use canopy_store::LocalStore;
use canopy_types::hash::Hash;
use canopy_types::inode::InodeNumber;
use canopy_types::object::{EntryKind, Tree, TreeEntry};
use canopy_types::path::PathComponent;

/// Seeds a store holding a root tree with one empty subdirectory and
/// returns the root hash.
fn seed_store(path: &std::path::Path) -> Hash {
    let store = LocalStore::open(path).unwrap();
    let sub = store.put_tree(&Tree::new(Hash::NULL, vec![]).unwrap()).unwrap();
    store
        .put_tree(
            &Tree::new(
                Hash::NULL,
                vec![TreeEntry::new(
                    PathComponent::new("sub").unwrap(),
                    sub,
                    EntryKind::Tree,
                )],
            )
            .unwrap(),
        )
        .unwrap()
}

fn config_for(store_path: std::path::PathBuf, root_hash: Hash) -> DaemonConfig {
    DaemonConfig {
        store_path,
        mounts: vec![MountPointConfig {
            path: "/mnt/repo".to_string(),
            root_hash: root_hash.to_hex(),
            case_sensitive: true,
        }],
        journal_capacity: 1024,
    }
}

#[tokio::test]
async fn daemon_serves_configured_mounts() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.redb");
    let root_hash = seed_store(&store_path);

    let daemon = Daemon::start(config_for(store_path, root_hash)).await.unwrap();

    let info = daemon.management().info();
    assert_eq!(info.status, MountStatus::Starting);
    assert_eq!(info.mount_points.len(), 1);
    let point = info.mount_points.first().unwrap();
    assert_eq!(point.path, "/mnt/repo");
    assert_eq!(point.inode, InodeNumber::ROOT);
    assert_eq!(point.source_hash, root_hash);

    // The dispatcher resolves entries straight out of the local store.
    let dispatcher = &daemon.mounts().first().unwrap().dispatcher;
    let reply = dispatcher
        .handle(
            &RequestContext::ROOT,
            FsRequest::Lookup {
                parent: InodeNumber::ROOT,
                name: PathComponent::new("sub").unwrap(),
            },
        )
        .await
        .unwrap();
    let FsReply::Entry(entry) = reply else {
        panic!("expected an entry reply");
    };
    assert_eq!(entry.attr.mode & 0o170000, 0o040000);
}

#[tokio::test]
async fn graceful_shutdown_walks_the_status_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.redb");
    let root_hash = seed_store(&store_path);

    let daemon = Arc::new(
        Daemon::start(config_for(store_path, root_hash))
            .await
            .unwrap(),
    );

    let serving = tokio::spawn({
        let daemon = Arc::clone(&daemon);
        async move { daemon.serve().await }
    });
    // Let serve() reach its wait point, then stop it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(daemon.management().info().status, MountStatus::Alive);
    assert!(daemon.management().request_shutdown());

    serving.await.unwrap().unwrap();
    assert_eq!(daemon.management().info().status, MountStatus::Stopping);
}

#[tokio::test]
async fn missing_root_tree_is_an_initialization_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.redb");
    {
        LocalStore::open(&store_path).unwrap();
    }

    let absent = Hash::digest(b"never stored");
    assert!(Daemon::start(config_for(store_path, absent)).await.is_err());
}

#[tokio::test]
async fn malformed_root_hash_is_an_initialization_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.redb");
    let root_hash = seed_store(&store_path);
    let _ = root_hash;

    let mut config = config_for(store_path, Hash::NULL);
    config.mounts.first_mut().unwrap().root_hash = "not-hex".to_string();
    assert!(Daemon::start(config).await.is_err());
}
