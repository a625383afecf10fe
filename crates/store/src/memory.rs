// Path: crates/store/src/memory.rs

//! An in-memory backing store.
//!
//! Used by tests and by mounts whose source objects are seeded at startup
//! instead of imported from a remote source-control backend.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use canopy_api::object_store::BackingStore;
use canopy_types::error::StoreError;
use canopy_types::hash::Hash;
use canopy_types::object::{Blob, Tree};

/// A [`BackingStore`] holding parsed objects in process memory.
#[derive(Default)]
pub struct MemoryBackingStore {
    trees: Mutex<HashMap<Hash, Tree>>,
    blobs: Mutex<HashMap<Hash, Blob>>,
    fetches: Mutex<u64>,
}

impl MemoryBackingStore {
    /// Inserts a tree, keying by its stated hash or, for a null hash, the
    /// sha-1 of its serialized form. Returns the key used.
    pub fn insert_tree(&self, tree: Tree) -> Hash {
        let key = if tree.hash().is_null() {
            Hash::digest(&tree.serialize())
        } else {
            tree.hash()
        };
        self.trees.lock().insert(key, tree);
        key
    }

    /// Inserts a blob, keying by its stated hash or, for a null hash, the
    /// sha-1 of its framed form. Returns the key used.
    pub fn insert_blob(&self, blob: Blob) -> Hash {
        let key = if blob.hash().is_null() {
            blob.framed_hash()
        } else {
            blob.hash()
        };
        self.blobs.lock().insert(key, blob);
        key
    }

    /// How many fetches have hit this store, for single-flight assertions.
    pub fn fetch_count(&self) -> u64 {
        *self.fetches.lock()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn fetch_tree(&self, hash: Hash) -> Result<Option<Tree>, StoreError> {
        *self.fetches.lock() += 1;
        Ok(self.trees.lock().get(&hash).cloned())
    }

    async fn fetch_blob(&self, hash: Hash) -> Result<Option<Blob>, StoreError> {
        *self.fetches.lock() += 1;
        Ok(self.blobs.lock().get(&hash).cloned())
    }
}
