// Path: crates/api/src/object_store.rs

//! Resolving logical object ids to parsed trees and blobs.

use async_trait::async_trait;

use canopy_types::error::StoreError;
use canopy_types::hash::Hash;
use canopy_types::object::{Blob, BlobMetadata, Tree};

/// The read surface the inode engine consumes.
///
/// The backing may be multi-layered (local cache over a remote importer);
/// the core does not inspect. Absence is not an error: a hash the store has
/// never seen resolves to `None`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolves a tree by hash.
    async fn get_tree(&self, hash: Hash) -> Result<Option<Tree>, StoreError>;

    /// Resolves a blob by hash.
    async fn get_blob(&self, hash: Hash) -> Result<Option<Blob>, StoreError>;

    /// Resolves a blob's (content hash, size) pair without loading its
    /// bytes, when a metadata record is available or derivable.
    async fn get_blob_metadata(&self, hash: Hash) -> Result<Option<BlobMetadata>, StoreError>;
}

/// The import path consulted on a local miss.
///
/// Implementations talk to the source-control backend; the core only ever
/// sees parsed objects or absence.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Fetches a tree from the backing source-control store.
    async fn fetch_tree(&self, hash: Hash) -> Result<Option<Tree>, StoreError>;

    /// Fetches a blob from the backing source-control store.
    async fn fetch_blob(&self, hash: Hash) -> Result<Option<Blob>, StoreError>;
}

/// A backing store with no objects, for mounts served purely from the local
/// store.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBackingStore;

#[async_trait]
impl BackingStore for EmptyBackingStore {
    async fn fetch_tree(&self, _hash: Hash) -> Result<Option<Tree>, StoreError> {
        Ok(None)
    }

    async fn fetch_blob(&self, _hash: Hash) -> Result<Option<Blob>, StoreError> {
        Ok(None)
    }
}
