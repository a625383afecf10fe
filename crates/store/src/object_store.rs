// Path: crates/store/src/object_store.rs

//! The object-store facade: local store first, backing importer on miss.
//!
//! Imported objects are written through to the local store so repeated
//! reads never leave the machine. Parsing happens in the local-store typed
//! protocol; the facade only decides where bytes come from.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use canopy_api::object_store::{BackingStore, ObjectStore};
use canopy_types::error::StoreError;
use canopy_types::hash::Hash;
use canopy_types::object::{Blob, BlobMetadata, Tree};

use crate::keyspace::KeySpace;
use crate::local_store::LocalStore;

/// [`ObjectStore`] over a [`LocalStore`] with a backing importer.
pub struct LocalObjectStore {
    local: Arc<LocalStore>,
    backing: Arc<dyn BackingStore>,
}

impl LocalObjectStore {
    /// Builds the facade.
    pub fn new(local: Arc<LocalStore>, backing: Arc<dyn BackingStore>) -> Self {
        LocalObjectStore { local, backing }
    }

    /// The underlying local store, for maintenance operations.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    async fn local_tree(&self, hash: Hash) -> Result<Option<Tree>, StoreError> {
        let local = Arc::clone(&self.local);
        tokio::task::spawn_blocking(move || local.get_tree(hash))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn local_blob(&self, hash: Hash) -> Result<Option<Blob>, StoreError> {
        let local = Arc::clone(&self.local);
        tokio::task::spawn_blocking(move || local.get_blob(hash))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn local_blob_metadata(&self, hash: Hash) -> Result<Option<BlobMetadata>, StoreError> {
        let local = Arc::clone(&self.local);
        tokio::task::spawn_blocking(move || local.get_blob_metadata(hash))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_tree(&self, hash: Hash) -> Result<Option<Tree>, StoreError> {
        if let Some(tree) = self.local_tree(hash).await? {
            return Ok(Some(tree));
        }
        let Some(tree) = self.backing.fetch_tree(hash).await? else {
            return Ok(None);
        };
        debug!(%hash, "imported tree from backing store");
        let local = Arc::clone(&self.local);
        let to_store = tree.clone();
        tokio::task::spawn_blocking(move || local.put_tree(&to_store))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))??;
        Ok(Some(tree))
    }

    async fn get_blob(&self, hash: Hash) -> Result<Option<Blob>, StoreError> {
        if let Some(blob) = self.local_blob(hash).await? {
            return Ok(Some(blob));
        }
        let Some(blob) = self.backing.fetch_blob(hash).await? else {
            return Ok(None);
        };
        debug!(%hash, "imported blob from backing store");
        let local = Arc::clone(&self.local);
        let to_store = blob.clone();
        tokio::task::spawn_blocking(move || local.put_blob(&to_store))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))??;
        Ok(Some(blob))
    }

    async fn get_blob_metadata(&self, hash: Hash) -> Result<Option<BlobMetadata>, StoreError> {
        if let Some(metadata) = self.local_blob_metadata(hash).await? {
            return Ok(Some(metadata));
        }
        // No record; derive it from the blob itself, importing if needed.
        let Some(blob) = self.get_blob(hash).await? else {
            return Ok(None);
        };
        let metadata = BlobMetadata {
            content_hash: blob.content_hash(),
            size: blob.total_len(),
        };
        let local = Arc::clone(&self.local);
        tokio::task::spawn_blocking(move || {
            local.put(
                KeySpace::BlobMetadata,
                hash.as_bytes(),
                &metadata.to_bytes(),
            )
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))??;
        Ok(Some(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackingStore;
    use bytes::Bytes;

    fn facade_with_backing() -> (tempfile::TempDir, LocalObjectStore, Hash) {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalStore::open(dir.path().join("local.redb")).unwrap());
        let backing = MemoryBackingStore::default();
        let blob_hash = backing.insert_blob(Blob::from_bytes(
            Hash::NULL,
            Bytes::from_static(b"hello"),
        ));
        let facade = LocalObjectStore::new(local, Arc::new(backing));
        (dir, facade, blob_hash)
    }

    #[tokio::test]
    async fn miss_imports_and_caches() {
        let (_dir, facade, hash) = facade_with_backing();

        let blob = facade.get_blob(hash).await.unwrap().unwrap();
        assert_eq!(blob.to_contiguous().as_ref(), b"hello");

        // Now cached locally: present even without consulting the importer.
        assert!(facade.local().has_key(KeySpace::Blob, hash.as_bytes()).unwrap());
        assert!(facade
            .local()
            .has_key(KeySpace::BlobMetadata, hash.as_bytes())
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_hash_resolves_to_none() {
        let (_dir, facade, _) = facade_with_backing();
        let missing = Hash::digest(b"not there");
        assert!(facade.get_tree(missing).await.unwrap().is_none());
        assert!(facade.get_blob(missing).await.unwrap().is_none());
        assert!(facade.get_blob_metadata(missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metadata_derived_from_imported_blob() {
        let (_dir, facade, hash) = facade_with_backing();
        let metadata = facade.get_blob_metadata(hash).await.unwrap().unwrap();
        assert_eq!(metadata.size, 5);
        assert_eq!(metadata.content_hash, Hash::digest(b"hello"));
    }
}
