// Path: crates/store/src/local_store.rs

//! The local content-addressed store: one redb table per key space.
//!
//! Reads are synchronous against the engine; the `*_future` forms move the
//! engine call onto a blocking worker so a dispatcher thread is never
//! parked on storage I/O. Writes group into a [`WriteBatch`] that commits
//! one engine transaction, atomic with respect to readers.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable};
use tracing::{debug, info};

use canopy_types::error::StoreError;
use canopy_types::hash::Hash;
use canopy_types::object::{git_blob_header, Blob, BlobMetadata, Tree};

use crate::keyspace::KeySpace;

/// Column-family key-value storage over a single redb database.
pub struct LocalStore {
    // Reads and batched writes share the lock in read mode; compaction is
    // the only writer and needs the engine exclusively.
    db: Arc<RwLock<Database>>,
}

impl LocalStore {
    /// Opens (creating if needed) the store at `path` and ensures every key
    /// space's table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let txn = db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for keyspace in KeySpace::ALL {
            txn.open_table(keyspace.table())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(LocalStore {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Fetches the raw bytes under `key`. Missing keys are not errors.
    pub fn get(&self, keyspace: KeySpace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Self::get_locked(&self.db, keyspace, key)
    }

    /// Asynchronous form of [`get`](LocalStore::get); runs the engine call
    /// on a blocking worker.
    pub async fn get_future(
        &self,
        keyspace: KeySpace,
        key: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || Self::get_locked(&db, keyspace, &key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    /// Fetches many keys in one engine snapshot, preserving input order with
    /// one absent result per absent key.
    pub async fn get_batch(
        &self,
        keyspace: KeySpace,
        keys: Vec<Vec<u8>>,
    ) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.read();
            let txn = guard
                .begin_read()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let table = txn
                .open_table(keyspace.table())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            keys.iter()
                .map(|key| {
                    table
                        .get(key.as_slice())
                        .map(|v| v.map(|guard| guard.value().to_vec()))
                        .map_err(|e| StoreError::Backend(e.to_string()))
                })
                .collect()
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    /// Stores one key/value pair atomically.
    pub fn put(&self, keyspace: KeySpace, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut batch = self.begin_write(1);
        batch.put(keyspace, key, value);
        batch.flush()
    }

    /// Stores one value gathered from `slices`, atomically.
    pub fn put_slices(
        &self,
        keyspace: KeySpace,
        key: &[u8],
        slices: &[&[u8]],
    ) -> Result<(), StoreError> {
        let mut batch = self.begin_write(1);
        batch.put_slices(keyspace, key, slices);
        batch.flush()
    }

    /// True if `key` is present in `keyspace`.
    pub fn has_key(&self, keyspace: KeySpace, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(keyspace, key)?.is_some())
    }

    /// Begins a write batch; puts are buffered until
    /// [`flush`](WriteBatch::flush) applies them in one engine transaction.
    pub fn begin_write(&self, size_hint: usize) -> WriteBatch<'_> {
        WriteBatch {
            store: self,
            ops: Vec::with_capacity(size_hint),
        }
    }

    /// Erases every ephemeral key space, leaving persistent ones intact.
    pub fn clear_caches(&self) -> Result<(), StoreError> {
        let guard = self.db.read();
        let txn = guard
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for keyspace in KeySpace::ALL.into_iter().filter(|k| k.is_ephemeral()) {
            txn.delete_table(keyspace.table())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(keyspace.table())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        info!("cleared ephemeral key spaces");
        Ok(())
    }

    /// [`clear_caches`](LocalStore::clear_caches), then compaction across
    /// every key space.
    pub fn clear_caches_and_compact_all(&self) -> Result<(), StoreError> {
        self.clear_caches()?;
        self.compact_storage()
    }

    /// Requests engine compaction without clearing anything.
    pub fn compact_storage(&self) -> Result<(), StoreError> {
        let mut guard = self.db.write();
        let compacted = guard
            .compact()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        debug!(compacted, "storage compaction finished");
        Ok(())
    }

    /// Serializes and stores a tree. If the tree's hash is the null hash the
    /// sha-1 of the serialized form becomes the key; otherwise the stated
    /// hash is used verbatim. Returns the key used.
    pub fn put_tree(&self, tree: &Tree) -> Result<Hash, StoreError> {
        let serialized = tree.serialize();
        let key = if tree.hash().is_null() {
            Hash::digest(&serialized)
        } else {
            tree.hash()
        };
        self.put(KeySpace::Tree, key.as_bytes(), &serialized)?;
        Ok(key)
    }

    /// Stores a blob's framed body and its metadata record in one batch.
    ///
    /// The framed body is gathered from the header plus the blob's native
    /// chunks. Returns the computed metadata.
    pub fn put_blob(&self, blob: &Blob) -> Result<BlobMetadata, StoreError> {
        let metadata = BlobMetadata {
            content_hash: blob.content_hash(),
            size: blob.total_len(),
        };
        let key = if blob.hash().is_null() {
            blob.framed_hash()
        } else {
            blob.hash()
        };

        let header = git_blob_header(blob.total_len());
        let mut slices: Vec<&[u8]> = Vec::with_capacity(blob.chunks().len() + 1);
        slices.push(&header);
        for chunk in blob.chunks() {
            slices.push(chunk.as_ref());
        }

        let mut batch = self.begin_write(2);
        batch.put_slices(KeySpace::Blob, key.as_bytes(), &slices);
        batch.put(
            KeySpace::BlobMetadata,
            key.as_bytes(),
            &metadata.to_bytes(),
        );
        batch.flush()?;
        Ok(metadata)
    }

    /// Fetches and parses a tree; absent keys resolve to `None`, malformed
    /// framing is a decode error naming the key.
    pub fn get_tree(&self, hash: Hash) -> Result<Option<Tree>, StoreError> {
        let Some(raw) = self.get(KeySpace::Tree, hash.as_bytes())? else {
            return Ok(None);
        };
        Tree::deserialize(hash, &raw)
            .map(Some)
            .map_err(|e| StoreError::decode(hash, e))
    }

    /// Fetches and parses a blob.
    pub fn get_blob(&self, hash: Hash) -> Result<Option<Blob>, StoreError> {
        let Some(raw) = self.get(KeySpace::Blob, hash.as_bytes())? else {
            return Ok(None);
        };
        Blob::deserialize(hash, &raw)
            .map(Some)
            .map_err(|e| StoreError::decode(hash, e))
    }

    /// Fetches and parses a 28-byte blob metadata record; a size mismatch is
    /// a decode error naming the offending key.
    pub fn get_blob_metadata(&self, hash: Hash) -> Result<Option<BlobMetadata>, StoreError> {
        let Some(raw) = self.get(KeySpace::BlobMetadata, hash.as_bytes())? else {
            return Ok(None);
        };
        BlobMetadata::from_bytes(&raw)
            .map(Some)
            .map_err(|e| StoreError::decode(hash, e))
    }

    fn get_locked(
        db: &RwLock<Database>,
        keyspace: KeySpace,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = db.read();
        let txn = guard
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn
            .open_table(keyspace.table())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let value = table
            .get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }
}

/// A group of puts applied in one engine transaction.
pub struct WriteBatch<'a> {
    store: &'a LocalStore,
    ops: Vec<(KeySpace, Vec<u8>, Vec<u8>)>,
}

impl WriteBatch<'_> {
    /// Buffers one put.
    pub fn put(&mut self, keyspace: KeySpace, key: &[u8], value: &[u8]) {
        self.ops.push((keyspace, key.to_vec(), value.to_vec()));
    }

    /// Buffers one put whose value is gathered from `slices` into a single
    /// exactly-sized buffer.
    pub fn put_slices(&mut self, keyspace: KeySpace, key: &[u8], slices: &[&[u8]]) {
        let len: usize = slices.iter().map(|s| s.len()).sum();
        let mut value = Vec::with_capacity(len);
        for slice in slices {
            value.extend_from_slice(slice);
        }
        self.ops.push((keyspace, key.to_vec(), value));
    }

    /// Applies every buffered put in one transaction, atomic with respect to
    /// readers.
    pub fn flush(self) -> Result<(), StoreError> {
        let guard = self.store.db.read();
        let txn = guard
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for keyspace in KeySpace::ALL {
            let puts: Vec<_> = self
                .ops
                .iter()
                .filter(|(ks, _, _)| *ks == keyspace)
                .collect();
            if puts.is_empty() {
                continue;
            }
            let mut table = txn
                .open_table(keyspace.table())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            for (_, key, value) in puts {
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }
}
