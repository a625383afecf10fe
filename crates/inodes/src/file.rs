// Path: crates/inodes/src/file.rs

//! File-inode state: clean-from-source or materialized-in-overlay.
//!
//! A clean file serves reads straight from its source blob and caches the
//! blob's metadata after the first attribute fetch, so concurrent lookups
//! cost one object-store round trip. The first write or truncate copies
//! the contents into the overlay and the state flips to materialized, from
//! which point the overlay is authoritative.

use canopy_types::hash::Hash;
use canopy_types::object::BlobMetadata;

/// The state of one file inode.
pub enum FileState {
    /// Fully derivable from a source blob.
    Clean {
        /// The source blob's hash.
        source: Hash,
        /// Cached (content hash, size), filled on first attribute fetch.
        metadata: Option<BlobMetadata>,
    },
    /// Diverged into the overlay.
    Materialized {
        /// Current size of the overlay contents.
        size: u64,
    },
}

impl FileState {
    /// A clean file with no metadata fetched yet.
    pub fn clean(source: Hash) -> Self {
        FileState::Clean {
            source,
            metadata: None,
        }
    }

    /// A materialized file of the given size.
    pub fn materialized(size: u64) -> Self {
        FileState::Materialized { size }
    }

    /// True once the file has diverged from its source.
    pub fn is_materialized(&self) -> bool {
        matches!(self, FileState::Materialized { .. })
    }

    /// The source hash while clean.
    pub fn source(&self) -> Option<Hash> {
        match self {
            FileState::Clean { source, .. } => Some(*source),
            FileState::Materialized { .. } => None,
        }
    }
}
