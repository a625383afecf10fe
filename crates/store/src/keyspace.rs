// Path: crates/store/src/keyspace.rs

//! Key spaces: the named partitions of the local store.

use redb::TableDefinition;

/// ---- Table definitions (single DB, one table per key space) ----
const BLOB: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blob");
const BLOB_METADATA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blobmeta");
const TREE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tree");
const HG_PROXY_HASH: TableDefinition<&[u8], &[u8]> = TableDefinition::new("hgproxyhash");
const HG_COMMIT_TO_TREE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("hgcommit2tree");

/// A named partition of the local store, each with its own persistence
/// class and schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpace {
    /// Git-framed blob bodies keyed by blob hash. Ephemeral.
    Blob,
    /// 28-byte (size, content hash) records keyed by blob hash. Ephemeral.
    BlobMetadata,
    /// Git-framed tree bodies keyed by tree hash. Persistent.
    Tree,
    /// Proxy-hash records, opaque to the core. Persistent.
    HgProxyHash,
    /// Commit→tree mappings, opaque to the core. Ephemeral.
    HgCommitToTree,
}

impl KeySpace {
    /// Every key space, in a fixed order.
    pub const ALL: [KeySpace; 5] = [
        KeySpace::Blob,
        KeySpace::BlobMetadata,
        KeySpace::Tree,
        KeySpace::HgProxyHash,
        KeySpace::HgCommitToTree,
    ];

    /// Ephemeral key spaces may be erased and rebuilt on demand; persistent
    /// ones must survive reclaim operations.
    pub fn is_ephemeral(self) -> bool {
        match self {
            KeySpace::Blob | KeySpace::BlobMetadata | KeySpace::HgCommitToTree => true,
            KeySpace::Tree | KeySpace::HgProxyHash => false,
        }
    }

    pub(crate) fn table(self) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
        match self {
            KeySpace::Blob => BLOB,
            KeySpace::BlobMetadata => BLOB_METADATA,
            KeySpace::Tree => TREE,
            KeySpace::HgProxyHash => HG_PROXY_HASH,
            KeySpace::HgCommitToTree => HG_COMMIT_TO_TREE,
        }
    }
}
