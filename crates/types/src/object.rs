// Path: crates/types/src/object.rs

//! The git-compatible object model: trees, blobs, and blob metadata.
//!
//! This module is the canonical codec for everything the local store
//! persists. Serialization is git-compatible so that objects imported from a
//! source-control backend can be stored and re-served byte-exactly: a tree is
//! framed as `tree <len>\0` followed by `<octal mode> <name>\0<20-byte hash>`
//! entries sorted by name, and a blob is framed as `blob <len>\0<bytes>`.
//! Centralizing the codec here keeps every crate reading and writing the
//! exact same binary representation.

use bytes::Bytes;

use crate::hash::{Hash, HASH_LEN};
use crate::path::{PathComponent, PathError};

/// The exact persisted width of a [`BlobMetadata`] record.
pub const BLOB_METADATA_LEN: usize = 28;

/// Errors produced by the object codec.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// The `<kind> <len>\0` framing header was missing or malformed.
    #[error("malformed {kind} header")]
    MalformedHeader {
        /// The object kind being parsed, `tree` or `blob`.
        kind: &'static str,
    },
    /// The framing header's stated length did not match the body.
    #[error("{kind} length mismatch: header says {stated}, body is {actual}")]
    LengthMismatch {
        /// The object kind being parsed.
        kind: &'static str,
        /// The length stated in the header.
        stated: usize,
        /// The actual body length.
        actual: usize,
    },
    /// A tree entry carried a mode outside the four supported kinds.
    #[error("invalid mode {mode:o} in tree entry {name:?}")]
    InvalidMode {
        /// The offending mode bits.
        mode: u32,
        /// The entry name.
        name: String,
    },
    /// Tree entries were not in strictly ascending name order.
    #[error("tree entries out of order at {name:?}")]
    UnsortedEntries {
        /// The first out-of-order name.
        name: String,
    },
    /// Two tree entries shared a name.
    #[error("duplicate tree entry {name:?}")]
    DuplicateEntry {
        /// The duplicated name.
        name: String,
    },
    /// The object body ended before a complete entry was read.
    #[error("truncated {kind} object")]
    Truncated {
        /// The object kind being parsed.
        kind: &'static str,
    },
    /// An entry name failed path-component validation.
    #[error("invalid tree entry name")]
    InvalidName(#[from] PathError),
    /// A blob metadata record was not exactly 28 bytes.
    #[error("blob metadata must be 28 bytes, got {0}")]
    MetadataLength(usize),
}

/// The kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntryKind {
    /// A regular file, mode `100644`.
    Regular,
    /// An executable file, mode `100755`.
    Executable,
    /// A symbolic link, mode `120000`.
    Symlink,
    /// A sub-tree, mode `40000`.
    Tree,
}

impl EntryKind {
    /// Maps git mode bits to an entry kind. Only the four canonical modes
    /// are accepted.
    pub fn from_mode(mode: u32) -> Option<EntryKind> {
        match mode {
            0o100644 => Some(EntryKind::Regular),
            0o100755 => Some(EntryKind::Executable),
            0o120000 => Some(EntryKind::Symlink),
            0o040000 => Some(EntryKind::Tree),
            _ => None,
        }
    }

    /// The canonical git mode bits for this kind.
    pub fn mode(self) -> u32 {
        match self {
            EntryKind::Regular => 0o100644,
            EntryKind::Executable => 0o100755,
            EntryKind::Symlink => 0o120000,
            EntryKind::Tree => 0o040000,
        }
    }

    /// True for [`EntryKind::Tree`].
    pub fn is_tree(self) -> bool {
        matches!(self, EntryKind::Tree)
    }
}

/// One entry of a [`Tree`]: a name, mode bits, the child's hash, and a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// The name component; never contains `/` or `\0`.
    pub name: PathComponent,
    /// The raw mode bits as parsed, canonical for entries built in-process.
    pub mode: u32,
    /// The child object's hash.
    pub hash: Hash,
    /// The entry kind derived from the mode.
    pub kind: EntryKind,
}

impl TreeEntry {
    /// Builds an entry with the canonical mode for its kind.
    pub fn new(name: PathComponent, hash: Hash, kind: EntryKind) -> Self {
        TreeEntry {
            name,
            mode: kind.mode(),
            hash,
            kind,
        }
    }
}

/// An ordered sequence of entries, plus the hash the tree is known by.
///
/// The hash may be [`Hash::NULL`] for a tree built in memory that has not
/// been stored yet; the store computes the sha-1 of the serialized form on
/// write in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    hash: Hash,
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree, validating that entries are strictly sorted by name
    /// with no duplicates.
    pub fn new(hash: Hash, entries: Vec<TreeEntry>) -> Result<Self, ObjectError> {
        for pair in entries.windows(2) {
            match pair[0].name.as_bytes().cmp(pair[1].name.as_bytes()) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => {
                    return Err(ObjectError::DuplicateEntry {
                        name: pair[1].name.as_str().to_string(),
                    })
                }
                std::cmp::Ordering::Greater => {
                    return Err(ObjectError::UnsortedEntries {
                        name: pair[1].name.as_str().to_string(),
                    })
                }
            }
        }
        Ok(Tree { hash, entries })
    }

    /// The hash this tree is known by; [`Hash::NULL`] if not yet computed.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The entries in name order.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Finds an entry by exact name.
    pub fn find(&self, name: &PathComponent) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Serializes to the framed git form: `tree <len>\0` + entries.
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for entry in &self.entries {
            body.extend_from_slice(format!("{:o}", entry.mode).as_bytes());
            body.push(b' ');
            body.extend_from_slice(entry.name.as_bytes());
            body.push(b'\0');
            body.extend_from_slice(entry.hash.as_bytes());
        }
        let mut framed = Vec::with_capacity(body.len() + 16);
        framed.extend_from_slice(format!("tree {}\0", body.len()).as_bytes());
        framed.extend_from_slice(&body);
        framed
    }

    /// Parses the framed git form. `hash` is the key the bytes were fetched
    /// under and becomes the parsed tree's hash.
    pub fn deserialize(hash: Hash, data: &[u8]) -> Result<Self, ObjectError> {
        let body = strip_frame("tree", data)?;
        let mut entries = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or(ObjectError::Truncated { kind: "tree" })?;
            let mode_str = std::str::from_utf8(&rest[..space])
                .map_err(|_| ObjectError::Truncated { kind: "tree" })?;
            let mode = u32::from_str_radix(mode_str, 8)
                .map_err(|_| ObjectError::Truncated { kind: "tree" })?;
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == b'\0')
                .ok_or(ObjectError::Truncated { kind: "tree" })?;
            let name_str = std::str::from_utf8(&rest[..nul])
                .map_err(|_| ObjectError::Truncated { kind: "tree" })?
                .to_string();
            rest = &rest[nul + 1..];

            if rest.len() < HASH_LEN {
                return Err(ObjectError::Truncated { kind: "tree" });
            }
            let entry_hash = Hash::from_slice(&rest[..HASH_LEN])
                .map_err(|_| ObjectError::Truncated { kind: "tree" })?;
            rest = &rest[HASH_LEN..];

            let kind = EntryKind::from_mode(mode).ok_or_else(|| ObjectError::InvalidMode {
                mode,
                name: name_str.clone(),
            })?;
            entries.push(TreeEntry {
                name: PathComponent::new(name_str)?,
                mode,
                hash: entry_hash,
                kind,
            });
        }
        Tree::new(hash, entries)
    }
}

/// A possibly-chunked byte sequence plus the hash it is known by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    hash: Hash,
    chunks: Vec<Bytes>,
}

impl Blob {
    /// Builds a single-chunk blob.
    pub fn from_bytes(hash: Hash, bytes: impl Into<Bytes>) -> Self {
        Blob {
            hash,
            chunks: vec![bytes.into()],
        }
    }

    /// Builds a blob from native chunks, preserved as-is for scatter-gather
    /// writes.
    pub fn from_chunks(hash: Hash, chunks: Vec<Bytes>) -> Self {
        Blob { hash, chunks }
    }

    /// The hash this blob is known by; [`Hash::NULL`] if not yet computed.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The native chunks.
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Total content length over all chunks.
    pub fn total_len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// The sha-1 over the raw contents (not the framed form).
    pub fn content_hash(&self) -> Hash {
        Hash::digest_chunks(self.chunks.iter().map(|c| c.as_ref()))
    }

    /// The sha-1 over the framed form, which is the object id a blob is
    /// keyed by when its stated hash is [`Hash::NULL`].
    pub fn framed_hash(&self) -> Hash {
        let header = git_blob_header(self.total_len());
        Hash::digest_chunks(
            std::iter::once(header.as_slice()).chain(self.chunks.iter().map(|c| c.as_ref())),
        )
    }

    /// The blob's contents as one contiguous buffer. Single-chunk blobs are
    /// returned without copying.
    pub fn to_contiguous(&self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks[0].clone();
        }
        let mut buf = Vec::with_capacity(self.total_len() as usize);
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        Bytes::from(buf)
    }

    /// Serializes to the framed git form as one buffer. The store's write
    /// path avoids this and gathers the header plus native chunks instead.
    pub fn serialize(&self) -> Vec<u8> {
        let header = git_blob_header(self.total_len());
        let mut framed = Vec::with_capacity(header.len() + self.total_len() as usize);
        framed.extend_from_slice(&header);
        for chunk in &self.chunks {
            framed.extend_from_slice(chunk);
        }
        framed
    }

    /// Parses the framed git form fetched under `hash`.
    pub fn deserialize(hash: Hash, data: &[u8]) -> Result<Self, ObjectError> {
        let body = strip_frame("blob", data)?;
        Ok(Blob::from_bytes(hash, Bytes::copy_from_slice(body)))
    }
}

/// Renders the `blob <len>\0` framing header.
pub fn git_blob_header(len: u64) -> Vec<u8> {
    format!("blob {}\0", len).into_bytes()
}

/// Validates a `<kind> <len>\0` header and returns the body.
fn strip_frame<'a>(kind: &'static str, data: &'a [u8]) -> Result<&'a [u8], ObjectError> {
    let prefix_len = kind.len() + 1;
    if data.len() < prefix_len
        || &data[..kind.len()] != kind.as_bytes()
        || data[kind.len()] != b' '
    {
        return Err(ObjectError::MalformedHeader { kind });
    }
    let rest = &data[prefix_len..];
    let nul = rest
        .iter()
        .position(|&b| b == b'\0')
        .ok_or(ObjectError::MalformedHeader { kind })?;
    let len_str =
        std::str::from_utf8(&rest[..nul]).map_err(|_| ObjectError::MalformedHeader { kind })?;
    let stated: usize = len_str
        .parse()
        .map_err(|_| ObjectError::MalformedHeader { kind })?;
    let body = &rest[nul + 1..];
    if body.len() != stated {
        return Err(ObjectError::LengthMismatch {
            kind,
            stated,
            actual: body.len(),
        });
    }
    Ok(body)
}

/// The (content hash, size) pair persisted alongside each stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlobMetadata {
    /// The sha-1 over the blob's raw contents.
    pub content_hash: Hash,
    /// Total content length in bytes.
    pub size: u64,
}

impl BlobMetadata {
    /// Serializes to the fixed 28-byte form: 8-byte big-endian size followed
    /// by the 20-byte content hash.
    pub fn to_bytes(&self) -> [u8; BLOB_METADATA_LEN] {
        let mut out = [0u8; BLOB_METADATA_LEN];
        out[..8].copy_from_slice(&self.size.to_be_bytes());
        out[8..].copy_from_slice(self.content_hash.as_bytes());
        out
    }

    /// Parses the fixed 28-byte form, rejecting any other length.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ObjectError> {
        if data.len() != BLOB_METADATA_LEN {
            return Err(ObjectError::MetadataLength(data.len()));
        }
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&data[..8]);
        let content_hash = Hash::from_slice(&data[8..])
            .map_err(|_| ObjectError::MetadataLength(data.len()))?;
        Ok(BlobMetadata {
            content_hash,
            size: u64::from_be_bytes(size_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn component(name: &str) -> PathComponent {
        PathComponent::new(name).unwrap()
    }

    fn sample_tree() -> Tree {
        Tree::new(
            Hash::NULL,
            vec![
                TreeEntry::new(component("a"), Hash::digest(b"a"), EntryKind::Regular),
                TreeEntry::new(component("b"), Hash::digest(b"b"), EntryKind::Executable),
                TreeEntry::new(component("sub"), Hash::digest(b"sub"), EntryKind::Tree),
            ],
        )
        .unwrap()
    }

    #[test]
    fn tree_round_trip_preserves_entries() {
        let tree = sample_tree();
        let bytes = tree.serialize();
        let parsed = Tree::deserialize(Hash::digest(&bytes), &bytes).unwrap();
        assert_eq!(parsed.entries(), tree.entries());
    }

    #[test]
    fn tree_frame_header() {
        let tree = Tree::new(Hash::NULL, vec![]).unwrap();
        assert_eq!(tree.serialize(), b"tree 0\0");
    }

    #[test]
    fn tree_rejects_duplicates_and_disorder() {
        let dup = Tree::new(
            Hash::NULL,
            vec![
                TreeEntry::new(component("a"), Hash::NULL, EntryKind::Regular),
                TreeEntry::new(component("a"), Hash::NULL, EntryKind::Regular),
            ],
        );
        assert!(matches!(dup, Err(ObjectError::DuplicateEntry { .. })));

        let unsorted = Tree::new(
            Hash::NULL,
            vec![
                TreeEntry::new(component("b"), Hash::NULL, EntryKind::Regular),
                TreeEntry::new(component("a"), Hash::NULL, EntryKind::Regular),
            ],
        );
        assert!(matches!(unsorted, Err(ObjectError::UnsortedEntries { .. })));
    }

    #[test]
    fn tree_rejects_bad_framing() {
        assert!(matches!(
            Tree::deserialize(Hash::NULL, b"blob 0\0"),
            Err(ObjectError::MalformedHeader { kind: "tree" })
        ));
        assert!(matches!(
            Tree::deserialize(Hash::NULL, b"tree 5\0abc"),
            Err(ObjectError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn tree_rejects_gitlink_mode() {
        // 160000 commit entries are not part of the model.
        let mut bytes = Vec::new();
        let body = {
            let mut b = Vec::new();
            b.extend_from_slice(b"160000 dep\0");
            b.extend_from_slice(&[0u8; HASH_LEN]);
            b
        };
        bytes.extend_from_slice(format!("tree {}\0", body.len()).as_bytes());
        bytes.extend_from_slice(&body);
        assert!(matches!(
            Tree::deserialize(Hash::NULL, &bytes),
            Err(ObjectError::InvalidMode { .. })
        ));
    }

    #[test]
    fn blob_framing_and_hashes() {
        let blob = Blob::from_bytes(Hash::NULL, Bytes::from_static(b"hello"));
        assert_eq!(blob.serialize(), b"blob 5\0hello");
        assert_eq!(blob.total_len(), 5);
        assert_eq!(blob.content_hash(), Hash::digest(b"hello"));
        assert_eq!(blob.framed_hash(), Hash::digest(b"blob 5\0hello"));

        let parsed = Blob::deserialize(blob.framed_hash(), b"blob 5\0hello").unwrap();
        assert_eq!(parsed.to_contiguous(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn chunked_blob_matches_contiguous() {
        let chunked = Blob::from_chunks(
            Hash::NULL,
            vec![Bytes::from_static(b"he"), Bytes::from_static(b"llo")],
        );
        let whole = Blob::from_bytes(Hash::NULL, Bytes::from_static(b"hello"));
        assert_eq!(chunked.total_len(), 5);
        assert_eq!(chunked.content_hash(), whole.content_hash());
        assert_eq!(chunked.framed_hash(), whole.framed_hash());
        assert_eq!(chunked.serialize(), whole.serialize());
    }

    #[test]
    fn metadata_is_exactly_28_bytes() {
        let meta = BlobMetadata {
            content_hash: Hash::digest(b"x"),
            size: 4,
        };
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), BLOB_METADATA_LEN);
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 4]);
        assert_eq!(BlobMetadata::from_bytes(&bytes).unwrap(), meta);
        assert!(matches!(
            BlobMetadata::from_bytes(&bytes[..27]),
            Err(ObjectError::MetadataLength(27))
        ));
    }

    proptest! {
        #[test]
        fn blob_round_trip(contents in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let blob = Blob::from_bytes(Hash::NULL, Bytes::from(contents.clone()));
            let framed = blob.serialize();
            let parsed = Blob::deserialize(Hash::digest(&framed), &framed).unwrap();
            let contiguous = parsed.to_contiguous();
            prop_assert_eq!(contiguous.as_ref(), contents.as_slice());
        }

        #[test]
        fn tree_round_trip_random(names in proptest::collection::btree_set("[a-z]{1,12}", 0..24)) {
            let entries = names
                .iter()
                .map(|n| TreeEntry::new(
                    PathComponent::new(n.clone()).unwrap(),
                    Hash::digest(n.as_bytes()),
                    if n.len() % 2 == 0 { EntryKind::Regular } else { EntryKind::Tree },
                ))
                .collect::<Vec<_>>();
            let tree = Tree::new(Hash::NULL, entries).unwrap();
            let bytes = tree.serialize();
            let parsed = Tree::deserialize(Hash::NULL, &bytes).unwrap();
            prop_assert_eq!(parsed.entries(), tree.entries());
        }
    }
}
