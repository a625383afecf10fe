// Path: crates/types/src/hash.rs

//! Fixed-width content identifiers for the object model.
//!
//! Equality, ordering, and hex rendering are purely byte-wise. The
//! distinguished all-zero hash means "unknown / not yet computed"; store
//! write paths compute the sha-1 of the serialized form in that case.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// The width of a content identifier in bytes.
pub const HASH_LEN: usize = 20;

/// A 20-byte content identifier over the git-framed form of an object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LEN]);

/// Errors produced when constructing a [`Hash`] from external input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    /// The input slice was not exactly [`HASH_LEN`] bytes.
    #[error("hash must be 20 bytes, got {0}")]
    InvalidLength(usize),
    /// The input string was not exactly 40 lowercase or uppercase hex digits.
    #[error("invalid hex hash: {0}")]
    InvalidHex(String),
}

impl Hash {
    /// The distinguished zero hash, meaning "unknown / uncomputed".
    pub const NULL: Hash = Hash([0u8; HASH_LEN]);

    /// Constructs a hash from a fixed-width byte array.
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    /// Constructs a hash from a slice, failing unless it is exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        let arr: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Hash(arr))
    }

    /// Parses a 40-digit hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|_| HashError::InvalidHex(s.to_string()))?;
        Self::from_slice(&bytes).map_err(|_| HashError::InvalidHex(s.to_string()))
    }

    /// Renders the hash as a 40-digit lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// True for the distinguished zero hash.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// Computes the sha-1 of a single contiguous byte slice.
    pub fn digest(data: &[u8]) -> Self {
        Self::digest_chunks([data])
    }

    /// Computes the sha-1 of a sequence of chunks, hashed as if concatenated.
    ///
    /// This is the scatter-gather form used when hashing a framed object
    /// (header + body chunks) without assembling an intermediate buffer.
    pub fn digest_chunks<'a, I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hasher = Sha1::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        Hash(hasher.finalize().into())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}
