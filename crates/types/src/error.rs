// Path: crates/types/src/error.rs

//! Core error types for the Canopy virtual filesystem.
//!
//! The taxonomy is deliberately small and closed: every failure a kernel
//! request can observe is one of the [`FsError`] kinds, and each kind has a
//! fixed mapping to a kernel error number. Store-layer failures live in
//! [`StoreError`] and are folded into the taxonomy at the boundary (absence
//! becomes `NotFound`, malformed persisted records become `Parse`).

use thiserror::Error;

use crate::inode::InodeNumber;

/// Kernel error numbers used by the fixed [`KernelErrno`] mapping.
pub mod errno {
    /// No such file or directory.
    pub const ENOENT: i32 = 2;
    /// I/O error.
    pub const EIO: i32 = 5;
    /// Permission denied.
    pub const EACCES: i32 = 13;
    /// File exists.
    pub const EEXIST: i32 = 17;
    /// Not a directory.
    pub const ENOTDIR: i32 = 20;
    /// Is a directory.
    pub const EISDIR: i32 = 21;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// Function not implemented.
    pub const ENOSYS: i32 = 38;
    /// Directory not empty.
    pub const ENOTEMPTY: i32 = 39;
    /// No data available (no such extended attribute).
    pub const ENODATA: i32 = 61;
    /// Stale file handle.
    pub const ESTALE: i32 = 116;
}

/// A trait for assigning the stable kernel error number to an error.
pub trait KernelErrno {
    /// The fixed kernel error number for this error.
    fn errno(&self) -> i32;
}

/// The closed error taxonomy surfaced to the kernel-protocol layer.
#[derive(Debug, Error)]
pub enum FsError {
    /// The named entry or inode number does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The name already exists in the parent's effective children.
    #[error("already exists: {0}")]
    Exists(String),
    /// A directory operation was applied to a non-directory.
    #[error("not a directory: inode {0}")]
    NotADirectory(InodeNumber),
    /// A file operation was applied to a directory.
    #[error("is a directory: inode {0}")]
    IsADirectory(InodeNumber),
    /// A directory being removed or overwritten still has children.
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    /// The request arguments were malformed or unsatisfiable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The caller's identity does not permit the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// An underlying storage or overlay failure.
    #[error("io error: {0}")]
    Io(String),
    /// The inode number references an entry that has been reaped.
    #[error("stale inode {0}")]
    StaleInode(InodeNumber),
    /// The operation is not supported by this mount.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// A persisted record failed to parse; fatal for the request only.
    #[error("parse error: {0}")]
    Parse(String),
    /// An internal invariant was violated; logged, never process-fatal.
    #[error("internal error: {0}")]
    Internal(String),
    /// The requested extended attribute is not defined.
    #[error("no such attribute: {0}")]
    NoAttribute(String),
}

impl KernelErrno for FsError {
    fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => errno::ENOENT,
            FsError::Exists(_) => errno::EEXIST,
            FsError::NotADirectory(_) => errno::ENOTDIR,
            FsError::IsADirectory(_) => errno::EISDIR,
            FsError::NotEmpty(_) => errno::ENOTEMPTY,
            FsError::InvalidArgument(_) => errno::EINVAL,
            FsError::PermissionDenied(_) => errno::EACCES,
            FsError::Io(_) => errno::EIO,
            FsError::StaleInode(_) => errno::ESTALE,
            FsError::Unsupported(_) => errno::ENOSYS,
            FsError::Parse(_) => errno::EIO,
            FsError::Internal(_) => errno::EIO,
            FsError::NoAttribute(_) => errno::ENODATA,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        FsError::Io(err.to_string())
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Decode { .. } => FsError::Parse(err.to_string()),
            other => FsError::Io(other.to_string()),
        }
    }
}

/// Errors produced by the local store and object store facade.
///
/// A missing key is not an error; reads return `Option`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A failure in the underlying key-value engine.
    #[error("backend error: {0}")]
    Backend(String),
    /// A value could not be serialized for storage.
    #[error("encode error: {0}")]
    Encode(String),
    /// A persisted value under `key` failed to parse.
    #[error("decode error for key {key}: {reason}")]
    Decode {
        /// The offending key, hex-rendered.
        key: String,
        /// What the parser rejected.
        reason: String,
    },
}

impl StoreError {
    /// Wraps an object-codec failure, naming the offending key.
    pub fn decode(key: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        StoreError::Decode {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_table_is_fixed() {
        assert_eq!(FsError::NotFound("x".into()).errno(), errno::ENOENT);
        assert_eq!(FsError::Exists("x".into()).errno(), errno::EEXIST);
        assert_eq!(
            FsError::NotADirectory(InodeNumber::ROOT).errno(),
            errno::ENOTDIR
        );
        assert_eq!(
            FsError::IsADirectory(InodeNumber::ROOT).errno(),
            errno::EISDIR
        );
        assert_eq!(FsError::NotEmpty("x".into()).errno(), errno::ENOTEMPTY);
        assert_eq!(FsError::InvalidArgument("x".into()).errno(), errno::EINVAL);
        assert_eq!(FsError::PermissionDenied("x".into()).errno(), errno::EACCES);
        assert_eq!(FsError::Io("x".into()).errno(), errno::EIO);
        assert_eq!(
            FsError::StaleInode(InodeNumber::new(9)).errno(),
            errno::ESTALE
        );
        assert_eq!(FsError::Unsupported("x").errno(), errno::ENOSYS);
        assert_eq!(FsError::Parse("x".into()).errno(), errno::EIO);
        assert_eq!(FsError::Internal("x".into()).errno(), errno::EIO);
        assert_eq!(FsError::NoAttribute("x".into()).errno(), errno::ENODATA);
    }

    #[test]
    fn store_decode_errors_surface_as_parse() {
        let err: FsError = StoreError::decode("abcd", "metadata must be 28 bytes").into();
        assert!(matches!(err, FsError::Parse(_)));
        assert_eq!(err.errno(), errno::EIO);

        let err: FsError = StoreError::Backend("redb".into()).into();
        assert!(matches!(err, FsError::Io(_)));
    }

    #[test]
    fn decode_error_names_the_key() {
        let err = StoreError::decode("deadbeef", "truncated");
        assert!(err.to_string().contains("deadbeef"));
    }
}
