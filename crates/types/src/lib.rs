// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Canopy Types
//!
//! This crate is the foundational library for the Canopy virtual filesystem,
//! containing the object model (hashes, trees, blobs), path components, inode
//! numbering, and the error taxonomy shared by every other crate.
//!
//! ## Architectural Role
//!
//! As the base crate, `canopy-types` has minimal dependencies and is itself a
//! dependency for almost every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like [`Hash`](hash::Hash), [`Tree`](object::Tree),
//! [`InodeNumber`](inode::InodeNumber), and the error enums.

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::FsError> = std::result::Result<T, E>;

/// The full error taxonomy: filesystem errors with their kernel errno mapping
/// and store errors for the persistence layer.
pub mod error;
/// The fixed-width 20-byte content identifier and its hex rendering.
pub mod hash;
/// Inode numbers, child descriptors, and kernel-visible attribute records.
pub mod inode;
/// The git-compatible object model: trees, blobs, and blob metadata.
pub mod object;
/// Validated path components and repository-relative paths.
pub mod path;
