// Path: crates/api/src/lib.rs

//! # Canopy API Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free, and well-documented code. Panics are disallowed in non-test
//! code to promote robust error handling.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
#![deny(missing_docs)]

//! # Canopy API
//!
//! Core traits and interfaces for the Canopy virtual filesystem. This crate
//! defines the stable contract between the inode engine and its external
//! collaborators: the object store, the overlay, the kernel-protocol
//! transport, and the management endpoint.

/// Contract types exposed to the management collaborator.
pub mod management;
/// Resolving logical object ids to parsed trees and blobs.
pub mod object_store;
/// Per-inode typed storage for user mutations.
pub mod overlay;
/// Decoded kernel-protocol requests and shaped replies.
pub mod protocol;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::object_store::{BackingStore, ObjectStore};
    pub use crate::overlay::Overlay;
    pub use crate::protocol::{FsReply, FsRequest, ReplyAttr, ReplyEntry, RequestContext};
    pub use canopy_types::error::{FsError, KernelErrno, StoreError};
}
