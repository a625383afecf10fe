// Path: crates/store/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Persistent column-family object storage (redb) for the Canopy virtual
//! filesystem. This crate provides the local content-addressed store — one
//! redb table per key space, with typed get/put protocols for trees, blobs,
//! and blob metadata — plus the object-store facade that layers the local
//! store over a backing importer.

pub mod keyspace;
pub mod local_store;
pub mod memory;
pub mod object_store;

pub use keyspace::KeySpace;
pub use local_store::{LocalStore, WriteBatch};
pub use object_store::LocalObjectStore;
