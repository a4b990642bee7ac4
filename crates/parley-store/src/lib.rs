//! # parley-store
//!
//! Versioned checkpoint persistence for conversation threads.
//!
//! [`CheckpointStore`] is the seam the orchestrator writes through. Every
//! `put` is a compare-and-swap on the checkpoint version, so two writers
//! racing on one thread cannot both win.
//!
//! - [`InMemoryCheckpointStore`]: process-local, backed by `DashMap`
//! - [`SqliteCheckpointStore`]: durable, one transaction per `put`

#![deny(unsafe_code)]

pub mod checkpoint;
pub mod database;
pub mod error;
pub mod memory;
pub mod row_helpers;
pub mod schema;
pub mod sqlite;

pub use checkpoint::CheckpointStore;
pub use database::Database;
pub use error::StoreError;
pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
