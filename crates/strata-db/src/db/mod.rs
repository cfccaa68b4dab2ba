//! Task store for the data-movement control plane
//!
//! `store` holds the contracts, `postgres` the durable implementation and
//! `memory` an in-process one.
//
// Store traits
pub mod store;
//
// Implementations
pub mod memory;
pub mod postgres;
//
// Transaction utilities
pub mod transaction;

pub use memory::MemoryTaskStore;
pub use postgres::{setup_database, PgTaskStore};
pub use store::{
    DownloadTaskStore, MigrationTaskStore, TaskStore, TieringRecordStore, UploadCredentialStore,
};
