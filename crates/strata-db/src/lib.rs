//! Strata DB Library
//!
//! Durable persistence for download, migration and tiering tasks.

pub mod db;

pub use db::{
    setup_database, DownloadTaskStore, MemoryTaskStore, MigrationTaskStore, PgTaskStore,
    TaskStore, TieringRecordStore, UploadCredentialStore,
};
