//! Strata Core Library
//!
//! Domain models, error types, configuration and collaborator contracts shared
//! by every Strata crate.

pub mod config;
pub mod encryption;
pub mod error;
pub mod hooks;
pub mod models;
pub mod transfer_types;

pub use config::{BaseConfig, Config, TransferConfig};
pub use encryption::EncryptionService;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use hooks::{
    CredentialRevoker, EventEmitter, NamespaceIdentity, NamespaceProxy, NoOpCredentialRevoker,
    NoOpEventEmitter, PathKind,
};
pub use transfer_types::{ArchiveProvider, DataTransferType, TIERING_PROVIDERS};
