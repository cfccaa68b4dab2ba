//! Strata Transfer Library
//!
//! Transfer backend abstraction and the object store, managed endpoint and
//! filesystem implementations.
//!
//! # Locations
//!
//! Every backend addresses data as a [`FileLocation`](strata_core::models::FileLocation):
//! a container (bucket, endpoint id or filesystem root) plus a file id. Object
//! store keys never start with `/`; filesystem ids may not contain `..`.

pub mod factory;
#[cfg(feature = "backend-globus")]
pub mod globus;
pub mod listener;
#[cfg(feature = "backend-posix")]
pub mod posix;
#[cfg(feature = "backend-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::{create_default_registry, BackendRegistry};
#[cfg(feature = "backend-globus")]
pub use globus::GlobusBackend;
pub use listener::{BackgroundTransfers, ProgressTracker, TransferProgressListener};
#[cfg(feature = "backend-posix")]
pub use posix::PosixBackend;
#[cfg(feature = "backend-s3")]
pub use s3::S3Backend;
pub use traits::{
    AuthToken, DownloadRequest, DownloadTarget, PathAttributes, TieringPolicy, TransferBackend,
    TransferError, TransferResponse, TransferResult, TransferStatusReport, UploadRequest,
};
