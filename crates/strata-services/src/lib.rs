//! Strata Services Layer
//!
//! Orchestrators for upload, download, migration and tiering. Each one works
//! against the task store, the transfer gateway and the namespace proxy held in
//! a shared [`ServiceState`], and takes an [`InvocationContext`] per call.

pub mod claims;
pub mod context;
pub mod download;
pub mod gateway;
pub mod locator;
pub mod migration;
pub mod state;
pub mod tiering;
pub mod upload;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use claims::{InFlightTasks, TaskClaim};
pub use context::{InvocationContext, TokenCache};
pub use download::DownloadService;
pub use gateway::DataTransferService;
pub use locator::ArchiveConfigurationLocator;
pub use migration::MigrationService;
pub use state::{ServiceSettings, ServiceState};
pub use tiering::TieringService;
pub use upload::UploadService;
