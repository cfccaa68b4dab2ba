//! Test helpers for orchestrator tests
//!
//! Mock backend, mock namespace and recording collaborators wired into a
//! [`TestHarness`] over the in-memory task store. No database, network or
//! object store is needed.

pub mod fixtures;
pub mod mock_backend;
pub mod mock_namespace;

pub use fixtures::*;
pub use mock_backend::MockBackend;
pub use mock_namespace::{MockNamespace, RecordingEmitter, RecordingRevoker};
