//! Contracts for collaborators that live outside the control plane
//!
//! The namespace/catalog, the notification subsystem and the identity provider
//! are consumed through these traits. `strata-infra` provides the production
//! implementations; tests plug in mocks.

use async_trait::async_trait;

use crate::models::{
    CollectionListing, SystemGeneratedMetadata, SystemMetadataUpdate, TransferEvent,
};
use crate::AppError;

/// Identity a namespace call runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamespaceIdentity {
    User(String),
    /// Elevated system account, used for metadata the caller may not edit
    System(String),
}

impl NamespaceIdentity {
    pub fn id(&self) -> &str {
        match self {
            NamespaceIdentity::User(id) | NamespaceIdentity::System(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    DataObject,
    Collection,
}

/// Narrow view of the hierarchical namespace.
#[async_trait]
pub trait NamespaceProxy: Send + Sync {
    async fn authenticate(&self, identity: &NamespaceIdentity) -> Result<(), AppError>;

    /// `None` when nothing exists at `path`.
    async fn path_kind(&self, path: &str) -> Result<Option<PathKind>, AppError>;

    async fn absolute_path(&self, path: &str) -> Result<String, AppError>;

    async fn relative_path(&self, absolute_path: &str) -> Result<String, AppError>;

    async fn get_system_generated_metadata(
        &self,
        path: &str,
    ) -> Result<SystemGeneratedMetadata, AppError>;

    async fn update_system_generated_metadata(
        &self,
        identity: &NamespaceIdentity,
        path: &str,
        update: SystemMetadataUpdate,
    ) -> Result<(), AppError>;

    async fn list_collection(&self, path: &str) -> Result<CollectionListing, AppError>;

    async fn path_exists(&self, path: &str) -> Result<bool, AppError> {
        Ok(self.path_kind(path).await?.is_some())
    }

    async fn is_collection(&self, path: &str) -> Result<bool, AppError> {
        Ok(self.path_kind(path).await? == Some(PathKind::Collection))
    }

    async fn is_data_object(&self, path: &str) -> Result<bool, AppError> {
        Ok(self.path_kind(path).await? == Some(PathKind::DataObject))
    }
}

/// Terminal notifications. Callers log emission failures and carry on.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: TransferEvent) -> Result<(), AppError>;
}

/// Revokes delegated source credentials after a failed upload.
#[async_trait]
pub trait CredentialRevoker: Send + Sync {
    async fn revoke(&self, token: &str) -> Result<(), AppError>;
}

/// Emitter used when notifications are disabled
pub struct NoOpEventEmitter;

#[async_trait]
impl EventEmitter for NoOpEventEmitter {
    async fn emit(&self, _event: TransferEvent) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct NoOpCredentialRevoker;

#[async_trait]
impl CredentialRevoker for NoOpCredentialRevoker {
    async fn revoke(&self, _token: &str) -> Result<(), AppError> {
        Ok(())
    }
}
