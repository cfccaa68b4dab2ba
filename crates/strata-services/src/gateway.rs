//! Data transfer gateway
//!
//! Single entry point from the orchestrators into the backends. Resolves the
//! backend for a transfer type, authenticates the archive's system account and
//! caches the token in the invocation context so repeated calls within one
//! request reuse it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use strata_core::models::{ArchiveConfiguration, FileLocation};
use strata_core::{AppError, DataTransferType};
use strata_transfer::{
    AuthToken, BackendRegistry, DownloadRequest, PathAttributes, TieringPolicy, TransferBackend,
    TransferError, TransferProgressListener, TransferResponse, TransferStatusReport,
    UploadRequest,
};

use crate::context::InvocationContext;
use crate::locator::ArchiveConfigurationLocator;

#[derive(Clone)]
pub struct DataTransferService {
    registry: Arc<BackendRegistry>,
    locator: Arc<ArchiveConfigurationLocator>,
}

impl DataTransferService {
    pub fn new(registry: Arc<BackendRegistry>, locator: Arc<ArchiveConfigurationLocator>) -> Self {
        Self { registry, locator }
    }

    pub fn locator(&self) -> &ArchiveConfigurationLocator {
        &self.locator
    }

    pub fn backend(
        &self,
        transfer_type: DataTransferType,
    ) -> Result<Arc<dyn TransferBackend>, AppError> {
        Ok(self.registry.get(transfer_type)?)
    }

    pub fn supports(&self, transfer_type: DataTransferType) -> bool {
        self.registry.supports(transfer_type)
    }

    /// Token for `archive` on the `transfer_type` backend, from the context
    /// cache or a fresh authentication. Failed authentications are not cached.
    pub async fn token(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
    ) -> Result<AuthToken, AppError> {
        if let Some(token) = ctx.tokens().get(transfer_type, &archive.id) {
            return Ok(token);
        }

        let backend = self.backend(transfer_type)?;
        let token = backend.authenticate(archive).await.map_err(|e| match e {
            TransferError::AuthenticationFailed(msg) => AppError::BackendAuthenticationFailed(msg),
            other => AppError::BackendAuthenticationFailed(format!(
                "{} authentication for archive {} failed: {}",
                transfer_type, archive.id, other
            )),
        })?;
        tracing::debug!(
            backend = %transfer_type,
            archive_id = %archive.id,
            "Authenticated backend system account"
        );
        ctx.tokens().insert(token.clone());
        Ok(token)
    }

    pub async fn accepts_transfer_requests(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
    ) -> Result<bool, AppError> {
        let token = self.token(ctx, transfer_type, archive).await?;
        Ok(self
            .backend(transfer_type)?
            .accepts_transfer_requests(&token)
            .await?)
    }

    pub async fn upload(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
        request: &UploadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> Result<TransferResponse, AppError> {
        let token = self.token(ctx, transfer_type, archive).await?;
        Ok(self
            .backend(transfer_type)?
            .upload_data_object(&token, request, listener)
            .await?)
    }

    pub async fn download(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
        request: &DownloadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> Result<TransferResponse, AppError> {
        let token = self.token(ctx, transfer_type, archive).await?;
        Ok(self
            .backend(transfer_type)?
            .download_data_object(&token, request, listener)
            .await?)
    }

    pub async fn delete(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
        location: &FileLocation,
    ) -> Result<(), AppError> {
        let token = self.token(ctx, transfer_type, archive).await?;
        Ok(self
            .backend(transfer_type)?
            .delete_data_object(&token, location)
            .await?)
    }

    pub async fn path_attributes(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
        location: &FileLocation,
        want_size: bool,
    ) -> Result<PathAttributes, AppError> {
        let token = self.token(ctx, transfer_type, archive).await?;
        Ok(self
            .backend(transfer_type)?
            .get_path_attributes(&token, location, want_size)
            .await?)
    }

    pub async fn transfer_status(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
        request_id: &str,
    ) -> Result<TransferStatusReport, AppError> {
        let token = self.token(ctx, transfer_type, archive).await?;
        Ok(self
            .backend(transfer_type)?
            .get_transfer_status(&token, request_id)
            .await?)
    }

    pub async fn transfer_size(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
        request_id: &str,
    ) -> Result<u64, AppError> {
        let token = self.token(ctx, transfer_type, archive).await?;
        Ok(self
            .backend(transfer_type)?
            .get_transfer_size(&token, request_id)
            .await?)
    }

    pub async fn set_tiering_policy(
        &self,
        ctx: &InvocationContext,
        archive: &ArchiveConfiguration,
        policy: &TieringPolicy,
    ) -> Result<(), AppError> {
        let token = self.token(ctx, archive.transfer_type, archive).await?;
        Ok(self
            .backend(archive.transfer_type)?
            .set_tiering_policy(&token, policy)
            .await?)
    }

    pub async fn generate_download_url(
        &self,
        ctx: &InvocationContext,
        archive: &ArchiveConfiguration,
        location: &FileLocation,
        expires_in: Duration,
    ) -> Result<String, AppError> {
        let token = self.token(ctx, archive.transfer_type, archive).await?;
        Ok(self
            .backend(archive.transfer_type)?
            .generate_download_url(&token, location, expires_in)
            .await?)
    }

    pub async fn add_archive_metadata(
        &self,
        ctx: &InvocationContext,
        archive: &ArchiveConfiguration,
        location: &FileLocation,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        let token = self.token(ctx, archive.transfer_type, archive).await?;
        Ok(self
            .backend(archive.transfer_type)?
            .add_archive_metadata(&token, location, metadata)
            .await?)
    }
}
