//! Upload orchestration
//!
//! The source field that is populated picks the backend: a remote endpoint
//! location goes through the managed endpoint family, an attached local file
//! through the object store. A saturated backend queues the request instead of
//! failing it. Large local files and managed endpoint transfers complete
//! asynchronously; their outcome lands in the object's system metadata.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use strata_core::models::{
    ArchiveConfiguration, DataObjectUploadRequest, DataTransferStatus, FileLocation,
    SystemMetadataUpdate, TransferEvent, TransferEventKind, UploadResponse, UploadSource,
    UploadStatus,
};
use strata_core::{AppError, DataTransferType, NamespaceIdentity};
use strata_db::UploadCredentialStore;
use strata_transfer::{TransferProgressListener, TransferStatusReport, UploadRequest};

use crate::context::InvocationContext;
use crate::state::ServiceState;

pub(crate) const METADATA_PATH: &str = "strata-path";
pub(crate) const METADATA_USER: &str = "strata-user";
pub(crate) const METADATA_OBJECT_ID: &str = "strata-object-id";

/// The object an upload writes, as recorded in its system metadata.
#[derive(Debug, Clone)]
struct UploadTarget {
    path: String,
    user_id: String,
    archive_location: FileLocation,
}

impl UploadTarget {
    fn identity(&self) -> NamespaceIdentity {
        NamespaceIdentity::User(self.user_id.clone())
    }
}

async fn record_archived(
    state: &ServiceState,
    target: &UploadTarget,
    bytes_transferred: Option<u64>,
    checksum: Option<String>,
) -> Result<(), AppError> {
    let update = SystemMetadataUpdate {
        checksum,
        source_size: bytes_transferred,
        data_transfer_percent_complete: Some(100),
        data_transfer_completed: Some(Utc::now()),
        ..SystemMetadataUpdate::status(DataTransferStatus::Archived)
    };
    state
        .namespace
        .update_system_generated_metadata(&target.identity(), &target.path, update)
        .await?;

    tracing::info!(
        path = %target.path,
        archive_location = %target.archive_location,
        bytes = ?bytes_transferred,
        "Upload archived"
    );
    state
        .emit(
            TransferEvent::new(TransferEventKind::UploadArchived, &target.user_id, &target.path)
                .with_destination(target.archive_location.clone()),
        )
        .await;
    Ok(())
}

async fn record_failed(
    state: &ServiceState,
    target: &UploadTarget,
    message: &str,
) -> Result<(), AppError> {
    state
        .namespace
        .update_system_generated_metadata(
            &target.identity(),
            &target.path,
            SystemMetadataUpdate::status(DataTransferStatus::Failed),
        )
        .await?;

    tracing::error!(path = %target.path, error = %message, "Upload failed");
    state
        .emit(
            TransferEvent::new(TransferEventKind::UploadFailed, &target.user_id, &target.path)
                .with_destination(target.archive_location.clone())
                .with_message(message),
        )
        .await;
    Ok(())
}

/// Revoke a delegated source credential. Failures are logged only.
async fn revoke_source_token(state: &ServiceState, path: &str, token: &str) {
    if let Err(e) = state.revoker.revoke(token).await {
        tracing::warn!(path = %path, error = %e, "Failed to revoke source access token");
    }
}

/// Completion handler for a backgrounded upload.
struct UploadListener {
    state: ServiceState,
    target: UploadTarget,
    size: Option<u64>,
    source_access_token: Option<String>,
    finished: AtomicBool,
}

#[async_trait]
impl TransferProgressListener for UploadListener {
    async fn progressed(&self, bytes_transferred: u64) {
        let Some(size) = self.size.filter(|size| *size > 0) else {
            return;
        };
        let percent = (bytes_transferred.min(size) * 100 / size) as u8;
        let update = SystemMetadataUpdate {
            data_transfer_percent_complete: Some(percent),
            ..Default::default()
        };
        if let Err(e) = self
            .state
            .namespace
            .update_system_generated_metadata(&self.target.identity(), &self.target.path, update)
            .await
        {
            tracing::debug!(
                path = %self.target.path,
                error = %e,
                "Failed to record upload progress"
            );
        }
    }

    async fn completed(&self, bytes_transferred: u64) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = record_archived(&self.state, &self.target, Some(bytes_transferred), None).await
        {
            tracing::error!(
                path = %self.target.path,
                error = %e,
                "Failed to record archived upload"
            );
        }
    }

    async fn failed(&self, message: String) {
        if self.finished.swap(true, Ordering::SeqCst) {
            tracing::warn!(path = %self.target.path, "Duplicate upload failure ignored");
            return;
        }
        if let Some(token) = &self.source_access_token {
            revoke_source_token(&self.state, &self.target.path, token).await;
        }
        if let Err(e) = record_failed(&self.state, &self.target, &message).await {
            tracing::error!(path = %self.target.path, error = %e, "Failed to record failed upload");
        }
    }
}

#[derive(Clone)]
pub struct UploadService {
    state: ServiceState,
}

impl UploadService {
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    #[tracing::instrument(skip(self, ctx, request), fields(path = %request.path, user_id = %ctx.user_id()))]
    pub async fn upload(
        &self,
        ctx: &InvocationContext,
        request: &DataObjectUploadRequest,
    ) -> Result<UploadResponse, AppError> {
        if request.path.trim().is_empty() {
            return Err(AppError::InvalidRequest("No upload path was provided".to_string()));
        }
        let source = request.source()?;
        let transfer_type = request.transfer_type()?;

        let locator = self.state.gateway.locator();
        let doc = locator.data_management(&request.configuration_id)?;
        let archive = locator.upload_archive(doc, transfer_type)?.clone();

        let size = self
            .validate_source(ctx, transfer_type, &archive, &source)
            .await?;
        let archive_location = archive.archive_location(&request.path);

        let mut response = UploadResponse {
            path: request.path.clone(),
            user_id: request.user_id.clone(),
            caller_object_id: request.caller_object_id.clone(),
            source_location: request.source_location.clone(),
            source_file: request.source_file.clone(),
            archive_configuration_id: archive.id.clone(),
            archive_location: archive_location.clone(),
            backend_type: transfer_type,
            status: UploadStatus::Received,
            data_transfer_request_id: None,
            checksum: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        if !self
            .state
            .gateway
            .accepts_transfer_requests(ctx, transfer_type, &archive)
            .await?
        {
            tracing::info!(
                backend = %transfer_type,
                archive_id = %archive.id,
                "Backend saturated, upload queued"
            );
            return Ok(response);
        }

        let target = UploadTarget {
            path: request.path.clone(),
            user_id: request.user_id.clone(),
            archive_location: archive_location.clone(),
        };
        self.state
            .namespace
            .update_system_generated_metadata(
                &target.identity(),
                &target.path,
                SystemMetadataUpdate {
                    archive_location: Some(archive_location.clone()),
                    s3_archive_configuration_id: Some(archive.id.clone()),
                    data_transfer_type: Some(transfer_type),
                    source_size: size,
                    ..SystemMetadataUpdate::status(DataTransferStatus::InProgressToArchive)
                },
            )
            .await?;

        let streamed = matches!(source, UploadSource::LocalFile(_))
            && size.is_some_and(|s| s >= self.state.settings.streaming_upload_threshold_bytes);
        let listener: Option<Arc<dyn TransferProgressListener>> = if streamed {
            Some(Arc::new(UploadListener {
                state: self.state.clone(),
                target: target.clone(),
                size,
                source_access_token: request.source_access_token.clone(),
                finished: AtomicBool::new(false),
            }))
        } else {
            None
        };

        let upload = UploadRequest {
            source,
            destination: archive_location,
            size,
            metadata: provenance_metadata(request),
        };
        let transfer = match self
            .state
            .gateway
            .upload(ctx, transfer_type, &archive, &upload, listener)
            .await
        {
            Ok(transfer) => transfer,
            Err(e) => {
                if let Some(token) = &request.source_access_token {
                    revoke_source_token(&self.state, &target.path, token).await;
                }
                if let Err(record_err) = record_failed(&self.state, &target, &e.to_string()).await {
                    tracing::error!(
                        path = %target.path,
                        error = %record_err,
                        "Failed to record failed upload"
                    );
                }
                return Err(e);
            }
        };

        if transfer.completed {
            record_archived(
                &self.state,
                &target,
                transfer.bytes_transferred.or(size),
                transfer.checksum.clone(),
            )
            .await?;
            response.status = UploadStatus::Completed;
            response.checksum = transfer.checksum;
            response.completed_at = Some(Utc::now());
        } else {
            if let Some(request_id) = &transfer.request_id {
                self.state
                    .namespace
                    .update_system_generated_metadata(
                        &target.identity(),
                        &target.path,
                        SystemMetadataUpdate {
                            data_transfer_request_id: Some(request_id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            // The listener holds the token of a streamed upload; polled uploads
            // read it back when they turn out failed.
            if let (false, Some(token)) = (streamed, &request.source_access_token) {
                self.state
                    .store
                    .save_upload_source_token(&target.path, token)
                    .await?;
            }
            tracing::info!(request_id = ?transfer.request_id, streamed, "Upload in progress");
            response.status = UploadStatus::InProgress;
            response.data_transfer_request_id = transfer.request_id;
        }
        Ok(response)
    }

    /// Poll the backend for an upload that completes asynchronously and record
    /// its outcome once terminal.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn refresh_upload_status(
        &self,
        ctx: &InvocationContext,
        path: &str,
    ) -> Result<UploadStatus, AppError> {
        let metadata = self.state.namespace.get_system_generated_metadata(path).await?;
        match metadata.data_transfer_status {
            DataTransferStatus::Received => return Ok(UploadStatus::Received),
            DataTransferStatus::Failed => return Ok(UploadStatus::Failed),
            DataTransferStatus::Archived | DataTransferStatus::MigrationInProgress => {
                return Ok(UploadStatus::Completed)
            }
            DataTransferStatus::InProgressToArchive => {}
        }
        let Some(request_id) = metadata.data_transfer_request_id.clone() else {
            return Ok(UploadStatus::InProgress);
        };

        let archive = self
            .state
            .gateway
            .locator()
            .archive(&metadata.s3_archive_configuration_id)?
            .clone();
        let target = UploadTarget {
            path: path.to_string(),
            user_id: metadata.registrar_id.clone(),
            archive_location: metadata.archive_location.clone(),
        };

        let report = self
            .state
            .gateway
            .transfer_status(ctx, metadata.data_transfer_type, &archive, &request_id)
            .await?;
        match report {
            TransferStatusReport::InProgress { percent_complete } => {
                if let Some(percent) = percent_complete {
                    self.state
                        .namespace
                        .update_system_generated_metadata(
                            &target.identity(),
                            path,
                            SystemMetadataUpdate {
                                data_transfer_percent_complete: Some(percent),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                Ok(UploadStatus::InProgress)
            }
            TransferStatusReport::Completed { bytes_transferred } => {
                let bytes = match bytes_transferred {
                    Some(bytes) => Some(bytes),
                    None => self
                        .state
                        .gateway
                        .transfer_size(ctx, metadata.data_transfer_type, &archive, &request_id)
                        .await
                        .ok(),
                };
                record_archived(&self.state, &target, bytes, None).await?;
                self.state.store.take_upload_source_token(path).await?;
                Ok(UploadStatus::Completed)
            }
            TransferStatusReport::Failed { message } => {
                if let Some(token) = self.state.store.take_upload_source_token(path).await? {
                    revoke_source_token(&self.state, path, &token).await;
                }
                record_failed(&self.state, &target, &message).await?;
                Ok(UploadStatus::Failed)
            }
        }
    }

    /// Check a source before any transfer is issued; returns its size when known.
    async fn validate_source(
        &self,
        ctx: &InvocationContext,
        transfer_type: DataTransferType,
        archive: &ArchiveConfiguration,
        source: &UploadSource,
    ) -> Result<Option<u64>, AppError> {
        match source {
            UploadSource::RemoteLocation(location) => {
                let attributes = self
                    .state
                    .gateway
                    .path_attributes(ctx, transfer_type, archive, location, true)
                    .await?;
                if !attributes.is_accessible {
                    return Err(AppError::SourceNotAccessible(location.to_string()));
                }
                if !attributes.exists {
                    return Err(AppError::SourceNotFound(location.to_string()));
                }
                if attributes.is_directory {
                    return Err(AppError::SourceIsDirectory(location.to_string()));
                }
                Ok(attributes.size)
            }
            UploadSource::LocalFile(path) => {
                let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
                    ErrorKind::NotFound => AppError::SourceNotFound(path.display().to_string()),
                    ErrorKind::PermissionDenied => {
                        AppError::SourceNotAccessible(path.display().to_string())
                    }
                    _ => AppError::from(e),
                })?;
                if metadata.is_dir() {
                    return Err(AppError::SourceIsDirectory(path.display().to_string()));
                }
                Ok(Some(metadata.len()))
            }
            UploadSource::Url { size, .. } => Ok(*size),
        }
    }
}

fn provenance_metadata(request: &DataObjectUploadRequest) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(METADATA_PATH.to_string(), request.path.clone());
    metadata.insert(METADATA_USER.to_string(), request.user_id.clone());
    if let Some(object_id) = &request.caller_object_id {
        metadata.insert(METADATA_OBJECT_ID.to_string(), object_id.clone());
    }
    metadata
}
