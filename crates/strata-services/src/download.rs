//! Download orchestration
//!
//! A download either goes straight from the archive to the caller's
//! destination, or, when the archive cannot write to the destination's
//! backend family, through a local staging file in two hops. Every
//! destination download is tracked by a [`DataObjectDownloadTask`] until it is
//! finalized into a [`DownloadTaskResult`].
//!
//! # Task lifecycle
//!
//! ```text
//! create ──► IN_PROGRESS (hop issued) ──► finalize(success | failure)
//!    │            ▲      │
//!    ▼            │      └─ first hop done ─► admission ─► IN_PROGRESS (final hop)
//! RECEIVED ───────┘                               └──────► RECEIVED (queued)
//! ```
//!
//! Callbacks and scheduler passes for the same task id serialize on the
//! in-process claim set and re-read the active task before acting on it.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use strata_core::models::{
    base_name, ArchiveConfiguration, CollectionDownloadItem, CollectionDownloadRequest,
    CollectionDownloadTask, CollectionDownloadTaskStatus, DataObjectDownloadRequest,
    DataObjectDownloadTask, DataTransferStatus, DownloadDestination, DownloadResponse,
    DownloadTaskResult, DownloadTaskStatus, DownloadTaskStatusReport, DownloadTaskType,
    FileLocation, TransferEvent, TransferEventKind, TransferOutcome,
};
use strata_core::{AppError, DataTransferType, PathKind};
use strata_transfer::{
    DownloadRequest, DownloadTarget, TransferProgressListener, TransferStatusReport,
};
use uuid::Uuid;

use crate::claims::TaskClaim;
use crate::context::InvocationContext;
use crate::state::ServiceState;

/// Archive copy of the object a download reads.
#[derive(Debug, Clone)]
struct SourceObject {
    configuration_id: String,
    archive: ArchiveConfiguration,
    archive_location: FileLocation,
    size: Option<u64>,
}

/// The archive writes to local disk, but not to the destination's family.
fn needs_staging(archive_type: DataTransferType, destination_type: DataTransferType) -> bool {
    archive_type.is_object_store() && destination_type.is_managed_endpoint()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hop {
    /// Archive to local staging file
    First,
    /// Into the caller's destination
    Final,
}

/// State handed to the backend with each hop.
struct DownloadListener {
    service: DownloadService,
    task_id: Uuid,
    size: Option<i64>,
    hop: Hop,
    finished: AtomicBool,
}

impl DownloadListener {
    fn new(service: DownloadService, task: &DataObjectDownloadTask, hop: Hop) -> Self {
        Self {
            service,
            task_id: task.id,
            size: task.size,
            hop,
            finished: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TransferProgressListener for DownloadListener {
    async fn progressed(&self, bytes_transferred: u64) {
        let Some(size) = self.size.filter(|size| *size > 0) else {
            return;
        };
        let percent = (bytes_transferred.min(size as u64) * 100 / size as u64) as i32;
        match self
            .service
            .state
            .store
            .update_download_progress(self.task_id, percent)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(task_id = %self.task_id, "Progress for finished download ignored"),
            Err(e) => tracing::warn!(task_id = %self.task_id, error = %e, "Failed to record download progress"),
        }
    }

    async fn completed(&self, bytes_transferred: u64) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            task_id = %self.task_id,
            hop = ?self.hop,
            bytes = bytes_transferred,
            "Download hop completed"
        );
        let outcome = match self.hop {
            Hop::First => self.service.first_hop_completed(self.task_id).await,
            Hop::Final => self
                .service
                .finalize_download_task(self.task_id, true, None)
                .await
                .map(|_| ()),
        };
        if let Err(e) = outcome {
            tracing::error!(
                task_id = %self.task_id,
                error = %e,
                "Failed to apply download completion"
            );
        }
    }

    async fn failed(&self, message: String) {
        if self.finished.swap(true, Ordering::SeqCst) {
            tracing::warn!(task_id = %self.task_id, "Duplicate download failure ignored");
            return;
        }
        if let Err(e) = self
            .service
            .finalize_download_task(self.task_id, false, Some(message))
            .await
        {
            tracing::error!(
                task_id = %self.task_id,
                error = %e,
                "Failed to finalize failed download"
            );
        }
    }
}

#[derive(Clone)]
pub struct DownloadService {
    state: ServiceState,
}

impl DownloadService {
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Download one data object.
    ///
    /// Without a destination the object is written to a private file in the
    /// download directory before this returns. With one, a download task is
    /// created and the response reports whether the transfer completed, is in
    /// progress or is queued behind a saturated backend.
    #[tracing::instrument(skip(self, ctx, request), fields(path = %request.path, user_id = %ctx.user_id()))]
    pub async fn download_data_object(
        &self,
        ctx: &InvocationContext,
        request: &DataObjectDownloadRequest,
    ) -> Result<DownloadResponse, AppError> {
        if request.path.trim().is_empty() {
            return Err(AppError::InvalidRequest("No download path was provided".to_string()));
        }
        let source = self.resolve_source(&request.path).await?;

        let Some(destination) = &request.destination else {
            return self.download_to_private_file(ctx, &source).await;
        };
        destination.location.validate()?;

        let (task, outcome) = self
            .start_download(
                ctx,
                &request.path,
                &request.user_id,
                source,
                destination.clone(),
                request.completion_event,
                None,
            )
            .await?;

        Ok(DownloadResponse {
            task_id: Some(task.id),
            outcome,
            destination_location: task.destination.location,
            download_file_path: task.download_file_path,
            data_transfer_request_id: task.data_transfer_request_id,
        })
    }

    pub async fn get_download_task_status(
        &self,
        id: Uuid,
    ) -> Result<DownloadTaskStatusReport, AppError> {
        if let Some(task) = self.state.store.get_data_object_download_task(id).await? {
            return Ok(DownloadTaskStatusReport::Active(Box::new(task)));
        }
        if let Some(task) = self.state.store.get_collection_download_task(id).await? {
            return Ok(DownloadTaskStatusReport::ActiveCollection(Box::new(task)));
        }
        if let Some(result) = self.state.store.get_download_task_result(id).await? {
            return Ok(DownloadTaskStatusReport::Finished(Box::new(result)));
        }
        Err(AppError::NotFound(format!("Download task {}", id)))
    }

    /// Resubmit a queued task once its backend admits requests again.
    /// Returns `None` when the task is busy elsewhere or no longer queued.
    #[tracing::instrument(skip(self, ctx, task), fields(task_id = %task.id))]
    pub async fn resume_received_download_task(
        &self,
        ctx: &InvocationContext,
        task: &DataObjectDownloadTask,
    ) -> Result<Option<TransferOutcome>, AppError> {
        let Some(claim) = self.state.claims.claim(task.id) else {
            return Ok(None);
        };
        let Some(task) = self.state.store.get_data_object_download_task(task.id).await? else {
            return Ok(None);
        };
        if task.data_transfer_status != DownloadTaskStatus::Received {
            return Ok(None);
        }
        let (_, outcome) = self.submit_hop(&claim, ctx, task).await?;
        Ok(Some(outcome))
    }

    /// Poll the backend for an in-progress task: progress updates the task,
    /// a terminal state advances or finalizes it. A request the backend no
    /// longer knows (lost with a restarted process) is queued again.
    #[tracing::instrument(skip(self, ctx, task), fields(task_id = %task.id))]
    pub async fn refresh_download_task(
        &self,
        ctx: &InvocationContext,
        task: &DataObjectDownloadTask,
    ) -> Result<(), AppError> {
        let Some(claim) = self.state.claims.claim(task.id) else {
            return Ok(());
        };
        let Some(mut task) = self.state.store.get_data_object_download_task(task.id).await? else {
            return Ok(());
        };
        if task.data_transfer_status != DownloadTaskStatus::InProgress {
            return Ok(());
        }
        let Some(request_id) = task.data_transfer_request_id.clone() else {
            return Ok(());
        };

        let archive = self.hop_archive(&task)?;
        let report = match self
            .state
            .gateway
            .transfer_status(ctx, task.data_transfer_type, &archive, &request_id)
            .await
        {
            Ok(report) => report,
            Err(AppError::NotFound(_)) => {
                tracing::info!(
                    request_id = %request_id,
                    "Transfer no longer tracked by backend, requeued"
                );
                task.data_transfer_status = DownloadTaskStatus::Received;
                task.data_transfer_request_id = None;
                self.state.store.upsert_data_object_download_task(&task).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match report {
            TransferStatusReport::InProgress { percent_complete } => {
                if let Some(percent) = percent_complete {
                    self.state
                        .store
                        .update_download_progress(task.id, i32::from(percent))
                        .await?;
                }
            }
            TransferStatusReport::Completed { .. } if task.is_first_hop() => {
                self.advance_to_final_hop(&claim, ctx, task).await?;
            }
            TransferStatusReport::Completed { .. } => {
                self.finalize_claimed(&claim, &task, true, None).await?;
            }
            TransferStatusReport::Failed { message } => {
                self.finalize_claimed(&claim, &task, false, Some(message)).await?;
            }
        }
        Ok(())
    }

    /// Finalize a data object download. Returns `false` when the task was
    /// already finalized.
    pub async fn finalize_download_task(
        &self,
        id: Uuid,
        result: bool,
        message: Option<String>,
    ) -> Result<bool, AppError> {
        let claim = self.state.claims.acquire(id).await;
        let Some(task) = self.state.store.get_data_object_download_task(id).await? else {
            tracing::debug!(task_id = %id, result, "Download already finalized");
            return Ok(false);
        };
        self.finalize_claimed(&claim, &task, result, message).await
    }

    /// Accept a collection or list download. Items are spawned later by
    /// [`DownloadService::process_collection_download_task`].
    #[tracing::instrument(skip(self, ctx, request), fields(user_id = %ctx.user_id(), task_type = %request.task_type))]
    pub async fn download_collection(
        &self,
        ctx: &InvocationContext,
        request: &CollectionDownloadRequest,
    ) -> Result<CollectionDownloadTask, AppError> {
        request.validate()?;

        let (paths, expected): (Vec<String>, PathKind) = match request.task_type {
            DownloadTaskType::Collection => (
                request.path.iter().cloned().collect(),
                PathKind::Collection,
            ),
            DownloadTaskType::CollectionList => (request.paths.clone(), PathKind::Collection),
            DownloadTaskType::DataObjectList => (request.paths.clone(), PathKind::DataObject),
            DownloadTaskType::DataObject => {
                return Err(AppError::InvalidRequest(
                    "Data object downloads are not collection downloads".to_string(),
                ))
            }
        };
        for path in &paths {
            match self.state.namespace.path_kind(path).await? {
                None => return Err(AppError::SourceNotFound(path.clone())),
                Some(kind) if kind != expected => {
                    return Err(AppError::InvalidRequest(format!(
                        "{} is not a {}",
                        path,
                        match expected {
                            PathKind::Collection => "collection",
                            PathKind::DataObject => "data object",
                        }
                    )))
                }
                Some(_) => {}
            }
        }
        if !self.state.gateway.supports(request.destination.transfer_type) {
            return Err(AppError::UnsupportedBackend(format!(
                "No backend serves {} destinations",
                request.destination.transfer_type
            )));
        }

        let first = paths.first().ok_or_else(|| {
            AppError::InvalidRequest("A non-empty list of paths is required".to_string())
        })?;
        let doc = self.state.gateway.locator().data_management_for_path(first)?;

        let task = CollectionDownloadTask {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            task_type: request.task_type,
            path: request.path.clone(),
            paths: request.paths.clone(),
            configuration_id: doc.id.clone(),
            destination: request.destination.clone(),
            status: CollectionDownloadTaskStatus::Received,
            items: Vec::new(),
            completion_event: request.completion_event,
            created: Utc::now(),
        };
        self.state.store.upsert_collection_download_task(&task).await?;
        tracing::info!(
            task_id = %task.id,
            path = %task.display_path(),
            "Collection download received"
        );
        Ok(task)
    }

    /// Enumerate the data objects of a RECEIVED collection task, start one
    /// child download per object and mark the task ACTIVE.
    #[tracing::instrument(skip(self, ctx, task), fields(task_id = %task.id))]
    pub async fn process_collection_download_task(
        &self,
        ctx: &InvocationContext,
        task: &CollectionDownloadTask,
    ) -> Result<(), AppError> {
        let Some(_claim) = self.state.claims.claim(task.id) else {
            return Ok(());
        };
        let Some(mut task) = self.state.store.get_collection_download_task(task.id).await? else {
            return Ok(());
        };
        if task.status != CollectionDownloadTaskStatus::Received {
            return Ok(());
        }

        for (path, location) in self.collection_items(&task).await? {
            let destination = DownloadDestination {
                location,
                ..task.destination.clone()
            };
            let item = match self.start_child(ctx, &task, &path, destination).await {
                Ok(child_id) => CollectionDownloadItem {
                    path,
                    data_object_download_task_id: Some(child_id),
                    result: None,
                    message: None,
                    percent_complete: 0,
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path,
                        error = %e,
                        "Collection item could not be started"
                    );
                    CollectionDownloadItem {
                        path,
                        data_object_download_task_id: None,
                        result: Some(false),
                        message: Some(e.to_string()),
                        percent_complete: 0,
                    }
                }
            };
            task.items.push(item);
        }

        task.status = CollectionDownloadTaskStatus::Active;
        self.state.store.upsert_collection_download_task(&task).await?;
        tracing::info!(items = task.items.len(), "Collection download active");
        Ok(())
    }

    /// Collect child outcomes of an ACTIVE collection task and finalize it
    /// once every item is terminal. Returns whether it was finalized.
    #[tracing::instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn complete_collection_download_task(
        &self,
        task: &CollectionDownloadTask,
    ) -> Result<bool, AppError> {
        let Some(claim) = self.state.claims.claim(task.id) else {
            return Ok(false);
        };
        let Some(mut task) = self.state.store.get_collection_download_task(task.id).await? else {
            return Ok(false);
        };
        if task.status != CollectionDownloadTaskStatus::Active {
            return Ok(false);
        }

        let mut changed = false;
        for item in task.items.iter_mut().filter(|item| !item.is_terminal()) {
            changed |= self.refresh_item(item).await?;
        }

        if !task.all_items_terminal() {
            if changed {
                self.state.store.upsert_collection_download_task(&task).await?;
            }
            return Ok(false);
        }

        let succeeded = task.items.iter().filter(|i| i.result == Some(true)).count();
        let message = (succeeded < task.items.len())
            .then(|| format!("{} of {} items downloaded", succeeded, task.items.len()));
        let result = DownloadTaskResult::for_collection(&task, message);
        self.finalize_collection_claimed(&claim, &task, result).await
    }

    /// Cancel a collection download that has not started any items yet.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_collection_download_task(
        &self,
        id: Uuid,
    ) -> Result<DownloadTaskResult, AppError> {
        let claim = self.state.claims.acquire(id).await;
        let mut task = self
            .state
            .store
            .get_collection_download_task(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Collection download task {}", id)))?;
        if task.status != CollectionDownloadTaskStatus::Received {
            return Err(AppError::InvalidRequest(format!(
                "Collection download {} is {} and can no longer be canceled",
                id, task.status
            )));
        }

        task.status = CollectionDownloadTaskStatus::Canceled;
        self.state.store.upsert_collection_download_task(&task).await?;

        let mut result = DownloadTaskResult::for_collection(&task, Some("Canceled".to_string()));
        result.result = false;
        self.finalize_collection_claimed(&claim, &task, result.clone())
            .await?;
        Ok(result)
    }

    pub(crate) async fn first_hop_completed(&self, task_id: Uuid) -> Result<(), AppError> {
        let claim = self.state.claims.acquire(task_id).await;
        let Some(task) = self.state.store.get_data_object_download_task(task_id).await? else {
            return Ok(());
        };
        if !task.is_first_hop() {
            return Ok(());
        }
        let ctx = InvocationContext::new(task.user_id.clone());
        self.advance_to_final_hop(&claim, &ctx, task).await
    }

    async fn advance_to_final_hop(
        &self,
        claim: &TaskClaim,
        ctx: &InvocationContext,
        mut task: DataObjectDownloadTask,
    ) -> Result<(), AppError> {
        tracing::info!(
            task_id = %task.id,
            destination_type = %task.destination.transfer_type,
            "Staging complete, starting final hop"
        );
        task.data_transfer_type = task.destination.transfer_type;
        task.data_transfer_request_id = None;
        task.percent_complete = 0;
        self.submit_hop(claim, ctx, task).await.map(|_| ())
    }

    async fn resolve_source(&self, path: &str) -> Result<SourceObject, AppError> {
        match self.state.namespace.path_kind(path).await? {
            Some(PathKind::DataObject) => {}
            Some(PathKind::Collection) => {
                return Err(AppError::InvalidRequest(format!("{} is a collection", path)))
            }
            None => return Err(AppError::SourceNotFound(path.to_string())),
        }

        let metadata = self.state.namespace.get_system_generated_metadata(path).await?;
        if !matches!(
            metadata.data_transfer_status,
            DataTransferStatus::Archived | DataTransferStatus::MigrationInProgress
        ) {
            return Err(AppError::InvalidRequest(format!(
                "{} is not archived yet",
                path
            )));
        }
        let archive = self
            .state
            .gateway
            .locator()
            .archive(&metadata.s3_archive_configuration_id)?
            .clone();

        Ok(SourceObject {
            configuration_id: metadata.configuration_id,
            archive,
            archive_location: metadata.archive_location,
            size: metadata.source_size,
        })
    }

    /// Archive whose system account drives `transfer_type` for downloads of
    /// objects stored in `source`.
    fn destination_archive(
        &self,
        source: &ArchiveConfiguration,
        configuration_id: &str,
        transfer_type: DataTransferType,
    ) -> Result<ArchiveConfiguration, AppError> {
        if transfer_type == source.transfer_type {
            return Ok(source.clone());
        }
        let locator = self.state.gateway.locator();
        match transfer_type {
            DataTransferType::S3 | DataTransferType::Globus => {
                let doc = locator.data_management(configuration_id)?;
                Ok(locator.upload_archive(doc, transfer_type)?.clone())
            }
            other => Err(AppError::UnsupportedBackend(format!(
                "No archive serves {} destinations",
                other
            ))),
        }
    }

    fn hop_archive(&self, task: &DataObjectDownloadTask) -> Result<ArchiveConfiguration, AppError> {
        let source = self
            .state
            .gateway
            .locator()
            .archive(&task.s3_archive_configuration_id)?;
        self.destination_archive(source, &task.configuration_id, task.data_transfer_type)
    }

    /// Check the destination and compute the concrete location to write.
    ///
    /// An existing file is a conflict. An existing directory receives the
    /// source's base name, and that computed path may not be a directory.
    async fn resolve_destination(
        &self,
        ctx: &InvocationContext,
        archive: &ArchiveConfiguration,
        destination: &DownloadDestination,
        source_path: &str,
    ) -> Result<DownloadDestination, AppError> {
        let gateway = &self.state.gateway;
        let attributes = gateway
            .path_attributes(ctx, destination.transfer_type, archive, &destination.location, false)
            .await?;
        if !attributes.is_accessible {
            return Err(AppError::DestinationNotAccessible(destination.location.to_string()));
        }
        if !attributes.exists {
            return Ok(destination.clone());
        }
        if attributes.is_file {
            return Err(AppError::DestinationConflict(format!(
                "{} already exists",
                destination.location
            )));
        }

        let location = destination.location.child(base_name(source_path));
        let computed = gateway
            .path_attributes(ctx, destination.transfer_type, archive, &location, false)
            .await?;
        if computed.is_directory {
            return Err(AppError::DestinationConflict(format!(
                "{} is an existing directory",
                location
            )));
        }
        Ok(DownloadDestination {
            location,
            ..destination.clone()
        })
    }

    async fn download_to_private_file(
        &self,
        ctx: &InvocationContext,
        source: &SourceObject,
    ) -> Result<DownloadResponse, AppError> {
        let directory = &self.state.settings.download_directory;
        tokio::fs::create_dir_all(directory).await?;
        let file = directory.join(Uuid::new_v4().to_string());

        let request = DownloadRequest {
            source: source.archive_location.clone(),
            target: DownloadTarget::LocalFile(file.clone()),
        };
        let response = match self
            .state
            .gateway
            .download(ctx, source.archive.transfer_type, &source.archive, &request, None)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&file).await {
                    if cleanup.kind() != ErrorKind::NotFound {
                        tracing::warn!(
                            file = %file.display(),
                            error = %cleanup,
                            "Failed to delete partial download"
                        );
                    }
                }
                return Err(e);
            }
        };

        tracing::info!(
            file = %file.display(),
            bytes = ?response.bytes_transferred,
            "Downloaded to private file"
        );
        Ok(DownloadResponse {
            task_id: None,
            outcome: if response.completed {
                TransferOutcome::Completed
            } else {
                TransferOutcome::InProgress
            },
            destination_location: FileLocation::new(
                directory.display().to_string(),
                base_name(&file.display().to_string()).to_string(),
            ),
            download_file_path: Some(file.display().to_string()),
            data_transfer_request_id: response.request_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_download(
        &self,
        ctx: &InvocationContext,
        path: &str,
        user_id: &str,
        source: SourceObject,
        destination: DownloadDestination,
        completion_event: bool,
        collection_download_task_id: Option<Uuid>,
    ) -> Result<(DataObjectDownloadTask, TransferOutcome), AppError> {
        let destination_archive = self.destination_archive(
            &source.archive,
            &source.configuration_id,
            destination.transfer_type,
        )?;
        let destination = self
            .resolve_destination(ctx, &destination_archive, &destination, path)
            .await?;

        let mut task = DataObjectDownloadTask {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            path: path.to_string(),
            configuration_id: source.configuration_id.clone(),
            s3_archive_configuration_id: source.archive.id.clone(),
            data_transfer_type: source.archive.transfer_type,
            data_transfer_status: DownloadTaskStatus::InProgress,
            data_transfer_request_id: None,
            archive_location: source.archive_location.clone(),
            destination,
            download_file_path: None,
            staging_source_location: None,
            size: source.size.map(|size| size as i64),
            percent_complete: 0,
            completion_event,
            collection_download_task_id,
            created: Utc::now(),
        };

        if needs_staging(source.archive.transfer_type, task.destination.transfer_type) {
            let backend = self.state.gateway.backend(source.archive.transfer_type)?;
            let file_name = task.id.to_string();
            let no_staging = || {
                AppError::Configuration(format!(
                    "Archive {} has no staging area for {} destinations",
                    source.archive.id, task.destination.transfer_type
                ))
            };
            let local = backend
                .file_path(&source.archive, &file_name)
                .ok_or_else(no_staging)?;
            let staged = backend
                .download_source_location(&source.archive, &file_name)
                .ok_or_else(no_staging)?;
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            task.download_file_path = Some(local.display().to_string());
            task.staging_source_location = Some(staged);
        }

        let claim = self.state.claims.acquire(task.id).await;
        self.state.store.upsert_data_object_download_task(&task).await?;
        tracing::info!(
            task_id = %task.id,
            archive = %task.archive_location,
            destination = %task.destination.location,
            two_hop = task.staging_source_location.is_some(),
            "Download task created"
        );
        self.submit_hop(&claim, ctx, task).await
    }

    async fn start_child(
        &self,
        ctx: &InvocationContext,
        parent: &CollectionDownloadTask,
        path: &str,
        destination: DownloadDestination,
    ) -> Result<Uuid, AppError> {
        let source = self.resolve_source(path).await?;
        let (task, _) = self
            .start_download(
                ctx,
                path,
                &parent.user_id,
                source,
                destination,
                false,
                Some(parent.id),
            )
            .await?;
        Ok(task.id)
    }

    /// Issue the task's current hop. A saturated backend leaves the task
    /// RECEIVED; a synchronous backend error finalizes it as failed.
    async fn submit_hop(
        &self,
        claim: &TaskClaim,
        ctx: &InvocationContext,
        mut task: DataObjectDownloadTask,
    ) -> Result<(DataObjectDownloadTask, TransferOutcome), AppError> {
        loop {
            let archive = self.hop_archive(&task)?;
            let transfer_type = task.data_transfer_type;

            if !self
                .state
                .gateway
                .accepts_transfer_requests(ctx, transfer_type, &archive)
                .await?
            {
                task.data_transfer_status = DownloadTaskStatus::Received;
                task.data_transfer_request_id = None;
                self.state.store.upsert_data_object_download_task(&task).await?;
                tracing::info!(
                    task_id = %task.id,
                    backend = %transfer_type,
                    "Backend saturated, download queued"
                );
                return Ok((task, TransferOutcome::Queued));
            }

            let hop = if task.is_first_hop() {
                Hop::First
            } else {
                Hop::Final
            };
            let request = match hop {
                Hop::First => {
                    let local = task.download_file_path.as_ref().ok_or_else(|| {
                        AppError::Internal(format!("Download task {} has no staging file", task.id))
                    })?;
                    DownloadRequest {
                        source: task.archive_location.clone(),
                        target: DownloadTarget::LocalFile(PathBuf::from(local)),
                    }
                }
                Hop::Final => DownloadRequest {
                    source: task
                        .staging_source_location
                        .clone()
                        .unwrap_or_else(|| task.archive_location.clone()),
                    target: DownloadTarget::Remote(task.destination.clone()),
                },
            };
            let listener: Arc<dyn TransferProgressListener> =
                Arc::new(DownloadListener::new(self.clone(), &task, hop));

            let response = match self
                .state
                .gateway
                .download(ctx, transfer_type, &archive, &request, Some(listener))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    self.finalize_claimed(claim, &task, false, Some(e.to_string()))
                        .await?;
                    return Err(e);
                }
            };

            if response.completed {
                if hop == Hop::First {
                    task.data_transfer_type = task.destination.transfer_type;
                    task.data_transfer_request_id = None;
                    continue;
                }
                self.finalize_claimed(claim, &task, true, None).await?;
                return Ok((task, TransferOutcome::Completed));
            }

            task.data_transfer_status = DownloadTaskStatus::InProgress;
            task.data_transfer_request_id = response.request_id;
            self.state.store.upsert_data_object_download_task(&task).await?;
            tracing::debug!(
                task_id = %task.id,
                hop = ?hop,
                request_id = ?task.data_transfer_request_id,
                "Download hop submitted"
            );
            return Ok((task, TransferOutcome::InProgress));
        }
    }

    /// Remove the staging file, move the task to the results table and
    /// notify. Only the caller that actually finalizes gets `true`.
    async fn finalize_claimed(
        &self,
        _claim: &TaskClaim,
        task: &DataObjectDownloadTask,
        result: bool,
        message: Option<String>,
    ) -> Result<bool, AppError> {
        if let Some(path) = &task.download_file_path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        task_id = %task.id,
                        file = %path,
                        error = %e,
                        "Failed to delete staging file"
                    );
                }
            }
        }

        let record = DownloadTaskResult::for_data_object(task, result, message.clone());
        if !self
            .state
            .store
            .finalize_data_object_download_task(&record)
            .await?
        {
            tracing::debug!(task_id = %task.id, "Download already finalized");
            return Ok(false);
        }

        if result {
            tracing::info!(task_id = %task.id, path = %task.path, "Download completed");
        } else {
            tracing::warn!(
                task_id = %task.id,
                path = %task.path,
                error = ?message,
                "Download failed"
            );
        }

        if task.completion_event {
            let kind = if result {
                TransferEventKind::DownloadCompleted
            } else {
                TransferEventKind::DownloadFailed
            };
            let mut event = TransferEvent::new(kind, &task.user_id, &task.path)
                .with_task(task.id)
                .with_source(task.archive_location.clone())
                .with_destination(task.destination.location.clone());
            if let Some(message) = message {
                event = event.with_message(message);
            }
            self.state.emit(event).await;
        }
        Ok(true)
    }

    async fn finalize_collection_claimed(
        &self,
        _claim: &TaskClaim,
        task: &CollectionDownloadTask,
        result: DownloadTaskResult,
    ) -> Result<bool, AppError> {
        if !self
            .state
            .store
            .finalize_collection_download_task(&result)
            .await?
        {
            return Ok(false);
        }
        tracing::info!(task_id = %task.id, result = result.result, "Collection download finalized");

        if task.completion_event {
            let kind = if result.result {
                TransferEventKind::DownloadCompleted
            } else {
                TransferEventKind::DownloadFailed
            };
            let mut event = TransferEvent::new(kind, &task.user_id, task.display_path())
                .with_task(task.id)
                .with_destination(task.destination.location.clone());
            if let Some(message) = result.message {
                event = event.with_message(message);
            }
            self.state.emit(event).await;
        }
        Ok(true)
    }

    /// Update one item from its child task. Returns whether it changed.
    async fn refresh_item(&self, item: &mut CollectionDownloadItem) -> Result<bool, AppError> {
        let Some(child_id) = item.data_object_download_task_id else {
            item.result = Some(false);
            item.message = Some("No download task was started".to_string());
            return Ok(true);
        };

        let store = &self.state.store;
        if let Some(result) = store.get_download_task_result(child_id).await? {
            apply_child_result(item, &result);
            return Ok(true);
        }
        if let Some(child) = store.get_data_object_download_task(child_id).await? {
            let changed = child.percent_complete != item.percent_complete;
            item.percent_complete = child.percent_complete;
            return Ok(changed);
        }
        // finalized between the two reads
        match store.get_download_task_result(child_id).await? {
            Some(result) => apply_child_result(item, &result),
            None => {
                item.result = Some(false);
                item.message = Some(format!("Download task {} was lost", child_id));
            }
        }
        Ok(true)
    }

    /// `(path, destination)` for every data object a collection task covers.
    async fn collection_items(
        &self,
        task: &CollectionDownloadTask,
    ) -> Result<Vec<(String, FileLocation)>, AppError> {
        let roots = match task.task_type {
            DownloadTaskType::DataObjectList => {
                return Ok(task
                    .paths
                    .iter()
                    .map(|path| (path.clone(), task.destination.location.child(base_name(path))))
                    .collect());
            }
            DownloadTaskType::Collection => vec![task.path.clone().ok_or_else(|| {
                AppError::InvalidRequest("No collection path was provided".to_string())
            })?],
            DownloadTaskType::CollectionList => task.paths.clone(),
            DownloadTaskType::DataObject => {
                return Err(AppError::InvalidRequest(
                    "Data object downloads are not collection downloads".to_string(),
                ))
            }
        };

        let mut items = Vec::new();
        let mut visited = HashSet::new();
        for root in roots {
            // Destinations keep the collection's own name and everything below it
            let root = root.trim_end_matches('/').to_string();
            let parent_len = root.rfind('/').map(|i| i + 1).unwrap_or(0);

            let mut worklist = vec![root.clone()];
            while let Some(collection) = worklist.pop() {
                if !visited.insert(collection.clone()) {
                    continue;
                }
                let listing = self.state.namespace.list_collection(&collection).await?;
                for object in listing.data_objects {
                    let relative = if object.starts_with(&format!("{}/", root)) {
                        object[parent_len..].to_string()
                    } else {
                        base_name(&object).to_string()
                    };
                    let location = task.destination.location.child(&relative);
                    items.push((object, location));
                }
                worklist.extend(listing.sub_collections);
            }
        }
        Ok(items)
    }
}

fn apply_child_result(item: &mut CollectionDownloadItem, result: &DownloadTaskResult) {
    item.result = Some(result.result);
    item.message = result.message.clone();
    if result.result {
        item.percent_complete = 100;
    }
}
