//! Archive to archive migration
//!
//! A data object migration streams the object from a pre-signed URL on the
//! source archive into the target archive, then rewrites the object's system
//! metadata as the system account and deletes the source copy. Bulk
//! migrations (collection, lists) spawn one data object child per object and
//! finalize once no child remains active.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use strata_core::models::{
    ArchiveConfiguration, BulkMigrationRequest, DataMigrationTask, DataMigrationTaskResult,
    DataTransferStatus, DeepArchiveStatus, MigrationResult, MigrationStatus,
    MigrationTaskStatusReport, MigrationType, SystemGeneratedMetadata, SystemMetadataUpdate,
    UploadSource,
};
use strata_core::{AppError, PathKind};
use strata_transfer::{TransferProgressListener, TransferResponse, UploadRequest};
use uuid::Uuid;

use crate::claims::TaskClaim;
use crate::context::InvocationContext;
use crate::state::ServiceState;
use crate::upload::{METADATA_OBJECT_ID, METADATA_PATH, METADATA_USER};

const METADATA_MIGRATED_FROM: &str = "strata-migrated-from";

struct MigrationListener {
    service: MigrationService,
    task_id: Uuid,
    size: Option<u64>,
    finished: AtomicBool,
}

#[async_trait]
impl TransferProgressListener for MigrationListener {
    async fn progressed(&self, bytes_transferred: u64) {
        let Some(size) = self.size.filter(|size| *size > 0) else {
            return;
        };
        let percent = (bytes_transferred.min(size) * 100 / size) as i32;
        if let Err(e) = self
            .service
            .state
            .store
            .update_migration_progress(self.task_id, percent)
            .await
        {
            tracing::warn!(
                task_id = %self.task_id,
                error = %e,
                "Failed to record migration progress"
            );
        }
    }

    async fn completed(&self, _bytes_transferred: u64) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self
            .service
            .complete_data_object_migration(self.task_id, true, None)
            .await
        {
            tracing::error!(task_id = %self.task_id, error = %e, "Failed to complete migration");
        }
    }

    async fn failed(&self, message: String) {
        if self.finished.swap(true, Ordering::SeqCst) {
            tracing::warn!(task_id = %self.task_id, "Duplicate migration failure ignored");
            return;
        }
        if let Err(e) = self
            .service
            .complete_data_object_migration(self.task_id, false, Some(message))
            .await
        {
            tracing::error!(task_id = %self.task_id, error = %e, "Failed to complete migration");
        }
    }
}

#[derive(Clone)]
pub struct MigrationService {
    state: ServiceState,
}

impl MigrationService {
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Create a RECEIVED migration of one data object into `to_archive_id`.
    /// The source archive is whatever the object's metadata records.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id()))]
    pub async fn create_data_object_migration(
        &self,
        ctx: &InvocationContext,
        path: &str,
        to_archive_id: &str,
        parent_id: Option<Uuid>,
    ) -> Result<DataMigrationTask, AppError> {
        match self.state.namespace.path_kind(path).await? {
            Some(PathKind::DataObject) => {}
            Some(PathKind::Collection) => {
                return Err(AppError::InvalidRequest(format!("{} is a collection", path)))
            }
            None => return Err(AppError::SourceNotFound(path.to_string())),
        }
        self.target_archive(to_archive_id)?;

        let metadata = self.state.namespace.get_system_generated_metadata(path).await?;
        if metadata.data_transfer_status != DataTransferStatus::Archived {
            return Err(AppError::InvalidRequest(format!(
                "{} is not archived and cannot be migrated",
                path
            )));
        }

        let mut task = DataMigrationTask::new(
            MigrationType::DataObject,
            ctx.user_id(),
            metadata.configuration_id.clone(),
            metadata.s3_archive_configuration_id.clone(),
            to_archive_id,
        );
        task.parent_id = parent_id;
        task.path = Some(path.to_string());
        task.data_object_id = Some(metadata.object_id.clone());
        task.registrar_id = Some(metadata.registrar_id.clone());
        task.from_s3_archive_location = Some(metadata.archive_location.clone());

        self.state.store.upsert_migration_task(&task).await?;
        tracing::info!(
            task_id = %task.id,
            from = %task.from_s3_archive_configuration_id,
            to = %to_archive_id,
            "Migration task created"
        );
        Ok(task)
    }

    /// Create a RECEIVED collection or list migration. Children are spawned
    /// by [`MigrationService::process_bulk_migration`].
    #[tracing::instrument(skip(self, ctx, request), fields(user_id = %ctx.user_id(), migration_type = %request.migration_type))]
    pub async fn create_bulk_migration(
        &self,
        ctx: &InvocationContext,
        request: &BulkMigrationRequest,
    ) -> Result<DataMigrationTask, AppError> {
        request.validate()?;

        let (paths, expected): (Vec<String>, PathKind) = match request.migration_type {
            MigrationType::Collection => {
                (request.path.iter().cloned().collect(), PathKind::Collection)
            }
            MigrationType::CollectionList => {
                (request.collection_paths.clone(), PathKind::Collection)
            }
            MigrationType::DataObjectList => {
                (request.data_object_paths.clone(), PathKind::DataObject)
            }
            MigrationType::DataObject => {
                return Err(AppError::InvalidRequest(
                    "Data object migrations are not bulk migrations".to_string(),
                ))
            }
        };
        for path in &paths {
            match self.state.namespace.path_kind(path).await? {
                None => return Err(AppError::SourceNotFound(path.clone())),
                Some(kind) if kind != expected => {
                    return Err(AppError::InvalidRequest(format!(
                        "{} does not match a {} migration",
                        path, request.migration_type
                    )))
                }
                Some(_) => {}
            }
        }

        let target = self.target_archive(&request.to_s3_archive_configuration_id)?;
        let first = paths.first().ok_or_else(|| {
            AppError::InvalidRequest(format!("Invalid {} migration request", request.migration_type))
        })?;
        let doc = self.state.gateway.locator().data_management_for_path(first)?;

        let mut task = DataMigrationTask::new(
            request.migration_type,
            ctx.user_id(),
            doc.id.clone(),
            doc.s3_upload_configuration_id.clone(),
            target.id.clone(),
        );
        task.path = request.path.clone();
        task.data_object_paths = request.data_object_paths.clone();
        task.collection_paths = request.collection_paths.clone();

        self.state.store.upsert_migration_task(&task).await?;
        tracing::info!(
            task_id = %task.id,
            path = %task.display_path(),
            "Bulk migration task created"
        );
        Ok(task)
    }

    /// Drive a RECEIVED task. Bulk tasks spawn children; data object tasks
    /// start the copy. Tasks claimed elsewhere or no longer RECEIVED are skipped.
    #[tracing::instrument(skip(self, ctx, task), fields(task_id = %task.id, migration_type = %task.migration_type))]
    pub async fn migrate(
        &self,
        ctx: &InvocationContext,
        task: &DataMigrationTask,
    ) -> Result<(), AppError> {
        if task.migration_type.is_bulk() {
            return self.process_bulk_migration(ctx, task).await;
        }

        let Some(claim) = self.state.claims.claim(task.id) else {
            return Ok(());
        };
        let Some(mut task) = self.state.store.get_migration_task(task.id).await? else {
            return Ok(());
        };
        if task.status != MigrationStatus::Received {
            return Ok(());
        }

        if task.is_no_op() {
            tracing::info!(path = %task.display_path(), "Object already in target archive");
            self.finalize_claimed(&claim, &task, MigrationResult::Ignored, None)
                .await?;
            return Ok(());
        }

        let path = task
            .path
            .clone()
            .ok_or_else(|| AppError::Internal(format!("Migration task {} has no path", task.id)))?;
        let locator = self.state.gateway.locator();
        let from = locator.archive(&task.from_s3_archive_configuration_id)?.clone();
        let to = locator.archive(&task.to_s3_archive_configuration_id)?.clone();
        let metadata = self.state.namespace.get_system_generated_metadata(&path).await?;

        task.status = MigrationStatus::InProgress;
        task.to_s3_archive_location = Some(to.archive_location(&path));
        if task.from_s3_archive_location.is_none() {
            task.from_s3_archive_location = Some(metadata.archive_location.clone());
        }
        self.state.store.upsert_migration_task(&task).await?;

        let started = async {
            self.state
                .namespace
                .update_system_generated_metadata(
                    &self.state.settings.system_identity(),
                    &path,
                    SystemMetadataUpdate::status(DataTransferStatus::MigrationInProgress),
                )
                .await?;
            self.start_copy(ctx, &task, &from, &to, &metadata).await
        }
        .await;

        match started {
            Ok(response) if response.completed => {
                self.complete_claimed(&claim, ctx, &task, true, None).await?;
            }
            Ok(response) => {
                tracing::debug!(request_id = ?response.request_id, "Migration copy submitted");
            }
            Err(e) => {
                self.complete_claimed(&claim, ctx, &task, false, Some(e.to_string()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Apply the outcome of a data object copy. Returns `false` when the task
    /// was already finalized.
    pub async fn complete_data_object_migration(
        &self,
        task_id: Uuid,
        success: bool,
        message: Option<String>,
    ) -> Result<bool, AppError> {
        let claim = self.state.claims.acquire(task_id).await;
        let Some(task) = self.state.store.get_migration_task(task_id).await? else {
            tracing::debug!(task_id = %task_id, "Migration already finalized");
            return Ok(false);
        };
        let ctx = InvocationContext::new(task.user_id.clone());
        self.complete_claimed(&claim, &ctx, &task, success, message)
            .await
    }

    /// Spawn DATA_OBJECT children for a RECEIVED bulk task and mark it
    /// IN_PROGRESS. Paths that already have an active child or a child result
    /// are skipped, so a re-driven task only spawns what an interrupted pass
    /// left out.
    #[tracing::instrument(skip(self, ctx, parent), fields(task_id = %parent.id))]
    pub async fn process_bulk_migration(
        &self,
        ctx: &InvocationContext,
        parent: &DataMigrationTask,
    ) -> Result<(), AppError> {
        let Some(_claim) = self.state.claims.claim(parent.id) else {
            return Ok(());
        };
        let Some(mut parent) = self.state.store.get_migration_task(parent.id).await? else {
            return Ok(());
        };
        if parent.status != MigrationStatus::Received || !parent.migration_type.is_bulk() {
            return Ok(());
        }

        let store = &self.state.store;
        let mut existing: HashSet<String> = store
            .list_child_migration_tasks(parent.id)
            .await?
            .into_iter()
            .filter_map(|child| child.path)
            .collect();
        existing.extend(
            store
                .list_child_migration_results(parent.id)
                .await?
                .into_iter()
                .filter_map(|child| child.path),
        );

        let mut spawned = 0;
        for path in self.bulk_data_objects(&parent).await? {
            if !existing.insert(path.clone()) {
                continue;
            }
            spawned += 1;
            if let Err(e) = self
                .create_data_object_migration(
                    ctx,
                    &path,
                    &parent.to_s3_archive_configuration_id,
                    Some(parent.id),
                )
                .await
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "Migration child could not be created"
                );
                self.record_failed_child(&parent, &path, e.to_string()).await?;
            }
        }
        tracing::info!(
            spawned,
            already_spawned = existing.len() - spawned,
            "Bulk migration children spawned"
        );

        parent.status = MigrationStatus::InProgress;
        store.upsert_migration_task(&parent).await?;
        Ok(())
    }

    /// Finalize a bulk parent once none of its children is active.
    /// Returns the aggregate result, or `None` while children are running.
    #[tracing::instrument(skip(self, parent, message), fields(task_id = %parent.id))]
    pub async fn complete_bulk_migration(
        &self,
        parent: &DataMigrationTask,
        message: Option<String>,
    ) -> Result<Option<MigrationResult>, AppError> {
        let Some(claim) = self.state.claims.claim(parent.id) else {
            return Ok(None);
        };
        let Some(parent) = self.state.store.get_migration_task(parent.id).await? else {
            return Ok(None);
        };
        if parent.status != MigrationStatus::InProgress || !parent.migration_type.is_bulk() {
            return Ok(None);
        }

        let store = &self.state.store;
        if store.count_active_child_migration_tasks(parent.id).await? > 0 {
            return Ok(None);
        }

        let children = store.list_child_migration_results(parent.id).await?;
        let result = MigrationResult::aggregate(children.iter().map(|child| child.result));
        let failed = children
            .iter()
            .filter(|child| child.result == MigrationResult::Failed)
            .count();
        let message = message.or_else(|| {
            (failed > 0).then(|| {
                format!("{} of {} data objects failed to migrate", failed, children.len())
            })
        });

        self.finalize_claimed(&claim, &parent, result, message).await?;
        Ok(Some(result))
    }

    pub async fn get_migration_task_status(
        &self,
        id: Uuid,
    ) -> Result<MigrationTaskStatusReport, AppError> {
        if let Some(task) = self.state.store.get_migration_task(id).await? {
            return Ok(MigrationTaskStatusReport::Active(Box::new(task)));
        }
        if let Some(result) = self.state.store.get_migration_task_result(id).await? {
            return Ok(MigrationTaskStatusReport::Finished(Box::new(result)));
        }
        Err(AppError::NotFound(format!("Migration task {}", id)))
    }

    /// Move every IN_PROGRESS migration back to RECEIVED after a restart.
    pub async fn reset_in_process(&self) -> Result<u64, AppError> {
        let reset = self.state.store.reset_in_process().await?;
        if reset > 0 {
            tracing::info!(reset, "Interrupted migrations reset to RECEIVED");
        }
        Ok(reset)
    }

    fn target_archive(&self, id: &str) -> Result<&ArchiveConfiguration, AppError> {
        let archive = self.state.gateway.locator().archive(id)?;
        if !archive.transfer_type.is_object_store() {
            return Err(AppError::UnsupportedBackend(format!(
                "Archive {} ({}) cannot be a migration target",
                archive.id, archive.transfer_type
            )));
        }
        Ok(archive)
    }

    async fn start_copy(
        &self,
        ctx: &InvocationContext,
        task: &DataMigrationTask,
        from: &ArchiveConfiguration,
        to: &ArchiveConfiguration,
        metadata: &SystemGeneratedMetadata,
    ) -> Result<TransferResponse, AppError> {
        let source = task
            .from_s3_archive_location
            .clone()
            .unwrap_or_else(|| metadata.archive_location.clone());
        let destination = task.to_s3_archive_location.clone().ok_or_else(|| {
            AppError::Internal(format!("Migration task {} has no target location", task.id))
        })?;

        let minutes = match from.upload_url_expiration_minutes {
            0 => self.state.settings.presigned_url_expiration_minutes,
            minutes => minutes,
        };
        let url = self
            .state
            .gateway
            .generate_download_url(ctx, from, &source, Duration::from_secs(u64::from(minutes) * 60))
            .await?;

        let request = UploadRequest {
            source: UploadSource::Url {
                url,
                size: metadata.source_size,
            },
            destination,
            size: metadata.source_size,
            metadata: BTreeMap::new(),
        };
        let listener: Arc<dyn TransferProgressListener> = Arc::new(MigrationListener {
            service: self.clone(),
            task_id: task.id,
            size: metadata.source_size,
            finished: AtomicBool::new(false),
        });

        tracing::info!(
            source = %source,
            destination = %request.destination,
            "Starting migration copy"
        );
        self.state
            .gateway
            .upload(ctx, to.transfer_type, to, &request, Some(listener))
            .await
    }

    async fn complete_claimed(
        &self,
        claim: &TaskClaim,
        ctx: &InvocationContext,
        task: &DataMigrationTask,
        success: bool,
        message: Option<String>,
    ) -> Result<bool, AppError> {
        let path = task.path.clone().unwrap_or_default();
        if !success {
            self.restore_archived(&path).await;
            return self
                .finalize_claimed(claim, task, MigrationResult::Failed, message)
                .await;
        }

        match self.post_copy(ctx, task, &path).await {
            Ok(()) => {
                self.finalize_claimed(claim, task, MigrationResult::Completed, message)
                    .await
            }
            Err(e) => {
                let error = AppError::MigrationPostProcessingFailed(e.to_string());
                tracing::error!(
                    task_id = %task.id,
                    path = %path,
                    target = ?task.to_s3_archive_location,
                    error = %error,
                    "Object copied but migration post-processing failed, target copy left in place"
                );
                self.finalize_claimed(claim, task, MigrationResult::Failed, Some(error.to_string()))
                    .await
            }
        }
    }

    /// Provenance, storage class, canonical metadata, source cleanup. The
    /// object's status is restored to ARCHIVED only when the canonical
    /// metadata was not rewritten yet.
    async fn post_copy(
        &self,
        ctx: &InvocationContext,
        task: &DataMigrationTask,
        path: &str,
    ) -> Result<(), AppError> {
        let locator = self.state.gateway.locator();
        let from = locator.archive(&task.from_s3_archive_configuration_id)?;
        let to = locator.archive(&task.to_s3_archive_configuration_id)?;
        let target = task.to_s3_archive_location.clone().ok_or_else(|| {
            AppError::Internal(format!("Migration task {} has no target location", task.id))
        })?;

        let inspected = async {
            self.state
                .gateway
                .add_archive_metadata(ctx, to, &target, &provenance_metadata(task, from))
                .await?;
            self.state
                .gateway
                .path_attributes(ctx, to.transfer_type, to, &target, true)
                .await
        }
        .await;
        let attributes = match inspected {
            Ok(attributes) => attributes,
            Err(e) => {
                self.restore_archived(path).await;
                return Err(e);
            }
        };

        let deep_archive_status =
            DeepArchiveStatus::from_storage_class(attributes.storage_class.as_deref());
        let now = Utc::now();
        let update = SystemMetadataUpdate {
            archive_location: Some(target.clone()),
            s3_archive_configuration_id: Some(to.id.clone()),
            data_transfer_type: Some(to.transfer_type),
            source_size: attributes.size,
            deep_archive_status,
            deep_archive_date: deep_archive_status.map(|_| now),
            data_transfer_completed: Some(now),
            ..SystemMetadataUpdate::status(DataTransferStatus::Archived)
        };
        if let Err(e) = self
            .state
            .namespace
            .update_system_generated_metadata(&self.state.settings.system_identity(), path, update)
            .await
        {
            self.restore_archived(path).await;
            return Err(e);
        }

        if let Some(source) = &task.from_s3_archive_location {
            self.state
                .gateway
                .delete(ctx, from.transfer_type, from, source)
                .await?;
        }
        tracing::info!(task_id = %task.id, path = %path, target = %target, "Object migrated");
        Ok(())
    }

    async fn restore_archived(&self, path: &str) {
        if path.is_empty() {
            return;
        }
        if let Err(e) = self
            .state
            .namespace
            .update_system_generated_metadata(
                &self.state.settings.system_identity(),
                path,
                SystemMetadataUpdate::status(DataTransferStatus::Archived),
            )
            .await
        {
            tracing::warn!(path = %path, error = %e, "Failed to restore archived status");
        }
    }

    async fn finalize_claimed(
        &self,
        _claim: &TaskClaim,
        task: &DataMigrationTask,
        result: MigrationResult,
        message: Option<String>,
    ) -> Result<bool, AppError> {
        let record = DataMigrationTaskResult::from_task(task, result, message);
        let finalized = self.state.store.finalize_migration_task(&record).await?;
        if finalized {
            match result {
                MigrationResult::Failed => tracing::warn!(
                    task_id = %task.id,
                    path = %task.display_path(),
                    error = ?record.message,
                    "Migration failed"
                ),
                _ => tracing::info!(task_id = %task.id, path = %task.display_path(), %result, "Migration finalized"),
            }
        }
        Ok(finalized)
    }

    /// Children that could not even be created still count toward the
    /// parent's aggregate result.
    async fn record_failed_child(
        &self,
        parent: &DataMigrationTask,
        path: &str,
        message: String,
    ) -> Result<(), AppError> {
        let mut child = DataMigrationTask::new(
            MigrationType::DataObject,
            parent.user_id.clone(),
            parent.configuration_id.clone(),
            parent.from_s3_archive_configuration_id.clone(),
            parent.to_s3_archive_configuration_id.clone(),
        );
        child.parent_id = Some(parent.id);
        child.path = Some(path.to_string());
        self.state.store.upsert_migration_task(&child).await?;

        let claim = self.state.claims.acquire(child.id).await;
        self.finalize_claimed(&claim, &child, MigrationResult::Failed, Some(message))
            .await?;
        Ok(())
    }

    async fn bulk_data_objects(&self, parent: &DataMigrationTask) -> Result<Vec<String>, AppError> {
        let roots = match parent.migration_type {
            MigrationType::DataObjectList => return Ok(parent.data_object_paths.clone()),
            MigrationType::Collection => parent.path.iter().cloned().collect(),
            MigrationType::CollectionList => parent.collection_paths.clone(),
            MigrationType::DataObject => return Ok(parent.path.iter().cloned().collect()),
        };

        let mut objects = Vec::new();
        let mut visited = HashSet::new();
        let mut worklist: Vec<String> = roots;
        while let Some(collection) = worklist.pop() {
            if !visited.insert(collection.clone()) {
                continue;
            }
            let listing = self.state.namespace.list_collection(&collection).await?;
            objects.extend(listing.data_objects);
            worklist.extend(listing.sub_collections);
        }
        Ok(objects)
    }
}

fn provenance_metadata(
    task: &DataMigrationTask,
    from: &ArchiveConfiguration,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Some(path) = &task.path {
        metadata.insert(METADATA_PATH.to_string(), path.clone());
    }
    if let Some(registrar) = &task.registrar_id {
        metadata.insert(METADATA_USER.to_string(), registrar.clone());
    }
    if let Some(object_id) = &task.data_object_id {
        metadata.insert(METADATA_OBJECT_ID.to_string(), object_id.clone());
    }
    metadata.insert(METADATA_MIGRATED_FROM.to_string(), from.id.clone());
    metadata
}
