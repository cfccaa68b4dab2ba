//! Task store contracts
//!
//! Each task family has its own trait; [`TaskStore`] is the union the
//! orchestrators depend on. Finalization deletes the active row and appends
//! the result row atomically and reports whether it happened, so callers can
//! tell the one successful finalize from a racing duplicate.

use async_trait::async_trait;
use strata_core::models::{
    CollectionDownloadTask, CollectionDownloadTaskStatus, DataMigrationTask,
    DataMigrationTaskResult, DataObjectDownloadTask, DownloadTaskResult, DownloadTaskStatus,
    MigrationStatus, MigrationType, TieringRecord,
};
use strata_core::{AppError, DataTransferType};
use uuid::Uuid;

#[async_trait]
pub trait DownloadTaskStore: Send + Sync {
    /// Insert or replace the task row (last writer wins per id).
    async fn upsert_data_object_download_task(
        &self,
        task: &DataObjectDownloadTask,
    ) -> Result<(), AppError>;

    async fn get_data_object_download_task(
        &self,
        id: Uuid,
    ) -> Result<Option<DataObjectDownloadTask>, AppError>;

    /// Active tasks in `status`, oldest first, optionally for one backend.
    async fn list_data_object_download_tasks(
        &self,
        status: DownloadTaskStatus,
        transfer_type: Option<DataTransferType>,
    ) -> Result<Vec<DataObjectDownloadTask>, AppError>;

    /// Set the percent complete of an active task. Returns `false` when the
    /// task no longer exists; never inserts.
    async fn update_download_progress(&self, id: Uuid, percent_complete: i32)
        -> Result<bool, AppError>;

    /// Delete the active task `result.id` and append `result`, at most once.
    async fn finalize_data_object_download_task(
        &self,
        result: &DownloadTaskResult,
    ) -> Result<bool, AppError>;

    async fn upsert_collection_download_task(
        &self,
        task: &CollectionDownloadTask,
    ) -> Result<(), AppError>;

    async fn get_collection_download_task(
        &self,
        id: Uuid,
    ) -> Result<Option<CollectionDownloadTask>, AppError>;

    async fn list_collection_download_tasks(
        &self,
        status: CollectionDownloadTaskStatus,
    ) -> Result<Vec<CollectionDownloadTask>, AppError>;

    async fn finalize_collection_download_task(
        &self,
        result: &DownloadTaskResult,
    ) -> Result<bool, AppError>;

    async fn get_download_task_result(&self, id: Uuid)
        -> Result<Option<DownloadTaskResult>, AppError>;
}

#[async_trait]
pub trait MigrationTaskStore: Send + Sync {
    async fn upsert_migration_task(&self, task: &DataMigrationTask) -> Result<(), AppError>;

    async fn get_migration_task(&self, id: Uuid) -> Result<Option<DataMigrationTask>, AppError>;

    /// Active tasks in `status`, oldest first, optionally of one type.
    async fn list_migration_tasks(
        &self,
        status: MigrationStatus,
        migration_type: Option<MigrationType>,
    ) -> Result<Vec<DataMigrationTask>, AppError>;

    /// Update-only progress write, like
    /// [`DownloadTaskStore::update_download_progress`].
    async fn update_migration_progress(&self, id: Uuid, percent_complete: i32)
        -> Result<bool, AppError>;

    /// Active child tasks of `parent_id`.
    async fn list_child_migration_tasks(
        &self,
        parent_id: Uuid,
    ) -> Result<Vec<DataMigrationTask>, AppError>;

    /// Number of child tasks of `parent_id` still active.
    async fn count_active_child_migration_tasks(&self, parent_id: Uuid) -> Result<u64, AppError>;

    async fn list_child_migration_results(
        &self,
        parent_id: Uuid,
    ) -> Result<Vec<DataMigrationTaskResult>, AppError>;

    /// Delete the active task `result.id` and append `result`, at most once.
    async fn finalize_migration_task(
        &self,
        result: &DataMigrationTaskResult,
    ) -> Result<bool, AppError>;

    async fn get_migration_task_result(
        &self,
        id: Uuid,
    ) -> Result<Option<DataMigrationTaskResult>, AppError>;

    /// Rewrite every IN_PROGRESS migration task to RECEIVED. Returns the count.
    async fn reset_in_process(&self) -> Result<u64, AppError>;
}

#[async_trait]
pub trait TieringRecordStore: Send + Sync {
    async fn insert_tiering_record(&self, record: &TieringRecord) -> Result<(), AppError>;

    /// Records applied by `user_id`, newest first.
    async fn list_tiering_records(&self, user_id: &str) -> Result<Vec<TieringRecord>, AppError>;
}

/// Delegated source credentials of uploads that finish asynchronously, held
/// until the upload reaches a terminal state.
#[async_trait]
pub trait UploadCredentialStore: Send + Sync {
    /// Record `token` for the upload into `path`, replacing any earlier one.
    async fn save_upload_source_token(&self, path: &str, token: &str) -> Result<(), AppError>;

    /// Remove and return the token recorded for `path`.
    async fn take_upload_source_token(&self, path: &str) -> Result<Option<String>, AppError>;
}

/// Durable persistence for every task family.
pub trait TaskStore:
    DownloadTaskStore + MigrationTaskStore + TieringRecordStore + UploadCredentialStore
{
}

impl<T> TaskStore for T where
    T: DownloadTaskStore + MigrationTaskStore + TieringRecordStore + UploadCredentialStore
{
}
