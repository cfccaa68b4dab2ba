//! In-memory task store for single-process deployments and tests
//!
//! All state sits behind one mutex, which makes finalization (remove active,
//! append result) atomic for every caller in the process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::models::{
    CollectionDownloadTask, CollectionDownloadTaskStatus, DataMigrationTask,
    DataMigrationTaskResult, DataObjectDownloadTask, DownloadTaskResult, DownloadTaskStatus,
    MigrationStatus, MigrationType, TieringRecord,
};
use strata_core::{AppError, DataTransferType};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::store::{
    DownloadTaskStore, MigrationTaskStore, TieringRecordStore, UploadCredentialStore,
};

#[derive(Default)]
struct MemoryState {
    data_object_downloads: HashMap<Uuid, DataObjectDownloadTask>,
    collection_downloads: HashMap<Uuid, CollectionDownloadTask>,
    download_results: HashMap<Uuid, DownloadTaskResult>,
    migrations: HashMap<Uuid, DataMigrationTask>,
    migration_results: HashMap<Uuid, DataMigrationTaskResult>,
    tiering_records: Vec<TieringRecord>,
    upload_tokens: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of terminal download records, for assertions in tests.
    pub async fn download_result_count(&self) -> usize {
        self.state.lock().await.download_results.len()
    }

    pub async fn migration_result_count(&self) -> usize {
        self.state.lock().await.migration_results.len()
    }
}

#[async_trait]
impl DownloadTaskStore for MemoryTaskStore {
    async fn upsert_data_object_download_task(
        &self,
        task: &DataObjectDownloadTask,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .await
            .data_object_downloads
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get_data_object_download_task(
        &self,
        id: Uuid,
    ) -> Result<Option<DataObjectDownloadTask>, AppError> {
        Ok(self.state.lock().await.data_object_downloads.get(&id).cloned())
    }

    async fn list_data_object_download_tasks(
        &self,
        status: DownloadTaskStatus,
        transfer_type: Option<DataTransferType>,
    ) -> Result<Vec<DataObjectDownloadTask>, AppError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .data_object_downloads
            .values()
            .filter(|t| t.data_transfer_status == status)
            .filter(|t| transfer_type.is_none_or(|tt| t.data_transfer_type == tt))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created);
        Ok(tasks)
    }

    async fn update_download_progress(
        &self,
        id: Uuid,
        percent_complete: i32,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        match state.data_object_downloads.get_mut(&id) {
            Some(task) => {
                task.percent_complete = percent_complete;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finalize_data_object_download_task(
        &self,
        result: &DownloadTaskResult,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.data_object_downloads.remove(&result.id).is_none() {
            return Ok(false);
        }
        state
            .download_results
            .entry(result.id)
            .or_insert_with(|| result.clone());
        Ok(true)
    }

    async fn upsert_collection_download_task(
        &self,
        task: &CollectionDownloadTask,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .await
            .collection_downloads
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get_collection_download_task(
        &self,
        id: Uuid,
    ) -> Result<Option<CollectionDownloadTask>, AppError> {
        Ok(self.state.lock().await.collection_downloads.get(&id).cloned())
    }

    async fn list_collection_download_tasks(
        &self,
        status: CollectionDownloadTaskStatus,
    ) -> Result<Vec<CollectionDownloadTask>, AppError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .collection_downloads
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created);
        Ok(tasks)
    }

    async fn finalize_collection_download_task(
        &self,
        result: &DownloadTaskResult,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.collection_downloads.remove(&result.id).is_none() {
            return Ok(false);
        }
        state
            .download_results
            .entry(result.id)
            .or_insert_with(|| result.clone());
        Ok(true)
    }

    async fn get_download_task_result(
        &self,
        id: Uuid,
    ) -> Result<Option<DownloadTaskResult>, AppError> {
        Ok(self.state.lock().await.download_results.get(&id).cloned())
    }
}

#[async_trait]
impl MigrationTaskStore for MemoryTaskStore {
    async fn upsert_migration_task(&self, task: &DataMigrationTask) -> Result<(), AppError> {
        self.state
            .lock()
            .await
            .migrations
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get_migration_task(&self, id: Uuid) -> Result<Option<DataMigrationTask>, AppError> {
        Ok(self.state.lock().await.migrations.get(&id).cloned())
    }

    async fn list_migration_tasks(
        &self,
        status: MigrationStatus,
        migration_type: Option<MigrationType>,
    ) -> Result<Vec<DataMigrationTask>, AppError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .migrations
            .values()
            .filter(|t| t.status == status)
            .filter(|t| migration_type.is_none_or(|mt| t.migration_type == mt))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created);
        Ok(tasks)
    }

    async fn update_migration_progress(
        &self,
        id: Uuid,
        percent_complete: i32,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        match state.migrations.get_mut(&id) {
            Some(task) => {
                task.percent_complete = percent_complete;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_child_migration_tasks(
        &self,
        parent_id: Uuid,
    ) -> Result<Vec<DataMigrationTask>, AppError> {
        let state = self.state.lock().await;
        let mut children: Vec<_> = state
            .migrations
            .values()
            .filter(|t| t.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|t| t.created);
        Ok(children)
    }

    async fn count_active_child_migration_tasks(&self, parent_id: Uuid) -> Result<u64, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .migrations
            .values()
            .filter(|t| t.parent_id == Some(parent_id))
            .count() as u64)
    }

    async fn list_child_migration_results(
        &self,
        parent_id: Uuid,
    ) -> Result<Vec<DataMigrationTaskResult>, AppError> {
        let state = self.state.lock().await;
        let mut results: Vec<_> = state
            .migration_results
            .values()
            .filter(|r| r.parent_id == Some(parent_id))
            .cloned()
            .collect();
        results.sort_by_key(|r| r.completed);
        Ok(results)
    }

    async fn finalize_migration_task(
        &self,
        result: &DataMigrationTaskResult,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.migrations.remove(&result.id).is_none() {
            return Ok(false);
        }
        state
            .migration_results
            .entry(result.id)
            .or_insert_with(|| result.clone());
        Ok(true)
    }

    async fn get_migration_task_result(
        &self,
        id: Uuid,
    ) -> Result<Option<DataMigrationTaskResult>, AppError> {
        Ok(self.state.lock().await.migration_results.get(&id).cloned())
    }

    async fn reset_in_process(&self) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut reset = 0;
        for task in state.migrations.values_mut() {
            if task.status == MigrationStatus::InProgress {
                task.status = MigrationStatus::Received;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[async_trait]
impl TieringRecordStore for MemoryTaskStore {
    async fn insert_tiering_record(&self, record: &TieringRecord) -> Result<(), AppError> {
        self.state.lock().await.tiering_records.push(record.clone());
        Ok(())
    }

    async fn list_tiering_records(&self, user_id: &str) -> Result<Vec<TieringRecord>, AppError> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .tiering_records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        Ok(records)
    }
}

#[async_trait]
impl UploadCredentialStore for MemoryTaskStore {
    async fn save_upload_source_token(&self, path: &str, token: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .await
            .upload_tokens
            .insert(path.to_string(), token.to_string());
        Ok(())
    }

    async fn take_upload_source_token(&self, path: &str) -> Result<Option<String>, AppError> {
        Ok(self.state.lock().await.upload_tokens.remove(path))
    }
}
