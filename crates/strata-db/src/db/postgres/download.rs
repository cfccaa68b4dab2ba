use async_trait::async_trait;
use sqlx::types::Json;
use strata_core::models::{
    CollectionDownloadTask, CollectionDownloadTaskStatus, DataObjectDownloadTask,
    DownloadTaskResult, DownloadTaskStatus,
};
use strata_core::{AppError, DataTransferType};
use uuid::Uuid;

use super::{decode_payload, PgTaskStore};
use crate::db::store::DownloadTaskStore;
use crate::db::transaction::TransactionGuard;

const INSERT_DOWNLOAD_RESULT: &str = r#"
    INSERT INTO download_task_results (
        id, user_id, path, task_type, result, payload, created, completed
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (id) DO NOTHING
"#;

impl PgTaskStore {
    async fn insert_download_result(
        tx: &mut TransactionGuard<'_>,
        result: &DownloadTaskResult,
    ) -> Result<(), AppError> {
        sqlx::query(INSERT_DOWNLOAD_RESULT)
            .bind(result.id)
            .bind(&result.user_id)
            .bind(&result.path)
            .bind(result.task_type.to_string())
            .bind(result.result)
            .bind(Json(result))
            .bind(result.created)
            .bind(result.completed)
            .execute(tx.conn())
            .await?;
        Ok(())
    }

    fn open_data_object_task(
        &self,
        mut task: DataObjectDownloadTask,
    ) -> Result<DataObjectDownloadTask, AppError> {
        task.destination = self.open(&task.destination)?;
        Ok(task)
    }

    fn open_collection_task(
        &self,
        mut task: CollectionDownloadTask,
    ) -> Result<CollectionDownloadTask, AppError> {
        task.destination = self.open(&task.destination)?;
        Ok(task)
    }
}

#[async_trait]
impl DownloadTaskStore for PgTaskStore {
    #[tracing::instrument(skip(self, task), fields(
        db.system = "postgresql",
        db.table = "data_object_download_tasks",
        db.operation = "upsert",
        task_id = %task.id
    ))]
    async fn upsert_data_object_download_task(
        &self,
        task: &DataObjectDownloadTask,
    ) -> Result<(), AppError> {
        let mut stored = task.clone();
        stored.destination = self.seal(&task.destination)?;

        sqlx::query(
            r#"
            INSERT INTO data_object_download_tasks (
                id, user_id, path, status, data_transfer_type,
                collection_download_task_id, percent_complete, payload, created, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                data_transfer_type = EXCLUDED.data_transfer_type,
                percent_complete = EXCLUDED.percent_complete,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(stored.id)
        .bind(&stored.user_id)
        .bind(&stored.path)
        .bind(stored.data_transfer_status.to_string())
        .bind(stored.data_transfer_type.to_string())
        .bind(stored.collection_download_task_id)
        .bind(stored.percent_complete)
        .bind(Json(&stored))
        .bind(stored.created)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_data_object_download_task(
        &self,
        id: Uuid,
    ) -> Result<Option<DataObjectDownloadTask>, AppError> {
        let row = sqlx::query("SELECT payload FROM data_object_download_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.open_data_object_task(decode_payload(&row)?))
            .transpose()
    }

    #[tracing::instrument(skip(self), fields(db.system = "postgresql"))]
    async fn list_data_object_download_tasks(
        &self,
        status: DownloadTaskStatus,
        transfer_type: Option<DataTransferType>,
    ) -> Result<Vec<DataObjectDownloadTask>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM data_object_download_tasks
            WHERE status = $1 AND ($2::TEXT IS NULL OR data_transfer_type = $2)
            ORDER BY created ASC
            "#,
        )
        .bind(status.to_string())
        .bind(transfer_type.map(|t| t.to_string()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| self.open_data_object_task(decode_payload(row)?))
            .collect()
    }

    async fn update_download_progress(
        &self,
        id: Uuid,
        percent_complete: i32,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE data_object_download_tasks
            SET percent_complete = $2,
                payload = jsonb_set(payload, '{percent_complete}', to_jsonb($2::INTEGER)),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(percent_complete)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    #[tracing::instrument(skip(self, result), fields(
        db.system = "postgresql",
        db.operation = "finalize",
        task_id = %result.id,
        result = result.result
    ))]
    async fn finalize_data_object_download_task(
        &self,
        result: &DownloadTaskResult,
    ) -> Result<bool, AppError> {
        let Some(mut tx) = self
            .begin_finalize(
                "finalize_data_object_download_task",
                "data_object_download_tasks",
                result.id,
            )
            .await?
        else {
            return Ok(false);
        };
        Self::insert_download_result(&mut tx, result).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn upsert_collection_download_task(
        &self,
        task: &CollectionDownloadTask,
    ) -> Result<(), AppError> {
        let mut stored = task.clone();
        stored.destination = self.seal(&task.destination)?;

        sqlx::query(
            r#"
            INSERT INTO collection_download_tasks (
                id, user_id, task_type, status, payload, created, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(stored.id)
        .bind(&stored.user_id)
        .bind(stored.task_type.to_string())
        .bind(stored.status.to_string())
        .bind(Json(&stored))
        .bind(stored.created)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_collection_download_task(
        &self,
        id: Uuid,
    ) -> Result<Option<CollectionDownloadTask>, AppError> {
        let row = sqlx::query("SELECT payload FROM collection_download_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.open_collection_task(decode_payload(&row)?))
            .transpose()
    }

    async fn list_collection_download_tasks(
        &self,
        status: CollectionDownloadTaskStatus,
    ) -> Result<Vec<CollectionDownloadTask>, AppError> {
        let rows = sqlx::query(
            "SELECT payload FROM collection_download_tasks WHERE status = $1 ORDER BY created ASC",
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| self.open_collection_task(decode_payload(row)?))
            .collect()
    }

    #[tracing::instrument(skip(self, result), fields(
        db.system = "postgresql",
        db.operation = "finalize",
        task_id = %result.id,
        result = result.result
    ))]
    async fn finalize_collection_download_task(
        &self,
        result: &DownloadTaskResult,
    ) -> Result<bool, AppError> {
        let Some(mut tx) = self
            .begin_finalize(
                "finalize_collection_download_task",
                "collection_download_tasks",
                result.id,
            )
            .await?
        else {
            return Ok(false);
        };
        Self::insert_download_result(&mut tx, result).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_download_task_result(
        &self,
        id: Uuid,
    ) -> Result<Option<DownloadTaskResult>, AppError> {
        let row = sqlx::query("SELECT payload FROM download_task_results WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_payload(&row)).transpose()
    }
}
