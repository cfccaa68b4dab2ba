use async_trait::async_trait;
use sqlx::types::Json;
use strata_core::models::{
    DataMigrationTask, DataMigrationTaskResult, MigrationStatus, MigrationType,
};
use strata_core::AppError;
use uuid::Uuid;

use super::{decode_payload, PgTaskStore};
use crate::db::store::MigrationTaskStore;

#[async_trait]
impl MigrationTaskStore for PgTaskStore {
    #[tracing::instrument(skip(self, task), fields(
        db.system = "postgresql",
        db.table = "data_migration_tasks",
        db.operation = "upsert",
        task_id = %task.id
    ))]
    async fn upsert_migration_task(&self, task: &DataMigrationTask) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO data_migration_tasks (
                id, parent_id, user_id, migration_type, status, payload, created, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(task.id)
        .bind(task.parent_id)
        .bind(&task.user_id)
        .bind(task.migration_type.to_string())
        .bind(task.status.to_string())
        .bind(Json(task))
        .bind(task.created)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_migration_task(&self, id: Uuid) -> Result<Option<DataMigrationTask>, AppError> {
        let row = sqlx::query("SELECT payload FROM data_migration_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_payload(&row)).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.system = "postgresql"))]
    async fn list_migration_tasks(
        &self,
        status: MigrationStatus,
        migration_type: Option<MigrationType>,
    ) -> Result<Vec<DataMigrationTask>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM data_migration_tasks
            WHERE status = $1 AND ($2::TEXT IS NULL OR migration_type = $2)
            ORDER BY created ASC
            "#,
        )
        .bind(status.to_string())
        .bind(migration_type.map(|t| t.to_string()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_payload).collect()
    }

    async fn update_migration_progress(
        &self,
        id: Uuid,
        percent_complete: i32,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE data_migration_tasks
            SET payload = jsonb_set(payload, '{percent_complete}', to_jsonb($2::INTEGER)),
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

    async fn list_child_migration_tasks(
        &self,
        parent_id: Uuid,
    ) -> Result<Vec<DataMigrationTask>, AppError> {
        let rows = sqlx::query(
            "SELECT payload FROM data_migration_tasks WHERE parent_id = $1 ORDER BY created ASC",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_payload).collect()
    }

    async fn count_active_child_migration_tasks(&self, parent_id: Uuid) -> Result<u64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM data_migration_tasks WHERE parent_id = $1")
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_child_migration_results(
        &self,
        parent_id: Uuid,
    ) -> Result<Vec<DataMigrationTaskResult>, AppError> {
        let rows = sqlx::query(
            "SELECT payload FROM data_migration_task_results WHERE parent_id = $1 ORDER BY completed ASC",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_payload).collect()
    }

    #[tracing::instrument(skip(self, result), fields(
        db.system = "postgresql",
        db.operation = "finalize",
        task_id = %result.id,
        result = %result.result
    ))]
    async fn finalize_migration_task(
        &self,
        result: &DataMigrationTaskResult,
    ) -> Result<bool, AppError> {
        let Some(mut tx) = self
            .begin_finalize("finalize_migration_task", "data_migration_tasks", result.id)
            .await?
        else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            INSERT INTO data_migration_task_results (
                id, parent_id, user_id, migration_type, result, payload, created, completed
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(result.id)
        .bind(result.parent_id)
        .bind(&result.user_id)
        .bind(result.migration_type.to_string())
        .bind(result.result.to_string())
        .bind(Json(result))
        .bind(result.created)
        .bind(result.completed)
        .execute(tx.conn())
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_migration_task_result(
        &self,
        id: Uuid,
    ) -> Result<Option<DataMigrationTaskResult>, AppError> {
        let row = sqlx::query("SELECT payload FROM data_migration_task_results WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_payload(&row)).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.system = "postgresql", db.operation = "update"))]
    async fn reset_in_process(&self) -> Result<u64, AppError> {
        let received = MigrationStatus::Received.to_string();
        let reset = sqlx::query(
            r#"
            UPDATE data_migration_tasks
            SET status = $1,
                payload = jsonb_set(payload, '{status}', to_jsonb($1::TEXT)),
                updated_at = NOW()
            WHERE status = $2
            "#,
        )
        .bind(&received)
        .bind(MigrationStatus::InProgress.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reset > 0 {
            tracing::info!(count = reset, "Reset in-process migration tasks to RECEIVED");
        }
        Ok(reset)
    }
}
