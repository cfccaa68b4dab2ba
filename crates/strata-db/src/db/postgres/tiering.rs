use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::models::{TieringRecord, TieringRequestType};
use strata_core::AppError;
use uuid::Uuid;

use super::PgTaskStore;
use crate::db::store::TieringRecordStore;

#[derive(sqlx::FromRow)]
struct TieringRecordRow {
    id: Uuid,
    user_id: String,
    request_type: String,
    path: String,
    s3_archive_configuration_id: String,
    key_prefix: String,
    storage_class: String,
    applied_at: DateTime<Utc>,
}

impl TryFrom<TieringRecordRow> for TieringRecord {
    type Error = AppError;

    fn try_from(row: TieringRecordRow) -> Result<Self, Self::Error> {
        let request_type = row
            .request_type
            .parse::<TieringRequestType>()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(TieringRecord {
            id: row.id,
            user_id: row.user_id,
            request_type,
            path: row.path,
            s3_archive_configuration_id: row.s3_archive_configuration_id,
            key_prefix: row.key_prefix,
            storage_class: row.storage_class,
            applied_at: row.applied_at,
        })
    }
}

#[async_trait]
impl TieringRecordStore for PgTaskStore {
    #[tracing::instrument(skip(self, record), fields(
        db.system = "postgresql",
        db.table = "tiering_records",
        db.operation = "insert",
        key_prefix = %record.key_prefix
    ))]
    async fn insert_tiering_record(&self, record: &TieringRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tiering_records (
                id, user_id, request_type, path, s3_archive_configuration_id,
                key_prefix, storage_class, applied_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(record.request_type.to_string())
        .bind(&record.path)
        .bind(&record.s3_archive_configuration_id)
        .bind(&record.key_prefix)
        .bind(&record.storage_class)
        .bind(record.applied_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_tiering_records(&self, user_id: &str) -> Result<Vec<TieringRecord>, AppError> {
        let rows = sqlx::query_as::<_, TieringRecordRow>(
            r#"
            SELECT id, user_id, request_type, path, s3_archive_configuration_id,
                   key_prefix, storage_class, applied_at
            FROM tiering_records
            WHERE user_id = $1
            ORDER BY applied_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TieringRecord::try_from).collect()
    }
}
