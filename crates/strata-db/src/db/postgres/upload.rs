use async_trait::async_trait;
use sqlx::Row;
use strata_core::AppError;

use super::PgTaskStore;
use crate::db::store::UploadCredentialStore;

#[async_trait]
impl UploadCredentialStore for PgTaskStore {
    #[tracing::instrument(skip(self, token), fields(
        db.system = "postgresql",
        db.table = "upload_source_credentials",
        db.operation = "upsert",
        path = %path
    ))]
    async fn save_upload_source_token(&self, path: &str, token: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_source_credentials (path, token, encrypted, created)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (path) DO UPDATE SET
                token = EXCLUDED.token,
                encrypted = EXCLUDED.encrypted,
                created = EXCLUDED.created
            "#,
        )
        .bind(path)
        .bind(self.seal_token(token)?)
        .bind(self.encryption.is_some())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "upload_source_credentials",
        db.operation = "delete",
        path = %path
    ))]
    async fn take_upload_source_token(&self, path: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query(
            "DELETE FROM upload_source_credentials WHERE path = $1 RETURNING token, encrypted",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let token: String = row.try_get("token")?;
                let encrypted: bool = row.try_get("encrypted")?;
                Ok(Some(self.open_token(&token, encrypted)?))
            }
            None => Ok(None),
        }
    }
}
