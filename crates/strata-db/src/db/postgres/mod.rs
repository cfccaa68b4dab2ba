//! PostgreSQL task store
//!
//! Active tasks are stored as a JSONB payload plus the columns the scheduler
//! filters on (status, type, parent). Results are append-only.

mod download;
mod migration;
mod tiering;
mod upload;

use anyhow::Context;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use strata_core::models::DownloadDestination;
use strata_core::{AppError, Config, EncryptionService};
use uuid::Uuid;

use crate::db::transaction::TransactionGuard;

/// Connect to PostgreSQL and apply pending migrations.
pub async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(config.database_url())
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections(),
        "Database connected successfully"
    );

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Task store backed by PostgreSQL
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
    encryption: Option<EncryptionService>,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            encryption: None,
        }
    }

    /// Seal destination and upload source access tokens before they are written.
    pub fn with_encryption(mut self, encryption: EncryptionService) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn seal(&self, destination: &DownloadDestination) -> Result<DownloadDestination, AppError> {
        match &self.encryption {
            Some(encryption) => encryption.seal_destination(destination),
            None => Ok(destination.clone()),
        }
    }

    fn open(&self, destination: &DownloadDestination) -> Result<DownloadDestination, AppError> {
        match &self.encryption {
            Some(encryption) => encryption.open_destination(destination),
            None => Ok(destination.clone()),
        }
    }

    fn seal_token(&self, token: &str) -> Result<String, AppError> {
        match &self.encryption {
            Some(encryption) => encryption.encrypt(token),
            None => Ok(token.to_string()),
        }
    }

    fn open_token(&self, stored: &str, encrypted: bool) -> Result<String, AppError> {
        match (&self.encryption, encrypted) {
            (_, false) => Ok(stored.to_string()),
            (Some(encryption), true) => encryption.decrypt(stored),
            (None, true) => Err(AppError::Configuration(
                "Upload source token is encrypted but no encryption key is configured".to_string(),
            )),
        }
    }

    /// Delete the active row `id` from `active_table` inside a new transaction.
    ///
    /// Returns the open transaction when the row existed, so the caller can
    /// append the result row and commit; `None` when the task was already
    /// finalized.
    async fn begin_finalize(
        &self,
        operation: &'static str,
        active_table: &'static str,
        id: Uuid,
    ) -> Result<Option<TransactionGuard<'_>>, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, operation).await?;

        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", active_table))
            .bind(id)
            .execute(tx.conn())
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            tracing::debug!(task_id = %id, operation, "Task already finalized");
            return Ok(None);
        }
        Ok(Some(tx))
    }
}

fn decode_payload<T: DeserializeOwned>(row: &PgRow) -> Result<T, AppError> {
    let Json(value) = row.try_get::<Json<T>, _>("payload")?;
    Ok(value)
}
