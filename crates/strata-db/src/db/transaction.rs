//! Database transaction utilities
//!
//! Finalizing a task deletes its active row and appends a result row; both
//! statements run inside one [`TransactionGuard`].

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::time::Instant;
use strata_core::AppError;

/// A named transaction that logs how long it was held.
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls the
/// transaction back.
pub struct TransactionGuard<'a> {
    transaction: Transaction<'a, Postgres>,
    operation: &'static str,
    started: Instant,
}

impl<'a> TransactionGuard<'a> {
    pub async fn begin(pool: &'a PgPool, operation: &'static str) -> Result<Self, AppError> {
        let transaction = pool.begin().await.map_err(|e| {
            tracing::error!(error = %e, operation, "Failed to begin database transaction");
            AppError::Database(e)
        })?;

        Ok(Self {
            transaction,
            operation,
            started: Instant::now(),
        })
    }

    /// Connection to run statements on inside the transaction.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.transaction
    }

    pub async fn commit(self) -> Result<(), AppError> {
        let operation = self.operation;
        let started = self.started;
        self.transaction.commit().await.map_err(|e| {
            tracing::error!(error = %e, operation, "Failed to commit database transaction");
            AppError::Database(e)
        })?;
        tracing::debug!(
            operation,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Transaction committed"
        );
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), AppError> {
        let operation = self.operation;
        self.transaction.rollback().await.map_err(|e| {
            tracing::warn!(error = %e, operation, "Failed to roll back database transaction");
            AppError::Database(e)
        })
    }
}
