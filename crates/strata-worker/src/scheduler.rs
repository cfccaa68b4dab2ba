//! Transfer scheduler: periodic loops that re-drive tasks the orchestrators
//! leave behind.
//!
//! - downloads: resume RECEIVED data object downloads, refresh IN_PROGRESS ones
//! - collections: enumerate RECEIVED collection downloads, complete ACTIVE ones
//! - migrations: drive RECEIVED migrations, complete IN_PROGRESS bulk parents
//!
//! A single semaphore bounds the tasks driven at once across all loops.
//! Shutdown stops the loops after their current pass; transfers already handed
//! to a backend keep reporting through their listeners.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use strata_core::models::{CollectionDownloadTaskStatus, DownloadTaskStatus, MigrationStatus};
use strata_core::{AppError, Config, ErrorMetadata, LogLevel};
use strata_db::{DownloadTaskStore, MigrationTaskStore};
use strata_services::{DownloadService, InvocationContext, MigrationService, ServiceState};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub download_poll_interval_ms: u64,
    pub collection_poll_interval_ms: u64,
    pub migration_poll_interval_ms: u64,
    pub max_concurrent_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            download_poll_interval_ms: 5000,
            collection_poll_interval_ms: 10_000,
            migration_poll_interval_ms: 10_000,
            max_concurrent_tasks: 8,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_poll_interval_ms: config.scheduler_poll_interval_ms(),
            collection_poll_interval_ms: config.scheduler_collection_poll_interval_ms(),
            migration_poll_interval_ms: config.scheduler_migration_poll_interval_ms(),
            max_concurrent_tasks: config.scheduler_max_concurrent_tasks(),
        }
    }
}

/// One pass of each scheduler loop.
///
/// Passes may overlap with callbacks and with each other: the orchestrators
/// skip any task that is claimed elsewhere or no longer in the state the pass
/// listed it in.
#[derive(Clone)]
pub struct SchedulerPasses {
    state: ServiceState,
    downloads: DownloadService,
    migrations: MigrationService,
    permits: Arc<Semaphore>,
}

impl SchedulerPasses {
    pub fn new(state: ServiceState, max_concurrent_tasks: usize) -> Self {
        Self {
            downloads: DownloadService::new(state.clone()),
            migrations: MigrationService::new(state.clone()),
            state,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    /// Requeue migrations interrupted by a restart.
    pub async fn recover(&self) -> Result<u64> {
        self.migrations
            .reset_in_process()
            .await
            .context("Failed to reset interrupted migrations")
    }

    /// Returns the number of tasks driven.
    pub async fn download_pass(&self) -> Result<usize> {
        let store = &self.state.store;
        let queued = store
            .list_data_object_download_tasks(DownloadTaskStatus::Received, None)
            .await
            .context("Failed to list queued downloads")?;
        let running = store
            .list_data_object_download_tasks(DownloadTaskStatus::InProgress, None)
            .await
            .context("Failed to list running downloads")?;

        let resumes = queued
            .into_iter()
            .map(|task| {
                let downloads = self.downloads.clone();
                (task.id, async move {
                    let ctx = InvocationContext::new(task.user_id.clone());
                    downloads
                        .resume_received_download_task(&ctx, &task)
                        .await
                        .map(|_| ())
                })
            })
            .collect();
        let refreshes = running
            .into_iter()
            .map(|task| {
                let downloads = self.downloads.clone();
                (task.id, async move {
                    let ctx = InvocationContext::new(task.user_id.clone());
                    downloads.refresh_download_task(&ctx, &task).await
                })
            })
            .collect();

        Ok(self.run_bounded("resume download", resumes).await
            + self.run_bounded("refresh download", refreshes).await)
    }

    pub async fn collection_pass(&self) -> Result<usize> {
        let store = &self.state.store;
        let received = store
            .list_collection_download_tasks(CollectionDownloadTaskStatus::Received)
            .await
            .context("Failed to list received collection downloads")?;
        let active = store
            .list_collection_download_tasks(CollectionDownloadTaskStatus::Active)
            .await
            .context("Failed to list active collection downloads")?;

        let processing = received
            .into_iter()
            .map(|task| {
                let downloads = self.downloads.clone();
                (task.id, async move {
                    let ctx = InvocationContext::new(task.user_id.clone());
                    downloads.process_collection_download_task(&ctx, &task).await
                })
            })
            .collect();
        let completing = active
            .into_iter()
            .map(|task| {
                let downloads = self.downloads.clone();
                (task.id, async move {
                    downloads
                        .complete_collection_download_task(&task)
                        .await
                        .map(|_| ())
                })
            })
            .collect();

        Ok(self.run_bounded("process collection", processing).await
            + self.run_bounded("complete collection", completing).await)
    }

    pub async fn migration_pass(&self) -> Result<usize> {
        let store = &self.state.store;
        let received = store
            .list_migration_tasks(MigrationStatus::Received, None)
            .await
            .context("Failed to list received migrations")?;
        let parents: Vec<_> = store
            .list_migration_tasks(MigrationStatus::InProgress, None)
            .await
            .context("Failed to list running migrations")?
            .into_iter()
            .filter(|task| task.migration_type.is_bulk())
            .collect();

        let migrating = received
            .into_iter()
            .map(|task| {
                let migrations = self.migrations.clone();
                (task.id, async move {
                    let ctx = InvocationContext::new(task.user_id.clone());
                    migrations.migrate(&ctx, &task).await
                })
            })
            .collect();
        let completing = parents
            .into_iter()
            .map(|parent| {
                let migrations = self.migrations.clone();
                (parent.id, async move {
                    migrations
                        .complete_bulk_migration(&parent, None)
                        .await
                        .map(|_| ())
                })
            })
            .collect();

        Ok(self.run_bounded("migrate", migrating).await
            + self.run_bounded("complete bulk migration", completing).await)
    }

    /// Run `jobs` on spawned tasks, at most `max_concurrent_tasks` at a time,
    /// and wait for all of them. Failures are logged, not returned.
    async fn run_bounded<Fut>(&self, job: &'static str, jobs: Vec<(Uuid, Fut)>) -> usize
    where
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(jobs.len());
        for (task_id, work) in jobs {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            handles.push(tokio::spawn(async move {
                let result = work.await;
                drop(permit);

                if let Err(e) = &result {
                    match e.log_level() {
                        LogLevel::Debug => {
                            tracing::debug!(
                                job,
                                task_id = %task_id,
                                error = %e,
                                "Scheduled task skipped"
                            )
                        }
                        LogLevel::Warn => {
                            tracing::warn!(
                                job,
                                task_id = %task_id,
                                error = %e,
                                "Scheduled task not completed"
                            )
                        }
                        LogLevel::Error => {
                            tracing::error!(
                                job,
                                task_id = %task_id,
                                error = %e,
                                "Scheduled task failed"
                            )
                        }
                    }
                }
            }));
        }

        let driven = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(job, error = %e, "Scheduled task panicked");
            }
        }
        driven
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    poll_interval_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(loop_name = name, poll_interval_ms, "Scheduler loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match pass().await {
                        Ok(0) => {}
                        Ok(tasks) => {
                            tracing::debug!(
                                loop_name = name,
                                tasks,
                                duration_ms = started.elapsed().as_millis() as u64,
                                "Scheduler pass finished"
                            );
                        }
                        Err(e) => {
                            tracing::error!(loop_name = name, error = %e, "Scheduler pass failed");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!(loop_name = name, "Scheduler loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

/// Background service running the scheduler loops.
pub struct TransferScheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TransferScheduler {
    /// Reset interrupted work, then spawn the loops.
    pub async fn start(state: ServiceState, config: SchedulerConfig) -> Result<Self> {
        let passes = SchedulerPasses::new(state, config.max_concurrent_tasks);
        let reset = passes.recover().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = vec![
            spawn_loop(
                "downloads",
                config.download_poll_interval_ms,
                shutdown_rx.clone(),
                {
                    let passes = passes.clone();
                    move || {
                        let passes = passes.clone();
                        async move { passes.download_pass().await }
                    }
                },
            ),
            spawn_loop(
                "collections",
                config.collection_poll_interval_ms,
                shutdown_rx.clone(),
                {
                    let passes = passes.clone();
                    move || {
                        let passes = passes.clone();
                        async move { passes.collection_pass().await }
                    }
                },
            ),
            spawn_loop(
                "migrations",
                config.migration_poll_interval_ms,
                shutdown_rx,
                move || {
                    let passes = passes.clone();
                    async move { passes.migration_pass().await }
                },
            ),
        ];

        tracing::info!(
            reset_migrations = reset,
            max_concurrent_tasks = config.max_concurrent_tasks,
            "Transfer scheduler started"
        );

        Ok(Self {
            shutdown_tx,
            handles,
        })
    }

    /// Stop the loops and wait for their current pass to finish.
    pub async fn shutdown(self) {
        tracing::info!("Initiating transfer scheduler shutdown");
        if self.shutdown_tx.send(true).is_err() {
            tracing::warn!("Scheduler loops already stopped");
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }
        tracing::info!("Transfer scheduler stopped");
    }
}
