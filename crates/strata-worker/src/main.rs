use std::sync::Arc;

use anyhow::{Context, Result};
use strata_core::{Config, EncryptionService};
use strata_db::{setup_database, PgTaskStore};
use strata_infra::{
    init_telemetry, shutdown_telemetry, HttpCredentialRevoker, HttpNamespaceProxy,
    NamespaceClient, TelemetryConfig, TracingEventEmitter,
};
use strata_services::{
    ArchiveConfigurationLocator, DataTransferService, ServiceSettings, ServiceState,
};
use strata_transfer::create_default_registry;
use strata_worker::{SchedulerConfig, TransferScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_telemetry(&TelemetryConfig::from_config(&config, "strata-worker")?)?;

    tracing::info!(environment = %config.environment(), "Starting strata-worker");

    let pool = setup_database(&config).await?;
    let mut store = PgTaskStore::new(pool);
    if config.encryption_key_configured() {
        let encryption =
            EncryptionService::from_env().context("Failed to initialize encryption")?;
        store = store.with_encryption(encryption);
    } else if config.is_production() {
        tracing::warn!("ENCRYPTION_KEY not set, destination credentials are stored in plain text");
    }

    let locator = ArchiveConfigurationLocator::from_file(config.archive_configuration_file())
        .await
        .context("Failed to load archive configurations")?;
    let registry = create_default_registry(&config).context("Failed to register backends")?;
    let gateway = DataTransferService::new(Arc::new(registry), Arc::new(locator));

    let namespace_client = NamespaceClient::from_config(&config)?;
    tracing::info!(url = %namespace_client.base_url(), "Namespace proxy configured");

    std::fs::create_dir_all(config.download_directory()).with_context(|| {
        format!(
            "Failed to create download directory {}",
            config.download_directory().display()
        )
    })?;

    let state = ServiceState::new(
        Arc::new(store),
        gateway,
        Arc::new(HttpNamespaceProxy::new(namespace_client.clone())),
        Arc::new(TracingEventEmitter::new()),
        Arc::new(HttpCredentialRevoker::new(namespace_client)),
        ServiceSettings::from_config(&config),
    );

    let scheduler = TransferScheduler::start(state, SchedulerConfig::from_config(&config)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown().await;
    shutdown_telemetry().await;
    Ok(())
}
