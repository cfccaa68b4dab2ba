//! Shared orchestrator state
//!
//! Every orchestrator holds a clone of [`ServiceState`]: the task store, the
//! transfer gateway, the external collaborators and a few settings lifted from
//! [`Config`].

use std::path::PathBuf;
use std::sync::Arc;

use strata_core::{Config, CredentialRevoker, EventEmitter, NamespaceIdentity, NamespaceProxy};
use strata_core::models::TransferEvent;
use strata_db::TaskStore;

use crate::claims::InFlightTasks;
use crate::gateway::DataTransferService;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Private download files and first-hop staging files live here
    pub download_directory: PathBuf,
    /// Local uploads at or above this size run in the background with a listener
    pub streaming_upload_threshold_bytes: u64,
    pub presigned_url_expiration_minutes: u32,
    pub deep_archive_max_days: i64,
    pub system_account_id: String,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_directory: config.download_directory().clone(),
            streaming_upload_threshold_bytes: config.streaming_upload_threshold_bytes(),
            presigned_url_expiration_minutes: config.presigned_url_expiration_minutes(),
            deep_archive_max_days: config.deep_archive_max_days(),
            system_account_id: config.system_account_id().to_string(),
        }
    }

    pub fn system_identity(&self) -> NamespaceIdentity {
        NamespaceIdentity::System(self.system_account_id.clone())
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub store: Arc<dyn TaskStore>,
    pub gateway: DataTransferService,
    pub namespace: Arc<dyn NamespaceProxy>,
    pub emitter: Arc<dyn EventEmitter>,
    pub revoker: Arc<dyn CredentialRevoker>,
    pub settings: Arc<ServiceSettings>,
    pub claims: InFlightTasks,
}

impl ServiceState {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gateway: DataTransferService,
        namespace: Arc<dyn NamespaceProxy>,
        emitter: Arc<dyn EventEmitter>,
        revoker: Arc<dyn CredentialRevoker>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            namespace,
            emitter,
            revoker,
            settings: Arc::new(settings),
            claims: InFlightTasks::default(),
        }
    }

    /// Fire and forget: emission failures are logged only.
    pub async fn emit(&self, event: TransferEvent) {
        let kind = event.kind;
        if let Err(e) = self.emitter.emit(event).await {
            tracing::warn!(error = %e, event = ?kind, "Failed to emit transfer event");
        }
    }
}
