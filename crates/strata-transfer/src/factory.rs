#[cfg(feature = "backend-globus")]
use crate::GlobusBackend;
#[cfg(feature = "backend-posix")]
use crate::PosixBackend;
#[cfg(feature = "backend-s3")]
use crate::S3Backend;
use crate::{TransferBackend, TransferError, TransferResult};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{Config, DataTransferType};

/// Backends keyed by the transfer type they serve.
///
/// One backend may be registered for several types, e.g. a deployment that
/// serves cloud storage destinations through its object store backend.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<DataTransferType, Arc<dyn TransferBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transfer_type: DataTransferType, backend: Arc<dyn TransferBackend>) {
        self.backends.insert(transfer_type, backend);
    }

    pub fn with(
        mut self,
        transfer_type: DataTransferType,
        backend: Arc<dyn TransferBackend>,
    ) -> Self {
        self.register(transfer_type, backend);
        self
    }

    pub fn get(&self, transfer_type: DataTransferType) -> TransferResult<Arc<dyn TransferBackend>> {
        self.backends.get(&transfer_type).cloned().ok_or_else(|| {
            TransferError::Unsupported(format!(
                "no transfer backend registered for {}",
                transfer_type
            ))
        })
    }

    pub fn supports(&self, transfer_type: DataTransferType) -> bool {
        self.backends.contains_key(&transfer_type)
    }
}

/// Create the registry of every backend compiled into this build
pub fn create_default_registry(config: &Config) -> TransferResult<BackendRegistry> {
    let mut registry = BackendRegistry::new();

    #[cfg(feature = "backend-s3")]
    registry.register(
        DataTransferType::S3,
        Arc::new(S3Backend::new(config.streaming_upload_threshold_bytes())),
    );

    #[cfg(feature = "backend-globus")]
    {
        let auth_url = std::env::var("GLOBUS_AUTH_URL")
            .unwrap_or_else(|_| crate::globus::DEFAULT_AUTH_URL.to_string());
        registry.register(DataTransferType::Globus, Arc::new(GlobusBackend::new(auth_url)?));
    }

    #[cfg(feature = "backend-posix")]
    registry.register(DataTransferType::Posix, Arc::new(PosixBackend::new()));

    #[cfg(not(feature = "backend-s3"))]
    let _ = config;

    tracing::info!(
        types = ?registry.backends.keys().map(|t| t.to_string()).collect::<Vec<_>>(),
        "Transfer backends registered"
    );
    Ok(registry)
}
