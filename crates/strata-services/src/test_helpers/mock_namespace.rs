//! Mock collaborators: namespace proxy, event emitter, credential revoker

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_core::models::{
    CollectionListing, SystemGeneratedMetadata, SystemMetadataUpdate, TransferEvent,
    TransferEventKind,
};
use strata_core::{
    AppError, CredentialRevoker, EventEmitter, NamespaceIdentity, NamespaceProxy, PathKind,
};

#[derive(Default)]
struct NamespaceState {
    kinds: HashMap<String, PathKind>,
    metadata: HashMap<String, SystemGeneratedMetadata>,
    listings: HashMap<String, CollectionListing>,
    updates: Vec<(NamespaceIdentity, String, SystemMetadataUpdate)>,
    fail_location_updates: bool,
}

/// In-memory namespace tree. Metadata updates are merged into the stored
/// metadata and recorded.
#[derive(Clone, Default)]
pub struct MockNamespace {
    state: Arc<Mutex<NamespaceState>>,
}

fn parent_of(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(i) => Some(&trimmed[..i]),
    }
}

impl MockNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.kinds.insert(path.to_string(), PathKind::Collection);
        state.listings.entry(path.to_string()).or_default();
        if let Some(parent) = parent_of(path) {
            let listing = state.listings.entry(parent.to_string()).or_default();
            if !listing.sub_collections.iter().any(|c| c == path) {
                listing.sub_collections.push(path.to_string());
            }
        }
    }

    pub fn add_data_object(&self, path: &str, metadata: SystemGeneratedMetadata) {
        let mut state = self.state.lock().unwrap();
        state.kinds.insert(path.to_string(), PathKind::DataObject);
        state.metadata.insert(path.to_string(), metadata);
        if let Some(parent) = parent_of(path) {
            let listing = state.listings.entry(parent.to_string()).or_default();
            if !listing.data_objects.iter().any(|o| o == path) {
                listing.data_objects.push(path.to_string());
            }
        }
    }

    pub fn metadata(&self, path: &str) -> Option<SystemGeneratedMetadata> {
        self.state.lock().unwrap().metadata.get(path).cloned()
    }

    pub fn updates(&self) -> Vec<(NamespaceIdentity, String, SystemMetadataUpdate)> {
        self.state.lock().unwrap().updates.clone()
    }

    /// Reject updates that move an object to a new archive location.
    pub fn fail_location_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_location_updates = fail;
    }
}

#[async_trait]
impl NamespaceProxy for MockNamespace {
    async fn authenticate(&self, _identity: &NamespaceIdentity) -> Result<(), AppError> {
        Ok(())
    }

    async fn path_kind(&self, path: &str) -> Result<Option<PathKind>, AppError> {
        Ok(self.state.lock().unwrap().kinds.get(path).copied())
    }

    async fn absolute_path(&self, path: &str) -> Result<String, AppError> {
        Ok(path.to_string())
    }

    async fn relative_path(&self, absolute_path: &str) -> Result<String, AppError> {
        Ok(absolute_path.to_string())
    }

    async fn get_system_generated_metadata(
        &self,
        path: &str,
    ) -> Result<SystemGeneratedMetadata, AppError> {
        self.state
            .lock()
            .unwrap()
            .metadata
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Metadata for {}", path)))
    }

    async fn update_system_generated_metadata(
        &self,
        identity: &NamespaceIdentity,
        path: &str,
        update: SystemMetadataUpdate,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_location_updates && update.archive_location.is_some() {
            return Err(AppError::Internal("metadata store unavailable".to_string()));
        }
        state
            .updates
            .push((identity.clone(), path.to_string(), update.clone()));

        let Some(metadata) = state.metadata.get_mut(path) else {
            return Ok(());
        };
        if let Some(location) = update.archive_location {
            metadata.archive_location = location;
        }
        if let Some(id) = update.s3_archive_configuration_id {
            metadata.s3_archive_configuration_id = id;
        }
        if let Some(transfer_type) = update.data_transfer_type {
            metadata.data_transfer_type = transfer_type;
        }
        if update.checksum.is_some() {
            metadata.checksum = update.checksum;
        }
        if update.source_size.is_some() {
            metadata.source_size = update.source_size;
        }
        if let Some(status) = update.data_transfer_status {
            metadata.data_transfer_status = status;
        }
        if update.data_transfer_request_id.is_some() {
            metadata.data_transfer_request_id = update.data_transfer_request_id;
        }
        if update.deep_archive_status.is_some() {
            metadata.deep_archive_status = update.deep_archive_status;
            metadata.deep_archive_date = update.deep_archive_date;
        }
        Ok(())
    }

    async fn list_collection(&self, path: &str) -> Result<CollectionListing, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .listings
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<TransferEvent>>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<TransferEventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
    async fn emit(&self, event: TransferEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingRevoker {
    revoked: Arc<Mutex<Vec<String>>>,
}

impl RecordingRevoker {
    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialRevoker for RecordingRevoker {
    async fn revoke(&self, token: &str) -> Result<(), AppError> {
        self.revoked.lock().unwrap().push(token.to_string());
        Ok(())
    }
}
