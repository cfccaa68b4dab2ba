//! Scriptable in-memory transfer backend
//!
//! Transfers return a submitted request id by default and keep the listener,
//! so a test decides when and how the transfer ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strata_core::models::{ArchiveConfiguration, FileLocation};
use strata_core::DataTransferType;
use strata_transfer::{
    AuthToken, DownloadRequest, DownloadTarget, PathAttributes, TieringPolicy, TransferBackend,
    TransferError, TransferProgressListener, TransferResponse, TransferResult,
    TransferStatusReport, UploadRequest,
};

#[derive(Default)]
struct MockBackendState {
    accepts: bool,
    synchronous: bool,
    transfer_error: Option<String>,
    delete_error: Option<String>,
    attributes: HashMap<FileLocation, PathAttributes>,
    statuses: HashMap<String, TransferStatusReport>,
    listeners: HashMap<String, Arc<dyn TransferProgressListener>>,
    request_ids: Vec<String>,
    calls: Vec<String>,
    uploads: Vec<UploadRequest>,
    downloads: Vec<DownloadRequest>,
    deleted: Vec<FileLocation>,
    tiering: Vec<TieringPolicy>,
    archive_metadata: Vec<(FileLocation, BTreeMap<String, String>)>,
}

#[derive(Clone)]
pub struct MockBackend {
    transfer_type: DataTransferType,
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackend {
    pub fn new(transfer_type: DataTransferType) -> Self {
        Self {
            transfer_type,
            state: Arc::new(Mutex::new(MockBackendState {
                accepts: true,
                ..Default::default()
            })),
        }
    }

    pub fn set_accepts(&self, accepts: bool) {
        self.state.lock().unwrap().accepts = accepts;
    }

    /// Complete transfers before returning instead of submitting them.
    pub fn set_synchronous(&self, synchronous: bool) {
        self.state.lock().unwrap().synchronous = synchronous;
    }

    pub fn fail_transfers(&self, message: Option<&str>) {
        self.state.lock().unwrap().transfer_error = message.map(str::to_string);
    }

    pub fn fail_deletes(&self, message: Option<&str>) {
        self.state.lock().unwrap().delete_error = message.map(str::to_string);
    }

    pub fn set_attributes(&self, location: FileLocation, attributes: PathAttributes) {
        self.state
            .lock()
            .unwrap()
            .attributes
            .insert(location, attributes);
    }

    pub fn set_status(&self, request_id: &str, status: TransferStatusReport) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(request_id.to_string(), status);
    }

    pub fn listener(&self, request_id: &str) -> Option<Arc<dyn TransferProgressListener>> {
        self.state.lock().unwrap().listeners.get(request_id).cloned()
    }

    pub fn last_request_id(&self) -> Option<String> {
        self.state.lock().unwrap().request_ids.last().cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.as_str() == name)
            .count()
    }

    /// Transfer calls only, ignoring authentication and lookups.
    pub fn transfer_count(&self) -> usize {
        self.call_count("upload") + self.call_count("download")
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn downloads(&self) -> Vec<DownloadRequest> {
        self.state.lock().unwrap().downloads.clone()
    }

    pub fn deleted(&self) -> Vec<FileLocation> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn tiering_policies(&self) -> Vec<TieringPolicy> {
        self.state.lock().unwrap().tiering.clone()
    }

    pub fn archive_metadata(&self) -> Vec<(FileLocation, BTreeMap<String, String>)> {
        self.state.lock().unwrap().archive_metadata.clone()
    }

    fn record(&self, call: &str) {
        self.state.lock().unwrap().calls.push(call.to_string());
    }

    /// Shared tail of upload and download.
    fn finish_transfer(
        &self,
        size: Option<u64>,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.transfer_error {
            return Err(TransferError::TransferFailed(message.clone()));
        }
        if state.synchronous {
            return Ok(TransferResponse::completed(size.unwrap_or(0), None));
        }

        let request_id = format!(
            "{}-{}",
            self.transfer_type.to_string().to_lowercase(),
            state.request_ids.len() + 1
        );
        state.request_ids.push(request_id.clone());
        state.statuses.insert(
            request_id.clone(),
            TransferStatusReport::InProgress {
                percent_complete: Some(0),
            },
        );
        if let Some(listener) = listener {
            state.listeners.insert(request_id.clone(), listener);
        }
        Ok(TransferResponse::submitted(request_id))
    }
}

#[async_trait]
impl TransferBackend for MockBackend {
    fn transfer_type(&self) -> DataTransferType {
        self.transfer_type
    }

    async fn authenticate(&self, config: &ArchiveConfiguration) -> TransferResult<AuthToken> {
        self.record("authenticate");
        Ok(AuthToken::new(
            self.transfer_type,
            config.id.clone(),
            config.credentials.username.clone(),
            (),
        ))
    }

    async fn accepts_transfer_requests(&self, _token: &AuthToken) -> TransferResult<bool> {
        self.record("accepts");
        Ok(self.state.lock().unwrap().accepts)
    }

    async fn upload_data_object(
        &self,
        _token: &AuthToken,
        request: &UploadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        self.record("upload");
        self.state.lock().unwrap().uploads.push(request.clone());
        self.finish_transfer(request.size, listener)
    }

    async fn download_data_object(
        &self,
        _token: &AuthToken,
        request: &DownloadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        self.record("download");
        self.state.lock().unwrap().downloads.push(request.clone());

        let synchronous = {
            let state = self.state.lock().unwrap();
            state.synchronous && state.transfer_error.is_none()
        };
        if let (true, DownloadTarget::LocalFile(path)) = (synchronous, &request.target) {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, b"archived bytes").await?;
        }
        self.finish_transfer(None, listener)
    }

    async fn delete_data_object(
        &self,
        _token: &AuthToken,
        location: &FileLocation,
    ) -> TransferResult<()> {
        self.record("delete");
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.delete_error {
            return Err(TransferError::BackendError(message.clone()));
        }
        state.deleted.push(location.clone());
        Ok(())
    }

    async fn get_path_attributes(
        &self,
        _token: &AuthToken,
        location: &FileLocation,
        _want_size: bool,
    ) -> TransferResult<PathAttributes> {
        self.record("attributes");
        Ok(self
            .state
            .lock()
            .unwrap()
            .attributes
            .get(location)
            .cloned()
            .unwrap_or_else(PathAttributes::missing))
    }

    async fn get_transfer_status(
        &self,
        _token: &AuthToken,
        request_id: &str,
    ) -> TransferResult<TransferStatusReport> {
        self.record("status");
        self.state
            .lock()
            .unwrap()
            .statuses
            .get(request_id)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(format!("Transfer {}", request_id)))
    }

    async fn get_transfer_size(&self, _token: &AuthToken, request_id: &str) -> TransferResult<u64> {
        self.record("size");
        match self.state.lock().unwrap().statuses.get(request_id) {
            Some(TransferStatusReport::Completed { bytes_transferred }) => {
                Ok(bytes_transferred.unwrap_or(0))
            }
            _ => Ok(0),
        }
    }

    async fn set_tiering_policy(
        &self,
        _token: &AuthToken,
        policy: &TieringPolicy,
    ) -> TransferResult<()> {
        self.record("tiering");
        self.state.lock().unwrap().tiering.push(policy.clone());
        Ok(())
    }

    async fn generate_download_url(
        &self,
        _token: &AuthToken,
        location: &FileLocation,
        expires_in: Duration,
    ) -> TransferResult<String> {
        self.record("url");
        Ok(format!(
            "https://archive.test/{}/{}?expires={}",
            location.file_container_id,
            location.file_id,
            expires_in.as_secs()
        ))
    }

    async fn add_archive_metadata(
        &self,
        _token: &AuthToken,
        location: &FileLocation,
        metadata: &BTreeMap<String, String>,
    ) -> TransferResult<()> {
        self.record("metadata");
        self.state
            .lock()
            .unwrap()
            .archive_metadata
            .push((location.clone(), metadata.clone()));
        Ok(())
    }
}
