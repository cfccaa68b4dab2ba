//! Managed endpoint backend over the Globus Transfer REST API
//!
//! Transfers are submitted and then polled through `get_transfer_status`;
//! listeners are not used because the service reports nothing back.

use crate::listener::TransferProgressListener;
use crate::traits::{
    AuthToken, DownloadRequest, DownloadTarget, PathAttributes, TransferBackend, TransferError,
    TransferResponse, TransferResult, TransferStatusReport, UploadRequest,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strata_core::models::{base_name, ArchiveConfiguration, FileLocation, UploadSource};
use strata_core::DataTransferType;

pub const DEFAULT_AUTH_URL: &str = "https://auth.globus.org/v2/oauth2/token";
pub const DEFAULT_TRANSFER_URL: &str = "https://transfer.api.globus.org/v0.10";
const TRANSFER_SCOPE: &str = "urn:globus:auth:scope:transfer.api.globus.org:all";
const DEFAULT_MAX_ACTIVE_TRANSFERS: u32 = 100;

struct GlobusSession {
    access_token: String,
    transfer_url: String,
    max_active_transfers: u32,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SubmissionId {
    value: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct TaskList {
    total: u32,
}

#[derive(Deserialize)]
struct ErrorDocument {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct DirectoryListing {
    #[serde(rename = "DATA", default)]
    data: Vec<DirectoryEntry>,
}

#[derive(Deserialize)]
struct DirectoryEntry {
    name: String,
    #[serde(rename = "type")]
    entry_type: String,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FatalError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskDocument {
    status: String,
    #[serde(default)]
    bytes_transferred: Option<u64>,
    #[serde(default)]
    files: Option<u64>,
    #[serde(default)]
    files_transferred: Option<u64>,
    #[serde(default)]
    nice_status_short_description: Option<String>,
    #[serde(default)]
    fatal_error: Option<FatalError>,
}

impl TaskDocument {
    fn report(&self) -> TransferStatusReport {
        match self.status.as_str() {
            "SUCCEEDED" => TransferStatusReport::Completed {
                bytes_transferred: self.bytes_transferred,
            },
            "FAILED" => {
                let message = self
                    .fatal_error
                    .as_ref()
                    .and_then(|e| e.description.clone().or_else(|| e.code.clone()))
                    .or_else(|| self.nice_status_short_description.clone())
                    .unwrap_or_else(|| "Globus transfer failed".to_string());
                TransferStatusReport::Failed { message }
            }
            _ => {
                let percent_complete = match (self.files, self.files_transferred) {
                    (Some(files), Some(done)) if files > 0 => {
                        Some(((done.min(files) * 100) / files) as u8)
                    }
                    _ => None,
                };
                TransferStatusReport::InProgress { percent_complete }
            }
        }
    }
}

/// Managed endpoint transfer backend
#[derive(Clone)]
pub struct GlobusBackend {
    client: Client,
    auth_url: String,
}

impl GlobusBackend {
    pub fn new(auth_url: impl Into<String>) -> TransferResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TransferError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            auth_url: auth_url.into(),
        })
    }

    fn authorized(&self, session: &GlobusSession, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&session.access_token)
    }

    fn url(session: &GlobusSession, path: &str) -> String {
        format!("{}{}", session.transfer_url, path)
    }

    /// Map a non-success response to a typed error.
    async fn check(response: reqwest::Response) -> TransferResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorDocument>(&body)
            .ok()
            .map(|doc| {
                format!(
                    "{}: {}",
                    doc.code.unwrap_or_default(),
                    doc.message.unwrap_or_default()
                )
            })
            .unwrap_or(body);
        Err(match status {
            StatusCode::UNAUTHORIZED => TransferError::AuthenticationFailed(detail),
            StatusCode::FORBIDDEN => TransferError::AccessDenied(detail),
            StatusCode::NOT_FOUND => TransferError::NotFound(detail),
            _ => TransferError::BackendError(format!("{} {}", status, detail)),
        })
    }

    async fn submit_transfer(
        &self,
        session: &GlobusSession,
        source: &FileLocation,
        destination: &FileLocation,
    ) -> TransferResult<String> {
        let submission: SubmissionId = Self::check(
            self.authorized(session, self.client.get(Self::url(session, "/submission_id")))
                .send()
                .await
                .map_err(|e| TransferError::BackendError(e.to_string()))?,
        )
        .await?
        .json()
        .await
        .map_err(|e| TransferError::BackendError(e.to_string()))?;

        let body = json!({
            "DATA_TYPE": "transfer",
            "submission_id": submission.value,
            "source_endpoint": source.file_container_id,
            "destination_endpoint": destination.file_container_id,
            "verify_checksum": true,
            "DATA": [{
                "DATA_TYPE": "transfer_item",
                "source_path": source.file_id,
                "destination_path": destination.file_id,
            }],
        });

        let submitted: SubmitResponse = Self::check(
            self.authorized(session, self.client.post(Self::url(session, "/transfer")))
                .json(&body)
                .send()
                .await
                .map_err(|e| TransferError::TransferFailed(e.to_string()))?,
        )
        .await?
        .json()
        .await
        .map_err(|e| TransferError::BackendError(e.to_string()))?;

        tracing::info!(
            task_id = %submitted.task_id,
            source = %source,
            destination = %destination,
            "Globus transfer submitted"
        );
        Ok(submitted.task_id)
    }

    async fn task(&self, session: &GlobusSession, request_id: &str) -> TransferResult<TaskDocument> {
        Self::check(
            self.authorized(
                session,
                self.client
                    .get(Self::url(session, &format!("/task/{}", request_id))),
            )
            .send()
            .await
            .map_err(|e| TransferError::BackendError(e.to_string()))?,
        )
        .await?
        .json()
        .await
        .map_err(|e| TransferError::BackendError(e.to_string()))
    }
}

fn parent_directory(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &trimmed[..idx],
    }
}

#[async_trait]
impl TransferBackend for GlobusBackend {
    fn transfer_type(&self) -> DataTransferType {
        DataTransferType::Globus
    }

    async fn authenticate(&self, config: &ArchiveConfiguration) -> TransferResult<AuthToken> {
        let response = self
            .client
            .post(&self.auth_url)
            .basic_auth(&config.credentials.username, Some(&config.credentials.password))
            .form(&[("grant_type", "client_credentials"), ("scope", TRANSFER_SCOPE)])
            .send()
            .await
            .map_err(|e| TransferError::AuthenticationFailed(e.to_string()))?;

        let token: TokenResponse = match Self::check(response).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| TransferError::AuthenticationFailed(e.to_string()))?,
            Err(TransferError::BackendError(msg)) | Err(TransferError::AccessDenied(msg)) => {
                return Err(TransferError::AuthenticationFailed(msg))
            }
            Err(e) => return Err(e),
        };

        let session = GlobusSession {
            access_token: token.access_token,
            transfer_url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_TRANSFER_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_active_transfers: config
                .max_active_transfers
                .unwrap_or(DEFAULT_MAX_ACTIVE_TRANSFERS),
        };

        tracing::debug!(archive = %config.id, "Globus client authenticated");

        Ok(AuthToken::new(
            DataTransferType::Globus,
            config.id.clone(),
            config.credentials.username.clone(),
            session,
        ))
    }

    async fn accepts_transfer_requests(&self, token: &AuthToken) -> TransferResult<bool> {
        let session = token.session::<GlobusSession>()?;
        let tasks: TaskList = Self::check(
            self.authorized(session, self.client.get(Self::url(session, "/task_list")))
                .query(&[("filter", "status:ACTIVE,INACTIVE"), ("limit", "1")])
                .send()
                .await
                .map_err(|e| TransferError::BackendError(e.to_string()))?,
        )
        .await?
        .json()
        .await
        .map_err(|e| TransferError::BackendError(e.to_string()))?;

        let accepts = tasks.total < session.max_active_transfers;
        if !accepts {
            tracing::info!(
                active = tasks.total,
                limit = session.max_active_transfers,
                "Globus endpoint saturated"
            );
        }
        Ok(accepts)
    }

    async fn upload_data_object(
        &self,
        token: &AuthToken,
        request: &UploadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        let session = token.session::<GlobusSession>()?;
        if listener.is_some() {
            tracing::debug!("Globus uploads are polled; listener ignored");
        }
        match &request.source {
            UploadSource::RemoteLocation(source) => {
                let task_id = self
                    .submit_transfer(session, source, &request.destination)
                    .await?;
                Ok(TransferResponse::submitted(task_id))
            }
            _ => Err(TransferError::Unsupported(
                "Globus uploads require a source endpoint location".to_string(),
            )),
        }
    }

    async fn download_data_object(
        &self,
        token: &AuthToken,
        request: &DownloadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        let session = token.session::<GlobusSession>()?;
        if listener.is_some() {
            tracing::debug!("Globus downloads are polled; listener ignored");
        }
        match &request.target {
            DownloadTarget::Remote(destination)
                if destination.transfer_type == DataTransferType::Globus =>
            {
                let task_id = self
                    .submit_transfer(session, &request.source, &destination.location)
                    .await?;
                Ok(TransferResponse::submitted(task_id))
            }
            DownloadTarget::Remote(destination) => Err(TransferError::Unsupported(format!(
                "Globus cannot deliver to a {} destination",
                destination.transfer_type
            ))),
            DownloadTarget::LocalFile(path) => Err(TransferError::Unsupported(format!(
                "Globus cannot write local file {}",
                path.display()
            ))),
        }
    }

    async fn delete_data_object(
        &self,
        token: &AuthToken,
        location: &FileLocation,
    ) -> TransferResult<()> {
        let session = token.session::<GlobusSession>()?;
        let submission: SubmissionId = Self::check(
            self.authorized(session, self.client.get(Self::url(session, "/submission_id")))
                .send()
                .await
                .map_err(|e| TransferError::BackendError(e.to_string()))?,
        )
        .await?
        .json()
        .await
        .map_err(|e| TransferError::BackendError(e.to_string()))?;

        let body = json!({
            "DATA_TYPE": "delete",
            "submission_id": submission.value,
            "endpoint": location.file_container_id,
            "DATA": [{ "DATA_TYPE": "delete_item", "path": location.file_id }],
        });

        Self::check(
            self.authorized(session, self.client.post(Self::url(session, "/delete")))
                .json(&body)
                .send()
                .await
                .map_err(|e| TransferError::BackendError(e.to_string()))?,
        )
        .await?;
        Ok(())
    }

    async fn get_path_attributes(
        &self,
        token: &AuthToken,
        location: &FileLocation,
        _want_size: bool,
    ) -> TransferResult<PathAttributes> {
        let session = token.session::<GlobusSession>()?;
        let path = location.file_id.trim_end_matches('/');
        if path.is_empty() {
            return Ok(PathAttributes::directory());
        }

        let url = Self::url(
            session,
            &format!("/operation/endpoint/{}/ls", location.file_container_id),
        );
        let response = self
            .authorized(session, self.client.get(url))
            .query(&[("path", parent_directory(path))])
            .send()
            .await
            .map_err(|e| TransferError::BackendError(e.to_string()))?;

        let listing: DirectoryListing = match Self::check(response).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| TransferError::BackendError(e.to_string()))?,
            Err(TransferError::NotFound(_)) => return Ok(PathAttributes::missing()),
            Err(TransferError::AccessDenied(_)) => return Ok(PathAttributes::default()),
            Err(e) => return Err(e),
        };

        let name = base_name(path);
        Ok(
            match listing.data.into_iter().find(|entry| entry.name == name) {
                Some(entry) if entry.entry_type == "dir" => PathAttributes::directory(),
                Some(entry) => PathAttributes::file(entry.size),
                None => PathAttributes::missing(),
            },
        )
    }

    async fn get_transfer_status(
        &self,
        token: &AuthToken,
        request_id: &str,
    ) -> TransferResult<TransferStatusReport> {
        let session = token.session::<GlobusSession>()?;
        Ok(self.task(session, request_id).await?.report())
    }

    async fn get_transfer_size(&self, token: &AuthToken, request_id: &str) -> TransferResult<u64> {
        let session = token.session::<GlobusSession>()?;
        Ok(self
            .task(session, request_id)
            .await?
            .bytes_transferred
            .unwrap_or(0))
    }
}
