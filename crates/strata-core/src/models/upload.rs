use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FileLocation;
use crate::transfer_types::DataTransferType;
use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Received,
    InProgress,
    Completed,
    Failed,
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Received => write!(f, "RECEIVED"),
            UploadStatus::InProgress => write!(f, "IN_PROGRESS"),
            UploadStatus::Completed => write!(f, "COMPLETED"),
            UploadStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Where the bytes of an upload come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadSource {
    /// A file on a managed endpoint
    RemoteLocation(FileLocation),
    /// A file attached to the request, staged on local disk
    LocalFile(PathBuf),
    /// A time-limited URL read as a stream (archive to archive copies)
    Url { url: String, size: Option<u64> },
}

/// Inbound upload request. Exactly one of `source_location` / `source_file` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataObjectUploadRequest {
    pub path: String,
    pub user_id: String,
    pub caller_object_id: Option<String>,
    pub configuration_id: String,
    pub source_location: Option<FileLocation>,
    pub source_file: Option<PathBuf>,
    /// Delegated credential granting access to the source; revoked if the upload fails.
    pub source_access_token: Option<String>,
}

impl DataObjectUploadRequest {
    /// Resolve the single upload source, rejecting requests with both or neither set.
    pub fn source(&self) -> Result<UploadSource, AppError> {
        match (&self.source_location, &self.source_file) {
            (Some(_), Some(_)) => Err(AppError::InvalidRequest(
                "Both a source location and a source file were provided".to_string(),
            )),
            (None, None) => Err(AppError::InvalidRequest(
                "No source location or source file was provided".to_string(),
            )),
            (Some(location), None) => {
                location.validate()?;
                Ok(UploadSource::RemoteLocation(location.clone()))
            }
            (None, Some(file)) => Ok(UploadSource::LocalFile(file.clone())),
        }
    }

    /// Backend selection is driven by which source field is populated.
    pub fn transfer_type(&self) -> Result<DataTransferType, AppError> {
        Ok(match self.source()? {
            UploadSource::RemoteLocation(_) => DataTransferType::Globus,
            UploadSource::LocalFile(_) | UploadSource::Url { .. } => DataTransferType::S3,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub user_id: String,
    pub caller_object_id: Option<String>,
    pub source_location: Option<FileLocation>,
    pub source_file: Option<PathBuf>,
    pub archive_configuration_id: String,
    pub archive_location: FileLocation,
    pub backend_type: DataTransferType,
    pub status: UploadStatus,
    pub data_transfer_request_id: Option<String>,
    pub checksum: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
