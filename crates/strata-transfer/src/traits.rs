//! Transfer backend abstraction
//!
//! Every transfer technology (object store, managed endpoint, filesystem)
//! implements [`TransferBackend`]. Orchestrators select a backend by
//! [`DataTransferType`] through the registry and never see backend internals.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_core::models::{ArchiveConfiguration, DownloadDestination, FileLocation, UploadSource};
use strata_core::{AppError, DataTransferType};
use thiserror::Error;

use crate::listener::TransferProgressListener;

/// Transfer operation errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::AuthenticationFailed(msg) => AppError::BackendAuthenticationFailed(msg),
            TransferError::NotFound(msg) => AppError::NotFound(msg),
            TransferError::TransferFailed(msg) => AppError::TransferFailed(msg),
            TransferError::Unsupported(msg) => AppError::UnsupportedBackend(msg),
            TransferError::InvalidLocation(msg) => AppError::InvalidRequest(msg),
            TransferError::ConfigError(msg) => AppError::Configuration(msg),
            other => AppError::Backend(other.to_string()),
        }
    }
}

/// Opaque credential returned by [`TransferBackend::authenticate`].
///
/// The session payload is backend specific and only the backend that issued
/// the token can read it back.
#[derive(Clone)]
pub struct AuthToken {
    pub transfer_type: DataTransferType,
    pub archive_configuration_id: String,
    pub system_account_id: String,
    session: Arc<dyn Any + Send + Sync>,
}

impl AuthToken {
    pub fn new<S>(
        transfer_type: DataTransferType,
        archive_configuration_id: impl Into<String>,
        system_account_id: impl Into<String>,
        session: S,
    ) -> Self
    where
        S: Any + Send + Sync,
    {
        Self {
            transfer_type,
            archive_configuration_id: archive_configuration_id.into(),
            system_account_id: system_account_id.into(),
            session: Arc::new(session),
        }
    }

    pub fn session<S: Any + Send + Sync>(&self) -> TransferResult<&S> {
        self.session.downcast_ref::<S>().ok_or_else(|| {
            TransferError::InvalidToken(format!(
                "token for {} was not issued by this backend",
                self.transfer_type
            ))
        })
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("transfer_type", &self.transfer_type)
            .field("archive_configuration_id", &self.archive_configuration_id)
            .field("system_account_id", &self.system_account_id)
            .finish_non_exhaustive()
    }
}

/// Result of a stat on a backend path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathAttributes {
    pub exists: bool,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_accessible: bool,
    pub size: Option<u64>,
    pub storage_class: Option<String>,
}

impl PathAttributes {
    pub fn missing() -> Self {
        Self {
            is_accessible: true,
            ..Default::default()
        }
    }

    pub fn file(size: Option<u64>) -> Self {
        Self {
            exists: true,
            is_file: true,
            is_accessible: true,
            size,
            ..Default::default()
        }
    }

    pub fn directory() -> Self {
        Self {
            exists: true,
            is_directory: true,
            is_accessible: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: UploadSource,
    /// Archive location the object is written to
    pub destination: FileLocation,
    pub size: Option<u64>,
    /// Object metadata stored alongside the bytes
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum DownloadTarget {
    /// A file on the local filesystem (staging or private download file)
    LocalFile(PathBuf),
    /// A caller supplied destination on another backend
    Remote(DownloadDestination),
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source: FileLocation,
    pub target: DownloadTarget,
}

#[derive(Debug, Clone, Default)]
pub struct TransferResponse {
    /// Backend request id, for transfers completed asynchronously
    pub request_id: Option<String>,
    /// True when the bytes were moved before the call returned
    pub completed: bool,
    pub bytes_transferred: Option<u64>,
    pub checksum: Option<String>,
}

impl TransferResponse {
    pub fn completed(bytes_transferred: u64, checksum: Option<String>) -> Self {
        Self {
            request_id: None,
            completed: true,
            bytes_transferred: Some(bytes_transferred),
            checksum,
        }
    }

    pub fn submitted(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            completed: false,
            bytes_transferred: None,
            checksum: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatusReport {
    InProgress { percent_complete: Option<u8> },
    Completed { bytes_transferred: Option<u64> },
    Failed { message: String },
}

/// Lifecycle rule scoped to a key prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieringPolicy {
    pub bucket: String,
    pub prefix: String,
    pub storage_class: String,
    pub transition_days: i32,
}

/// Uniform capability interface over one transfer technology.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    fn transfer_type(&self) -> DataTransferType;

    /// Authenticate the archive's system account.
    async fn authenticate(&self, config: &ArchiveConfiguration) -> TransferResult<AuthToken>;

    /// Admission check. `false` means the caller should queue the request.
    async fn accepts_transfer_requests(&self, token: &AuthToken) -> TransferResult<bool>;

    /// Upload into the archive. With a listener the call returns once the
    /// transfer is started and reports completion through the listener.
    async fn upload_data_object(
        &self,
        token: &AuthToken,
        request: &UploadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse>;

    async fn download_data_object(
        &self,
        token: &AuthToken,
        request: &DownloadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse>;

    async fn delete_data_object(
        &self,
        token: &AuthToken,
        location: &FileLocation,
    ) -> TransferResult<()>;

    async fn get_path_attributes(
        &self,
        token: &AuthToken,
        location: &FileLocation,
        want_size: bool,
    ) -> TransferResult<PathAttributes>;

    async fn get_transfer_status(
        &self,
        token: &AuthToken,
        request_id: &str,
    ) -> TransferResult<TransferStatusReport>;

    async fn get_transfer_size(&self, token: &AuthToken, request_id: &str)
        -> TransferResult<u64>;

    async fn set_tiering_policy(
        &self,
        _token: &AuthToken,
        _policy: &TieringPolicy,
    ) -> TransferResult<()> {
        Err(TransferError::Unsupported(format!(
            "{} does not support tiering",
            self.transfer_type()
        )))
    }

    /// Time limited URL the bytes of `location` can be read from.
    async fn generate_download_url(
        &self,
        _token: &AuthToken,
        _location: &FileLocation,
        _expires_in: Duration,
    ) -> TransferResult<String> {
        Err(TransferError::Unsupported(format!(
            "{} cannot generate download URLs",
            self.transfer_type()
        )))
    }

    /// Attach provenance metadata to an archived object.
    async fn add_archive_metadata(
        &self,
        _token: &AuthToken,
        _location: &FileLocation,
        _metadata: &BTreeMap<String, String>,
    ) -> TransferResult<()> {
        Ok(())
    }

    /// Where a staged local file can be read by the managed endpoint family.
    fn download_source_location(
        &self,
        config: &ArchiveConfiguration,
        file_name: &str,
    ) -> Option<FileLocation> {
        config
            .staging
            .as_ref()
            .map(|staging| staging.endpoint_location(file_name))
    }

    /// Local path of a staged file for this archive, if it has a staging area.
    fn file_path(&self, config: &ArchiveConfiguration, file_name: &str) -> Option<PathBuf> {
        config
            .staging
            .as_ref()
            .map(|staging| staging.local_path(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SessionA(u32);
    struct SessionB;

    #[test]
    fn test_token_session_downcast() {
        let token = AuthToken::new(DataTransferType::S3, "archive", "svc", SessionA(7));
        assert_eq!(token.session::<SessionA>().unwrap().0, 7);
        assert!(matches!(
            token.session::<SessionB>(),
            Err(TransferError::InvalidToken(_))
        ));
        assert!(!format!("{:?}", token).contains("SessionA"));
    }

    #[test]
    fn test_error_conversion() {
        let err: AppError = TransferError::AuthenticationFailed("bad key".to_string()).into();
        assert!(matches!(err, AppError::BackendAuthenticationFailed(_)));
        let err: AppError = TransferError::Unsupported("tiering".to_string()).into();
        assert!(matches!(err, AppError::UnsupportedBackend(_)));
        let err: AppError = TransferError::AccessDenied("ep".to_string()).into();
        assert!(matches!(err, AppError::Backend(_)));
    }
}
