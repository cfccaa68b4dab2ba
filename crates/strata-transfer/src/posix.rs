use crate::listener::{BackgroundTransfers, ProgressTracker, TransferProgressListener};
use crate::traits::{
    AuthToken, DownloadRequest, DownloadTarget, PathAttributes, TransferBackend, TransferError,
    TransferResponse, TransferResult, TransferStatusReport, UploadRequest,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::models::{ArchiveConfiguration, FileLocation, UploadSource};
use strata_core::DataTransferType;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Root directory of a filesystem archive, carried inside the [`AuthToken`]
#[derive(Clone)]
struct PosixSession {
    root: PathBuf,
}

impl PosixSession {
    /// Convert a location to a filesystem path under the archive root.
    ///
    /// The container id is the first directory below the root; neither part
    /// may escape the root.
    fn location_to_path(&self, location: &FileLocation) -> TransferResult<PathBuf> {
        let container = location.file_container_id.trim_matches('/');
        let key = location.file_id.trim_start_matches('/');
        if container.is_empty()
            || key.is_empty()
            || container.split('/').any(|c| c == "..")
            || key.split('/').any(|c| c == "..")
        {
            return Err(TransferError::InvalidLocation(format!(
                "Location resolves outside archive root: {}",
                location
            )));
        }
        Ok(self.root.join(container).join(key))
    }
}

/// Filesystem archive backend (mounted parallel filesystems, NFS, local disks)
#[derive(Clone)]
pub struct PosixBackend {
    http: reqwest::Client,
    transfers: BackgroundTransfers,
}

impl Default for PosixBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PosixBackend {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            transfers: BackgroundTransfers::default(),
        }
    }
}

async fn ensure_parent_dir(path: &Path) -> TransferResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Copy `reader` into a new file at `path`, reporting progress.
async fn write_file<R>(
    mut reader: R,
    path: &Path,
    tracker: &mut ProgressTracker,
) -> TransferResult<u64>
where
    R: AsyncRead + Unpin + Send,
{
    ensure_parent_dir(path).await?;
    let start = std::time::Instant::now();
    let mut file = fs::File::create(path).await.map_err(|e| {
        TransferError::TransferFailed(format!("Failed to create file {}: {}", path.display(), e))
    })?;

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read]).await.map_err(|e| {
            TransferError::TransferFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;
        tracker.advance(read as u64).await;
    }
    file.sync_all().await?;

    tracing::info!(
        path = %path.display(),
        size_bytes = tracker.transferred(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Filesystem copy successful"
    );
    Ok(tracker.transferred())
}

async fn open_source(path: &Path) -> TransferResult<(fs::File, u64)> {
    let metadata = fs::metadata(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TransferError::NotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => {
            TransferError::AccessDenied(path.display().to_string())
        }
        _ => TransferError::IoError(e),
    })?;
    if metadata.is_dir() {
        return Err(TransferError::InvalidLocation(format!(
            "{} is a directory",
            path.display()
        )));
    }
    Ok((fs::File::open(path).await?, metadata.len()))
}

#[async_trait]
impl TransferBackend for PosixBackend {
    fn transfer_type(&self) -> DataTransferType {
        DataTransferType::Posix
    }

    async fn authenticate(&self, config: &ArchiveConfiguration) -> TransferResult<AuthToken> {
        let root = config.url.as_deref().ok_or_else(|| {
            TransferError::ConfigError(format!("archive {} has no filesystem root", config.id))
        })?;
        let root = PathBuf::from(root.trim_start_matches("file://"));

        fs::create_dir_all(&root).await.map_err(|e| {
            TransferError::ConfigError(format!(
                "Failed to create archive directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(AuthToken::new(
            DataTransferType::Posix,
            config.id.clone(),
            config.credentials.username.clone(),
            PosixSession { root },
        ))
    }

    async fn accepts_transfer_requests(&self, _token: &AuthToken) -> TransferResult<bool> {
        Ok(true)
    }

    async fn upload_data_object(
        &self,
        token: &AuthToken,
        request: &UploadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        let session = token.session::<PosixSession>()?;
        let destination = session.location_to_path(&request.destination)?;
        let tracker_listener = listener.clone();

        match request.source.clone() {
            UploadSource::LocalFile(source) => {
                let (file, size) = open_source(&source).await?;
                let work = async move {
                    let mut tracker = ProgressTracker::new(tracker_listener, Some(size));
                    Ok((write_file(file, &destination, &mut tracker).await?, None))
                };
                self.transfers.run(listener, work).await
            }
            UploadSource::Url { url, size } => {
                let http = self.http.clone();
                let work = async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status())
                        .map_err(|e| {
                            TransferError::TransferFailed(format!("source URL unreadable: {}", e))
                        })?;
                    let size = size.or(response.content_length());
                    let stream = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(std::io::Error::other));
                    let mut tracker = ProgressTracker::new(tracker_listener, size);
                    let bytes =
                        write_file(StreamReader::new(Box::pin(stream)), &destination, &mut tracker)
                            .await?;
                    Ok((bytes, None))
                };
                self.transfers.run(listener, work).await
            }
            UploadSource::RemoteLocation(location) => Err(TransferError::Unsupported(format!(
                "filesystem archive cannot pull from {}",
                location
            ))),
        }
    }

    async fn download_data_object(
        &self,
        token: &AuthToken,
        request: &DownloadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        let session = token.session::<PosixSession>()?;
        let source = session.location_to_path(&request.source)?;

        let destination = match &request.target {
            DownloadTarget::LocalFile(path) => path.clone(),
            DownloadTarget::Remote(destination)
                if destination.transfer_type == DataTransferType::Posix =>
            {
                session.location_to_path(&destination.location)?
            }
            DownloadTarget::Remote(destination) => {
                return Err(TransferError::Unsupported(format!(
                    "filesystem archive cannot write to a {} destination",
                    destination.transfer_type
                )))
            }
        };

        let (file, size) = open_source(&source).await?;
        let tracker_listener = listener.clone();
        let work = async move {
            let mut tracker = ProgressTracker::new(tracker_listener, Some(size));
            Ok((write_file(file, &destination, &mut tracker).await?, None))
        };
        self.transfers.run(listener, work).await
    }

    async fn delete_data_object(
        &self,
        token: &AuthToken,
        location: &FileLocation,
    ) -> TransferResult<()> {
        let session = token.session::<PosixSession>()?;
        let path = session.location_to_path(location)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Filesystem delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransferError::BackendError(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn get_path_attributes(
        &self,
        token: &AuthToken,
        location: &FileLocation,
        _want_size: bool,
    ) -> TransferResult<PathAttributes> {
        let session = token.session::<PosixSession>()?;
        let path = session.location_to_path(location)?;

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => Ok(PathAttributes::directory()),
            Ok(metadata) => Ok(PathAttributes::file(Some(metadata.len()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PathAttributes::missing()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Ok(PathAttributes::default())
            }
            Err(e) => Err(TransferError::IoError(e)),
        }
    }

    async fn get_transfer_status(
        &self,
        _token: &AuthToken,
        request_id: &str,
    ) -> TransferResult<TransferStatusReport> {
        self.transfers.lookup(request_id)
    }

    async fn get_transfer_size(&self, _token: &AuthToken, request_id: &str) -> TransferResult<u64> {
        match self.transfers.lookup(request_id)? {
            TransferStatusReport::Completed { bytes_transferred } => {
                Ok(bytes_transferred.unwrap_or(0))
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_core::models::{ArchiveCredentials, DownloadDestination};
    use strata_core::ArchiveProvider;
    use tempfile::tempdir;

    fn archive(root: &Path) -> ArchiveConfiguration {
        ArchiveConfiguration {
            id: "posix-archive".to_string(),
            provider: ArchiveProvider::Other,
            transfer_type: DataTransferType::Posix,
            url: Some(root.display().to_string()),
            region: None,
            credentials: ArchiveCredentials {
                username: "svc".to_string(),
                password: String::new(),
            },
            base_archive_destination: FileLocation::new("vault", "root"),
            upload_url_expiration_minutes: 60,
            tiering_storage_class: None,
            tiering_transition_days: None,
            max_active_transfers: None,
            staging: None,
        }
    }

    async fn setup() -> (tempfile::TempDir, PosixBackend, AuthToken) {
        let dir = tempdir().unwrap();
        let backend = PosixBackend::new();
        let token = backend
            .authenticate(&archive(&dir.path().join("archive")))
            .await
            .unwrap();
        (dir, backend, token)
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (dir, backend, token) = setup().await;
        let source = dir.path().join("source.dat");
        fs::write(&source, b"archive me").await.unwrap();

        let destination = FileLocation::new("vault", "root/ProjA/source.dat");
        let response = backend
            .upload_data_object(
                &token,
                &UploadRequest {
                    source: UploadSource::LocalFile(source),
                    destination: destination.clone(),
                    size: None,
                    metadata: BTreeMap::new(),
                },
                None,
            )
            .await
            .unwrap();
        assert!(response.completed);
        assert_eq!(response.bytes_transferred, Some(10));

        let attributes = backend
            .get_path_attributes(&token, &destination, true)
            .await
            .unwrap();
        assert!(attributes.is_file);
        assert_eq!(attributes.size, Some(10));

        let parent = backend
            .get_path_attributes(&token, &FileLocation::new("vault", "root/ProjA"), false)
            .await
            .unwrap();
        assert!(parent.is_directory);

        let local = dir.path().join("downloads").join("copy.dat");
        backend
            .download_data_object(
                &token,
                &DownloadRequest {
                    source: destination,
                    target: DownloadTarget::LocalFile(local.clone()),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(fs::read(&local).await.unwrap(), b"archive me");
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend, token) = setup().await;
        let result = backend
            .get_path_attributes(&token, &FileLocation::new("vault", "../../etc/passwd"), false)
            .await;
        assert!(matches!(result, Err(TransferError::InvalidLocation(_))));

        let result = backend
            .delete_data_object(&token, &FileLocation::new("..", "passwd"))
            .await;
        assert!(matches!(result, Err(TransferError::InvalidLocation(_))));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let (_dir, backend, token) = setup().await;
        assert!(backend
            .delete_data_object(&token, &FileLocation::new("vault", "missing.dat"))
            .await
            .is_ok());
        let attributes = backend
            .get_path_attributes(&token, &FileLocation::new("vault", "missing.dat"), false)
            .await
            .unwrap();
        assert!(!attributes.exists);
        assert!(attributes.is_accessible);
    }

    #[tokio::test]
    async fn test_download_to_foreign_destination_unsupported() {
        let (_dir, backend, token) = setup().await;
        let result = backend
            .download_data_object(
                &token,
                &DownloadRequest {
                    source: FileLocation::new("vault", "a.dat"),
                    target: DownloadTarget::Remote(DownloadDestination::new(
                        DataTransferType::Globus,
                        FileLocation::new("ep", "/a.dat"),
                    )),
                },
                None,
            )
            .await;
        assert!(matches!(result, Err(TransferError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_token_from_other_backend_rejected() {
        let (_dir, backend, _token) = setup().await;
        let foreign = AuthToken::new(DataTransferType::S3, "s3", "svc", 42u8);
        let result = backend
            .get_path_attributes(&foreign, &FileLocation::new("vault", "a.dat"), false)
            .await;
        assert!(matches!(result, Err(TransferError::InvalidToken(_))));
    }
}
