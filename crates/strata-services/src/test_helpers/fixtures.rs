//! Archive fixtures and a fully wired service harness

use std::sync::Arc;

use strata_core::models::{
    ArchiveConfiguration, ArchiveCredentials, DataManagementConfiguration, DataTransferStatus,
    FileLocation, StagingMapping, SystemGeneratedMetadata,
};
use strata_core::{ArchiveProvider, DataTransferType};
use strata_db::MemoryTaskStore;
use strata_transfer::BackendRegistry;
use tempfile::TempDir;

use super::mock_backend::MockBackend;
use super::mock_namespace::{MockNamespace, RecordingEmitter, RecordingRevoker};
use crate::context::InvocationContext;
use crate::download::DownloadService;
use crate::gateway::DataTransferService;
use crate::locator::ArchiveConfigurationLocator;
use crate::migration::MigrationService;
use crate::state::{ServiceSettings, ServiceState};
use crate::tiering::TieringService;
use crate::upload::UploadService;

/// Object-store upload archive of `/ProjA`, with a staging area.
pub const S3_ARCHIVE: &str = "s3-archive";
/// Second object-store archive, used as a migration target.
pub const S3_TARGET_ARCHIVE: &str = "s3-target";
/// Object-store archive on a provider without lifecycle tiering (`/ProjB`).
pub const S3_UNTIERED_ARCHIVE: &str = "s3-untiered";
pub const GLOBUS_ARCHIVE: &str = "globus-archive";

pub const DOC_A: &str = "doc-a";
pub const DOC_B: &str = "doc-b";

pub const TEST_USER: &str = "alice";
pub const SYSTEM_ACCOUNT: &str = "strata-system";
/// Local uploads at or above this size get a listener.
pub const STREAMING_THRESHOLD: u64 = 1024;

pub fn archive(
    id: &str,
    provider: ArchiveProvider,
    transfer_type: DataTransferType,
    container: &str,
    base_file_id: &str,
) -> ArchiveConfiguration {
    ArchiveConfiguration {
        id: id.to_string(),
        provider,
        transfer_type,
        url: None,
        region: None,
        credentials: ArchiveCredentials {
            username: format!("{}-account", id),
            password: "secret".to_string(),
        },
        base_archive_destination: FileLocation::new(container, base_file_id),
        upload_url_expiration_minutes: 60,
        tiering_storage_class: None,
        tiering_transition_days: None,
        max_active_transfers: None,
        staging: None,
    }
}

pub fn data_management(id: &str, base_path: &str, s3_upload: &str) -> DataManagementConfiguration {
    DataManagementConfiguration {
        id: id.to_string(),
        base_path: base_path.to_string(),
        s3_upload_configuration_id: s3_upload.to_string(),
        globus_upload_configuration_id: Some(GLOBUS_ARCHIVE.to_string()),
        s3_default_download_configuration_id: None,
    }
}

pub struct TestHarness {
    pub state: ServiceState,
    pub store: Arc<MemoryTaskStore>,
    pub s3: MockBackend,
    pub globus: MockBackend,
    pub namespace: MockNamespace,
    pub emitter: RecordingEmitter,
    pub revoker: RecordingRevoker,
    pub staging_dir: TempDir,
    pub download_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let staging_dir = TempDir::new().unwrap();
        let download_dir = TempDir::new().unwrap();

        let mut s3_archive = archive(
            S3_ARCHIVE,
            ArchiveProvider::Cloudian,
            DataTransferType::S3,
            "bucket",
            "root",
        );
        s3_archive.staging = Some(StagingMapping {
            endpoint_id: "staging-endpoint".to_string(),
            endpoint_base_path: "/staging".to_string(),
            local_directory: staging_dir.path().display().to_string(),
        });
        let archives = vec![
            s3_archive,
            archive(
                S3_TARGET_ARCHIVE,
                ArchiveProvider::Aws,
                DataTransferType::S3,
                "target-bucket",
                "archive",
            ),
            archive(
                S3_UNTIERED_ARCHIVE,
                ArchiveProvider::Vast,
                DataTransferType::S3,
                "vast-bucket",
                "",
            ),
            archive(
                GLOBUS_ARCHIVE,
                ArchiveProvider::Other,
                DataTransferType::Globus,
                "archive-endpoint",
                "/archive",
            ),
        ];
        let docs = vec![
            data_management(DOC_A, "/ProjA", S3_ARCHIVE),
            data_management(DOC_B, "/ProjB", S3_UNTIERED_ARCHIVE),
        ];
        let locator = ArchiveConfigurationLocator::new(archives, docs).unwrap();

        let s3 = MockBackend::new(DataTransferType::S3);
        let globus = MockBackend::new(DataTransferType::Globus);
        let registry = BackendRegistry::new()
            .with(DataTransferType::S3, Arc::new(s3.clone()))
            .with(DataTransferType::Globus, Arc::new(globus.clone()));

        let store = Arc::new(MemoryTaskStore::new());
        let namespace = MockNamespace::new();
        let emitter = RecordingEmitter::default();
        let revoker = RecordingRevoker::default();
        let settings = ServiceSettings {
            download_directory: download_dir.path().to_path_buf(),
            streaming_upload_threshold_bytes: STREAMING_THRESHOLD,
            presigned_url_expiration_minutes: 30,
            deep_archive_max_days: 2,
            system_account_id: SYSTEM_ACCOUNT.to_string(),
        };

        let state = ServiceState::new(
            store.clone(),
            DataTransferService::new(Arc::new(registry), Arc::new(locator)),
            Arc::new(namespace.clone()),
            Arc::new(emitter.clone()),
            Arc::new(revoker.clone()),
            settings,
        );

        Self {
            state,
            store,
            s3,
            globus,
            namespace,
            emitter,
            revoker,
            staging_dir,
            download_dir,
        }
    }

    pub fn ctx(&self) -> InvocationContext {
        InvocationContext::new(TEST_USER)
    }

    pub fn uploads(&self) -> UploadService {
        UploadService::new(self.state.clone())
    }

    pub fn downloads(&self) -> DownloadService {
        DownloadService::new(self.state.clone())
    }

    pub fn migrations(&self) -> MigrationService {
        MigrationService::new(self.state.clone())
    }

    pub fn tiering(&self) -> TieringService {
        TieringService::new(self.state.clone())
    }

    pub fn archive(&self, id: &str) -> ArchiveConfiguration {
        self.state.gateway.locator().archive(id).unwrap().clone()
    }

    /// Register an ARCHIVED data object stored in `archive_id`.
    pub fn archived_object(&self, path: &str, archive_id: &str, size: u64) -> SystemGeneratedMetadata {
        let archive = self.archive(archive_id);
        let configuration_id = if path.starts_with("/ProjB") { DOC_B } else { DOC_A };
        let metadata = SystemGeneratedMetadata {
            object_id: format!("obj-{}", path.trim_start_matches('/').replace('/', "-")),
            registrar_id: TEST_USER.to_string(),
            configuration_id: configuration_id.to_string(),
            s3_archive_configuration_id: archive.id.clone(),
            data_transfer_type: archive.transfer_type,
            archive_location: archive.archive_location(path),
            checksum: Some("etag-1".to_string()),
            source_size: Some(size),
            data_transfer_status: DataTransferStatus::Archived,
            data_transfer_request_id: None,
            deep_archive_status: None,
            deep_archive_date: None,
        };
        self.namespace.add_data_object(path, metadata.clone());
        metadata
    }

    /// Register a data object awaiting upload, as the namespace creates it.
    pub fn registered_object(&self, path: &str) {
        let mut metadata = self.archived_object(path, S3_ARCHIVE, 0);
        metadata.data_transfer_status = DataTransferStatus::Received;
        metadata.source_size = None;
        metadata.checksum = None;
        self.namespace.add_data_object(path, metadata);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
