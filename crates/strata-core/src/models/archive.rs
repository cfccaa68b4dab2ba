use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::FileLocation;
use crate::transfer_types::{ArchiveProvider, DataTransferType};

const DEFAULT_UPLOAD_URL_EXPIRATION_MINUTES: u32 = 24 * 60;
const DEFAULT_TIERING_STORAGE_CLASS: &str = "GLACIER";

fn default_upload_url_expiration_minutes() -> u32 {
    DEFAULT_UPLOAD_URL_EXPIRATION_MINUTES
}

/// Credentials of the system account used against one archive.
#[derive(Clone, Serialize, Deserialize)]
pub struct ArchiveCredentials {
    /// Access key id, client id or account name depending on the backend
    pub username: String,
    /// Secret key or client secret
    pub password: String,
}

impl fmt::Debug for ArchiveCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How a managed endpoint sees the local download directory.
///
/// Files written to `local_directory` by the object-store hop are visible to the
/// managed endpoint `endpoint_id` under `endpoint_base_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingMapping {
    pub endpoint_id: String,
    pub endpoint_base_path: String,
    pub local_directory: String,
}

impl StagingMapping {
    /// Local path of a staged file.
    pub fn local_path(&self, file_name: &str) -> PathBuf {
        PathBuf::from(&self.local_directory).join(file_name)
    }

    /// The staged file as the managed endpoint addresses it.
    pub fn endpoint_location(&self, file_name: &str) -> FileLocation {
        FileLocation::new(
            self.endpoint_id.clone(),
            format!("{}/{}", self.endpoint_base_path.trim_end_matches('/'), file_name),
        )
    }
}

/// Connection parameters for one backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfiguration {
    pub id: String,
    pub provider: ArchiveProvider,
    pub transfer_type: DataTransferType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub credentials: ArchiveCredentials,
    pub base_archive_destination: FileLocation,
    #[serde(default = "default_upload_url_expiration_minutes")]
    pub upload_url_expiration_minutes: u32,
    #[serde(default)]
    pub tiering_storage_class: Option<String>,
    #[serde(default)]
    pub tiering_transition_days: Option<i32>,
    /// Admission limit for managed endpoints (active + queued requests).
    #[serde(default)]
    pub max_active_transfers: Option<u32>,
    #[serde(default)]
    pub staging: Option<StagingMapping>,
}

impl ArchiveConfiguration {
    pub fn supports_tiering(&self) -> bool {
        self.provider.supports_tiering()
    }

    /// Archive file id for a logical path: the base file id followed by the path.
    pub fn archive_file_id(&self, logical_path: &str) -> String {
        let base = self.base_archive_destination.file_id.trim_end_matches('/');
        let path = logical_path.trim_start_matches('/');
        if base.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn archive_location(&self, logical_path: &str) -> FileLocation {
        FileLocation::new(
            self.base_archive_destination.file_container_id.clone(),
            self.archive_file_id(logical_path),
        )
    }

    /// Key prefix covering everything archived under a collection.
    pub fn collection_prefix(&self, collection_path: &str) -> String {
        format!(
            "{}/",
            self.archive_file_id(collection_path).trim_end_matches('/')
        )
    }

    pub fn tiering_storage_class(&self) -> &str {
        self.tiering_storage_class
            .as_deref()
            .unwrap_or(DEFAULT_TIERING_STORAGE_CLASS)
    }

    pub fn tiering_transition_days(&self) -> i32 {
        self.tiering_transition_days.unwrap_or(0)
    }
}

/// A data-management configuration groups the archives used below a base path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataManagementConfiguration {
    pub id: String,
    pub base_path: String,
    pub s3_upload_configuration_id: String,
    #[serde(default)]
    pub globus_upload_configuration_id: Option<String>,
    #[serde(default)]
    pub s3_default_download_configuration_id: Option<String>,
}

impl DataManagementConfiguration {
    pub fn covers(&self, path: &str) -> bool {
        let base = self.base_path.trim_end_matches('/');
        path == base || path.starts_with(&format!("{}/", base))
    }
}
