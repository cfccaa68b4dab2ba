//! Archive and data-management configuration lookup
//!
//! Configurations are loaded once from a JSON document:
//!
//! ```json
//! {
//!   "archive_configurations": [ { "id": "s3-main", "provider": "CLOUDIAN", ... } ],
//!   "data_management_configurations": [ { "id": "doc-a", "base_path": "/ProjA", ... } ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use strata_core::models::{ArchiveConfiguration, DataManagementConfiguration};
use strata_core::{AppError, DataTransferType};

#[derive(Debug, Default, Deserialize)]
struct ConfigurationDocument {
    #[serde(default)]
    archive_configurations: Vec<ArchiveConfiguration>,
    #[serde(default)]
    data_management_configurations: Vec<DataManagementConfiguration>,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveConfigurationLocator {
    archives: HashMap<String, ArchiveConfiguration>,
    data_management: Vec<DataManagementConfiguration>,
}

impl ArchiveConfigurationLocator {
    pub fn new(
        archives: Vec<ArchiveConfiguration>,
        data_management: Vec<DataManagementConfiguration>,
    ) -> Result<Self, AppError> {
        let mut by_id = HashMap::with_capacity(archives.len());
        for archive in archives {
            if let Some(previous) = by_id.insert(archive.id.clone(), archive) {
                return Err(AppError::Configuration(format!(
                    "Duplicate archive configuration id: {}",
                    previous.id
                )));
            }
        }

        let locator = Self {
            archives: by_id,
            data_management,
        };
        locator.validate()?;
        Ok(locator)
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let document: ConfigurationDocument = serde_json::from_str(json).map_err(|e| {
            AppError::Configuration(format!("Invalid archive configuration document: {}", e))
        })?;
        Self::new(
            document.archive_configurations,
            document.data_management_configurations,
        )
    }

    pub async fn from_file(path: &Path) -> Result<Self, AppError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Configuration(format!(
                "Failed to read archive configurations from {}: {}",
                path.display(),
                e
            ))
        })?;
        let locator = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            archives = locator.archives.len(),
            data_management = locator.data_management.len(),
            "Archive configurations loaded"
        );
        Ok(locator)
    }

    /// Every data-management configuration must reference known archives.
    fn validate(&self) -> Result<(), AppError> {
        for doc in &self.data_management {
            let referenced = std::iter::once(&doc.s3_upload_configuration_id)
                .chain(doc.globus_upload_configuration_id.iter())
                .chain(doc.s3_default_download_configuration_id.iter());
            for id in referenced {
                if !self.archives.contains_key(id) {
                    return Err(AppError::Configuration(format!(
                        "Data management configuration {} references unknown archive {}",
                        doc.id, id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn archive(&self, id: &str) -> Result<&ArchiveConfiguration, AppError> {
        self.archives.get(id).ok_or_else(|| {
            AppError::Configuration(format!("Unknown archive configuration: {}", id))
        })
    }

    pub fn data_management(&self, id: &str) -> Result<&DataManagementConfiguration, AppError> {
        self.data_management
            .iter()
            .find(|doc| doc.id == id)
            .ok_or_else(|| {
                AppError::Configuration(format!("Unknown data management configuration: {}", id))
            })
    }

    /// The configuration with the longest base path covering `path`.
    pub fn data_management_for_path(
        &self,
        path: &str,
    ) -> Result<&DataManagementConfiguration, AppError> {
        self.data_management
            .iter()
            .filter(|doc| doc.covers(path))
            .max_by_key(|doc| doc.base_path.len())
            .ok_or_else(|| {
                AppError::InvalidRequest(format!(
                    "No data management configuration covers {}",
                    path
                ))
            })
    }

    /// Archive a data-management configuration uploads through for a backend family.
    pub fn upload_archive(
        &self,
        doc: &DataManagementConfiguration,
        transfer_type: DataTransferType,
    ) -> Result<&ArchiveConfiguration, AppError> {
        match transfer_type {
            DataTransferType::Globus => {
                let id = doc.globus_upload_configuration_id.as_deref().ok_or_else(|| {
                    AppError::Configuration(format!(
                        "Data management configuration {} has no managed endpoint archive",
                        doc.id
                    ))
                })?;
                self.archive(id)
            }
            _ => self.archive(&doc.s3_upload_configuration_id),
        }
    }
}
