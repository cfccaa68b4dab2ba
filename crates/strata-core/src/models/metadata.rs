use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FileLocation;
use crate::transfer_types::DataTransferType;

/// Where an object's bytes are with respect to its archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataTransferStatus {
    Received,
    InProgressToArchive,
    Archived,
    Failed,
    MigrationInProgress,
}

/// Provider-side transition into the deep archive tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeepArchiveStatus {
    InProgress,
    DeepArchived,
}

impl DeepArchiveStatus {
    /// Classify an object-store storage class. `None` means the object is in a
    /// standard tier.
    pub fn from_storage_class(storage_class: Option<&str>) -> Option<DeepArchiveStatus> {
        match storage_class.map(|s| s.to_uppercase()) {
            Some(class) if class == "GLACIER" || class == "DEEP_ARCHIVE" => {
                Some(DeepArchiveStatus::DeepArchived)
            }
            Some(class) if class == "GLACIER_IR" || class == "INTELLIGENT_TIERING" => {
                Some(DeepArchiveStatus::InProgress)
            }
            _ => None,
        }
    }
}

/// System generated metadata the namespace keeps for each data object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemGeneratedMetadata {
    pub object_id: String,
    pub registrar_id: String,
    pub configuration_id: String,
    pub s3_archive_configuration_id: String,
    pub data_transfer_type: DataTransferType,
    pub archive_location: FileLocation,
    pub checksum: Option<String>,
    pub source_size: Option<u64>,
    pub data_transfer_status: DataTransferStatus,
    pub data_transfer_request_id: Option<String>,
    pub deep_archive_status: Option<DeepArchiveStatus>,
    pub deep_archive_date: Option<DateTime<Utc>>,
}

/// Partial update of [`SystemGeneratedMetadata`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetadataUpdate {
    pub archive_location: Option<FileLocation>,
    pub s3_archive_configuration_id: Option<String>,
    pub data_transfer_type: Option<DataTransferType>,
    pub checksum: Option<String>,
    pub source_size: Option<u64>,
    pub data_transfer_status: Option<DataTransferStatus>,
    pub data_transfer_request_id: Option<String>,
    pub data_transfer_percent_complete: Option<u8>,
    pub deep_archive_status: Option<DeepArchiveStatus>,
    pub deep_archive_date: Option<DateTime<Utc>>,
    pub data_transfer_completed: Option<DateTime<Utc>>,
}

impl SystemMetadataUpdate {
    pub fn status(status: DataTransferStatus) -> Self {
        Self {
            data_transfer_status: Some(status),
            ..Default::default()
        }
    }
}

/// Immediate children of a collection, as reported by the namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionListing {
    pub data_objects: Vec<String>,
    pub sub_collections: Vec<String>,
}
