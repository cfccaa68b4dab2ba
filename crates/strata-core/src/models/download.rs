use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::FileLocation;
use crate::transfer_types::DataTransferType;
use crate::AppError;

/// Status of an active data object download. Terminal outcomes live in
/// [`DownloadTaskResult`], never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadTaskStatus {
    /// Accepted but waiting for backend admission
    Received,
    InProgress,
}

impl Display for DownloadTaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DownloadTaskStatus::Received => write!(f, "RECEIVED"),
            DownloadTaskStatus::InProgress => write!(f, "IN_PROGRESS"),
        }
    }
}

impl FromStr for DownloadTaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(DownloadTaskStatus::Received),
            "IN_PROGRESS" => Ok(DownloadTaskStatus::InProgress),
            _ => Err(anyhow::anyhow!("Invalid download task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionDownloadTaskStatus {
    Received,
    Active,
    Canceled,
}

impl Display for CollectionDownloadTaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CollectionDownloadTaskStatus::Received => write!(f, "RECEIVED"),
            CollectionDownloadTaskStatus::Active => write!(f, "ACTIVE"),
            CollectionDownloadTaskStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl FromStr for CollectionDownloadTaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(CollectionDownloadTaskStatus::Received),
            "ACTIVE" => Ok(CollectionDownloadTaskStatus::Active),
            "CANCELED" => Ok(CollectionDownloadTaskStatus::Canceled),
            _ => Err(anyhow::anyhow!("Invalid collection download status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadTaskType {
    DataObject,
    Collection,
    CollectionList,
    DataObjectList,
}

impl Display for DownloadTaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DownloadTaskType::DataObject => write!(f, "DATA_OBJECT"),
            DownloadTaskType::Collection => write!(f, "COLLECTION"),
            DownloadTaskType::CollectionList => write!(f, "COLLECTION_LIST"),
            DownloadTaskType::DataObjectList => write!(f, "DATA_OBJECT_LIST"),
        }
    }
}

impl FromStr for DownloadTaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DATA_OBJECT" => Ok(DownloadTaskType::DataObject),
            "COLLECTION" => Ok(DownloadTaskType::Collection),
            "COLLECTION_LIST" => Ok(DownloadTaskType::CollectionList),
            "DATA_OBJECT_LIST" => Ok(DownloadTaskType::DataObjectList),
            _ => Err(anyhow::anyhow!("Invalid download task type: {}", s)),
        }
    }
}

/// Where the caller wants the bytes delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDestination {
    pub transfer_type: DataTransferType,
    pub location: FileLocation,
    /// Caller supplied credential for third-party destinations (drive, cloud storage).
    /// Encrypted at rest when an encryption key is configured.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl DownloadDestination {
    pub fn new(transfer_type: DataTransferType, location: FileLocation) -> Self {
        Self {
            transfer_type,
            location,
            access_token: None,
        }
    }
}

/// Inbound request to download one data object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataObjectDownloadRequest {
    pub path: String,
    pub user_id: String,
    /// `None` downloads into a private file in the local download directory
    #[serde(default)]
    pub destination: Option<DownloadDestination>,
    #[serde(default)]
    pub completion_event: bool,
}

/// Inbound request to download a collection or a list of paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDownloadRequest {
    pub task_type: DownloadTaskType,
    pub user_id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    pub destination: DownloadDestination,
    #[serde(default)]
    pub completion_event: bool,
}

impl CollectionDownloadRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        self.destination.location.validate()?;
        match self.task_type {
            DownloadTaskType::DataObject => Err(AppError::InvalidRequest(
                "Data object downloads are not collection downloads".to_string(),
            )),
            DownloadTaskType::Collection => match self.path.as_deref() {
                Some(path) if !path.trim().is_empty() => Ok(()),
                _ => Err(AppError::InvalidRequest(
                    "No collection path was provided".to_string(),
                )),
            },
            DownloadTaskType::CollectionList | DownloadTaskType::DataObjectList => {
                if self.paths.is_empty() || self.paths.iter().any(|p| p.trim().is_empty()) {
                    Err(AppError::InvalidRequest(
                        "A non-empty list of paths is required".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Synchronous outcome of issuing a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferOutcome {
    /// The backend finished the transfer before returning
    Completed,
    /// Submitted; completion is reported through a listener or by polling
    InProgress,
    /// The backend is saturated; a scheduler resubmits later
    Queued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataObjectDownloadTask {
    pub id: Uuid,
    pub user_id: String,
    pub path: String,
    pub configuration_id: String,
    pub s3_archive_configuration_id: String,
    /// Backend driving the current hop
    pub data_transfer_type: DataTransferType,
    pub data_transfer_status: DownloadTaskStatus,
    pub data_transfer_request_id: Option<String>,
    pub archive_location: FileLocation,
    pub destination: DownloadDestination,
    /// Local staging file written by the first hop
    pub download_file_path: Option<String>,
    /// Source of the second hop, as the destination backend sees the staging file
    pub staging_source_location: Option<FileLocation>,
    pub size: Option<i64>,
    pub percent_complete: i32,
    pub completion_event: bool,
    pub collection_download_task_id: Option<Uuid>,
    pub created: DateTime<Utc>,
}

impl DataObjectDownloadTask {
    /// A first-hop task is still reading from the archive into local staging.
    pub fn is_first_hop(&self) -> bool {
        self.staging_source_location.is_some()
            && self.data_transfer_type != self.destination.transfer_type
    }
}

/// Outcome of one item of a collection (or list) download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDownloadItem {
    pub path: String,
    pub data_object_download_task_id: Option<Uuid>,
    pub result: Option<bool>,
    pub message: Option<String>,
    #[serde(default)]
    pub percent_complete: i32,
}

impl CollectionDownloadItem {
    pub fn is_terminal(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDownloadTask {
    pub id: Uuid,
    pub user_id: String,
    pub task_type: DownloadTaskType,
    /// Collection path for `Collection` tasks
    pub path: Option<String>,
    /// Paths for list tasks
    #[serde(default)]
    pub paths: Vec<String>,
    pub configuration_id: String,
    pub destination: DownloadDestination,
    pub status: CollectionDownloadTaskStatus,
    #[serde(default)]
    pub items: Vec<CollectionDownloadItem>,
    pub completion_event: bool,
    pub created: DateTime<Utc>,
}

impl CollectionDownloadTask {
    pub fn all_items_terminal(&self) -> bool {
        self.items.iter().all(CollectionDownloadItem::is_terminal)
    }

    /// A collection download succeeds when every item succeeded.
    pub fn derived_result(&self) -> bool {
        self.items.iter().all(|item| item.result == Some(true))
    }

    pub fn display_path(&self) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => self.paths.join(","),
        }
    }
}

/// Terminal record of a download, written exactly once when the active task is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTaskResult {
    pub id: Uuid,
    pub user_id: String,
    pub path: String,
    pub task_type: DownloadTaskType,
    pub data_transfer_type: DataTransferType,
    pub destination_type: DataTransferType,
    pub destination_location: FileLocation,
    pub data_transfer_request_id: Option<String>,
    pub result: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub items: Vec<CollectionDownloadItem>,
    pub completion_event: bool,
    pub created: DateTime<Utc>,
    pub completed: DateTime<Utc>,
}

impl DownloadTaskResult {
    pub fn for_data_object(
        task: &DataObjectDownloadTask,
        result: bool,
        message: Option<String>,
    ) -> Self {
        Self {
            id: task.id,
            user_id: task.user_id.clone(),
            path: task.path.clone(),
            task_type: DownloadTaskType::DataObject,
            data_transfer_type: task.data_transfer_type,
            destination_type: task.destination.transfer_type,
            destination_location: task.destination.location.clone(),
            data_transfer_request_id: task.data_transfer_request_id.clone(),
            result,
            message,
            items: Vec::new(),
            completion_event: task.completion_event,
            created: task.created,
            completed: Utc::now(),
        }
    }

    pub fn for_collection(task: &CollectionDownloadTask, message: Option<String>) -> Self {
        Self {
            id: task.id,
            user_id: task.user_id.clone(),
            path: task.display_path(),
            task_type: task.task_type,
            data_transfer_type: task.destination.transfer_type,
            destination_type: task.destination.transfer_type,
            destination_location: task.destination.location.clone(),
            data_transfer_request_id: None,
            result: task.derived_result(),
            message,
            items: task.items.clone(),
            completion_event: task.completion_event,
            created: task.created,
            completed: Utc::now(),
        }
    }
}

/// Either an active task or its terminal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadTaskStatusReport {
    Active(Box<DataObjectDownloadTask>),
    ActiveCollection(Box<CollectionDownloadTask>),
    Finished(Box<DownloadTaskResult>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    /// Present when a durable task tracks the transfer
    pub task_id: Option<Uuid>,
    pub outcome: TransferOutcome,
    pub destination_location: FileLocation,
    pub download_file_path: Option<String>,
    pub data_transfer_request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(items: Vec<CollectionDownloadItem>) -> CollectionDownloadTask {
        CollectionDownloadTask {
            id: Uuid::new_v4(),
            user_id: "user".to_string(),
            task_type: DownloadTaskType::Collection,
            path: Some("/ProjA".to_string()),
            paths: Vec::new(),
            configuration_id: "doc".to_string(),
            destination: DownloadDestination::new(
                DataTransferType::Globus,
                FileLocation::new("ep", "/dest"),
            ),
            status: CollectionDownloadTaskStatus::Active,
            items,
            completion_event: false,
            created: Utc::now(),
        }
    }

    fn item(result: Option<bool>) -> CollectionDownloadItem {
        CollectionDownloadItem {
            path: "/ProjA/a".to_string(),
            data_object_download_task_id: Some(Uuid::new_v4()),
            result,
            message: None,
            percent_complete: 0,
        }
    }

    #[test]
    fn test_collection_derived_result() {
        let pending = collection(vec![item(Some(true)), item(None)]);
        assert!(!pending.all_items_terminal());

        let ok = collection(vec![item(Some(true)), item(Some(true))]);
        assert!(ok.all_items_terminal());
        assert!(ok.derived_result());

        let failed = collection(vec![item(Some(true)), item(Some(false))]);
        assert!(!failed.derived_result());
    }

    #[test]
    fn test_collection_request_validation() {
        let mut request = CollectionDownloadRequest {
            task_type: DownloadTaskType::Collection,
            user_id: "user".to_string(),
            path: None,
            paths: Vec::new(),
            destination: DownloadDestination::new(
                DataTransferType::Globus,
                FileLocation::new("ep", "/dest"),
            ),
            completion_event: false,
        };
        assert!(matches!(request.validate(), Err(AppError::InvalidRequest(_))));
        request.path = Some("/ProjA".to_string());
        assert!(request.validate().is_ok());

        request.task_type = DownloadTaskType::DataObjectList;
        assert!(request.validate().is_err());
        request.paths = vec!["/ProjA/a".to_string(), "/ProjA/b".to_string()];
        assert!(request.validate().is_ok());

        request.task_type = DownloadTaskType::DataObject;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!(
            "IN_PROGRESS".parse::<DownloadTaskStatus>().unwrap(),
            DownloadTaskStatus::InProgress
        );
        assert_eq!(
            CollectionDownloadTaskStatus::Canceled.to_string(),
            "CANCELED"
        );
        assert!("DONE".parse::<DownloadTaskType>().is_err());
    }
}
