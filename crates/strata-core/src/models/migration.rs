use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::FileLocation;
use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationType {
    DataObject,
    Collection,
    DataObjectList,
    CollectionList,
}

impl MigrationType {
    pub fn is_bulk(&self) -> bool {
        !matches!(self, MigrationType::DataObject)
    }
}

impl Display for MigrationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MigrationType::DataObject => write!(f, "DATA_OBJECT"),
            MigrationType::Collection => write!(f, "COLLECTION"),
            MigrationType::DataObjectList => write!(f, "DATA_OBJECT_LIST"),
            MigrationType::CollectionList => write!(f, "COLLECTION_LIST"),
        }
    }
}

impl FromStr for MigrationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DATA_OBJECT" => Ok(MigrationType::DataObject),
            "COLLECTION" => Ok(MigrationType::Collection),
            "DATA_OBJECT_LIST" => Ok(MigrationType::DataObjectList),
            "COLLECTION_LIST" => Ok(MigrationType::CollectionList),
            _ => Err(anyhow::anyhow!("Invalid migration type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Received,
    InProgress,
}

impl Display for MigrationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MigrationStatus::Received => write!(f, "RECEIVED"),
            MigrationStatus::InProgress => write!(f, "IN_PROGRESS"),
        }
    }
}

impl FromStr for MigrationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(MigrationStatus::Received),
            "IN_PROGRESS" => Ok(MigrationStatus::InProgress),
            _ => Err(anyhow::anyhow!("Invalid migration status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationResult {
    Completed,
    Failed,
    Ignored,
    CompletedWithIgnoredItems,
}

impl MigrationResult {
    /// Aggregate the results of a bulk migration's children.
    ///
    /// Any failure fails the parent; otherwise any ignored child marks the
    /// parent `CompletedWithIgnoredItems`.
    pub fn aggregate<I>(children: I) -> MigrationResult
    where
        I: IntoIterator<Item = MigrationResult>,
    {
        let mut ignored = false;
        for result in children {
            match result {
                MigrationResult::Failed => return MigrationResult::Failed,
                MigrationResult::Ignored | MigrationResult::CompletedWithIgnoredItems => {
                    ignored = true
                }
                MigrationResult::Completed => {}
            }
        }
        if ignored {
            MigrationResult::CompletedWithIgnoredItems
        } else {
            MigrationResult::Completed
        }
    }
}

impl Display for MigrationResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MigrationResult::Completed => write!(f, "COMPLETED"),
            MigrationResult::Failed => write!(f, "FAILED"),
            MigrationResult::Ignored => write!(f, "IGNORED"),
            MigrationResult::CompletedWithIgnoredItems => write!(f, "COMPLETED_WITH_IGNORED_ITEMS"),
        }
    }
}

impl FromStr for MigrationResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(MigrationResult::Completed),
            "FAILED" => Ok(MigrationResult::Failed),
            "IGNORED" => Ok(MigrationResult::Ignored),
            "COMPLETED_WITH_IGNORED_ITEMS" => Ok(MigrationResult::CompletedWithIgnoredItems),
            _ => Err(anyhow::anyhow!("Invalid migration result: {}", s)),
        }
    }
}

/// Inbound request to migrate a collection or a list of paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkMigrationRequest {
    pub migration_type: MigrationType,
    pub user_id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub data_object_paths: Vec<String>,
    #[serde(default)]
    pub collection_paths: Vec<String>,
    pub to_s3_archive_configuration_id: String,
}

impl BulkMigrationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.to_s3_archive_configuration_id.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "No target archive configuration was provided".to_string(),
            ));
        }
        let valid = match self.migration_type {
            MigrationType::DataObject => false,
            MigrationType::Collection => {
                self.path.as_deref().is_some_and(|p| !p.trim().is_empty())
            }
            MigrationType::DataObjectList => !self.data_object_paths.is_empty(),
            MigrationType::CollectionList => !self.collection_paths.is_empty(),
        };
        if valid {
            Ok(())
        } else {
            Err(AppError::InvalidRequest(format!(
                "Invalid {} migration request",
                self.migration_type
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMigrationTask {
    pub id: Uuid,
    /// Set on data object tasks spawned by a bulk task
    pub parent_id: Option<Uuid>,
    pub user_id: String,
    pub path: Option<String>,
    pub configuration_id: String,
    pub from_s3_archive_configuration_id: String,
    pub to_s3_archive_configuration_id: String,
    pub migration_type: MigrationType,
    pub status: MigrationStatus,
    pub data_object_id: Option<String>,
    pub registrar_id: Option<String>,
    pub from_s3_archive_location: Option<FileLocation>,
    pub to_s3_archive_location: Option<FileLocation>,
    #[serde(default)]
    pub data_object_paths: Vec<String>,
    #[serde(default)]
    pub collection_paths: Vec<String>,
    #[serde(default)]
    pub percent_complete: i32,
    pub created: DateTime<Utc>,
}

impl DataMigrationTask {
    pub fn new(
        migration_type: MigrationType,
        user_id: impl Into<String>,
        configuration_id: impl Into<String>,
        from_s3_archive_configuration_id: impl Into<String>,
        to_s3_archive_configuration_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            user_id: user_id.into(),
            path: None,
            configuration_id: configuration_id.into(),
            from_s3_archive_configuration_id: from_s3_archive_configuration_id.into(),
            to_s3_archive_configuration_id: to_s3_archive_configuration_id.into(),
            migration_type,
            status: MigrationStatus::Received,
            data_object_id: None,
            registrar_id: None,
            from_s3_archive_location: None,
            to_s3_archive_location: None,
            data_object_paths: Vec::new(),
            collection_paths: Vec::new(),
            percent_complete: 0,
            created: Utc::now(),
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.from_s3_archive_configuration_id == self.to_s3_archive_configuration_id
    }

    pub fn display_path(&self) -> String {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let mut paths = self.data_object_paths.clone();
        paths.extend(self.collection_paths.iter().cloned());
        paths.join(",")
    }
}

/// Terminal record of a migration, written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMigrationTaskResult {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub user_id: String,
    pub path: Option<String>,
    pub configuration_id: String,
    pub from_s3_archive_configuration_id: String,
    pub to_s3_archive_configuration_id: String,
    pub migration_type: MigrationType,
    pub result: MigrationResult,
    pub message: Option<String>,
    pub data_object_id: Option<String>,
    pub from_s3_archive_location: Option<FileLocation>,
    pub to_s3_archive_location: Option<FileLocation>,
    #[serde(default)]
    pub data_object_paths: Vec<String>,
    #[serde(default)]
    pub collection_paths: Vec<String>,
    pub created: DateTime<Utc>,
    pub completed: DateTime<Utc>,
}

impl DataMigrationTaskResult {
    pub fn from_task(
        task: &DataMigrationTask,
        result: MigrationResult,
        message: Option<String>,
    ) -> Self {
        Self {
            id: task.id,
            parent_id: task.parent_id,
            user_id: task.user_id.clone(),
            path: task.path.clone(),
            configuration_id: task.configuration_id.clone(),
            from_s3_archive_configuration_id: task.from_s3_archive_configuration_id.clone(),
            to_s3_archive_configuration_id: task.to_s3_archive_configuration_id.clone(),
            migration_type: task.migration_type,
            result,
            message,
            data_object_id: task.data_object_id.clone(),
            from_s3_archive_location: task.from_s3_archive_location.clone(),
            to_s3_archive_location: task.to_s3_archive_location.clone(),
            data_object_paths: task.data_object_paths.clone(),
            collection_paths: task.collection_paths.clone(),
            created: task.created,
            completed: Utc::now(),
        }
    }
}

/// Either an active migration task or its terminal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationTaskStatusReport {
    Active(Box<DataMigrationTask>),
    Finished(Box<DataMigrationTaskResult>),
}
