use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::FileLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferEventKind {
    DownloadCompleted,
    DownloadFailed,
    UploadArchived,
    UploadFailed,
}

/// Terminal notification handed to the event emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub kind: TransferEventKind,
    pub user_id: String,
    pub path: String,
    pub task_id: Option<Uuid>,
    pub source: Option<FileLocation>,
    pub destination: Option<FileLocation>,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn new(
        kind: TransferEventKind,
        user_id: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            path: path.into(),
            task_id: None,
            source: None,
            destination: None,
            message: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_source(mut self, source: FileLocation) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_destination(mut self, destination: FileLocation) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
