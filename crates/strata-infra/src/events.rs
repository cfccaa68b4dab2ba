//! Transfer events as structured log records
//!
//! Every terminal notification is written under the `strata::events` target,
//! so a log shipper can route them to the notification subsystem.

use async_trait::async_trait;
use chrono::Utc;
use strata_core::models::{TransferEvent, TransferEventKind};
use strata_core::{AppError, EventEmitter};

#[derive(Debug, Default, Clone)]
pub struct TracingEventEmitter;

impl TracingEventEmitter {
    pub fn new() -> Self {
        Self
    }
}

fn is_failure(kind: TransferEventKind) -> bool {
    matches!(
        kind,
        TransferEventKind::DownloadFailed | TransferEventKind::UploadFailed
    )
}

#[async_trait]
impl EventEmitter for TracingEventEmitter {
    async fn emit(&self, event: TransferEvent) -> Result<(), AppError> {
        let payload = serde_json::to_string(&event)?;
        let delay_ms = (Utc::now() - event.occurred_at).num_milliseconds();
        let task_id = event.task_id.map(|id| id.to_string()).unwrap_or_default();

        if is_failure(event.kind) {
            tracing::warn!(
                target: "strata::events",
                kind = ?event.kind,
                user_id = %event.user_id,
                path = %event.path,
                task_id = %task_id,
                message = event.message.as_deref().unwrap_or(""),
                delay_ms,
                payload = %payload,
                "Transfer event"
            );
        } else {
            tracing::info!(
                target: "strata::events",
                kind = ?event.kind,
                user_id = %event.user_id,
                path = %event.path,
                task_id = %task_id,
                delay_ms,
                payload = %payload,
                "Transfer event"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_event(kind: TransferEventKind) -> TransferEvent {
        TransferEvent::new(kind, "alice", "/ProjA/a.dat").with_message("done")
    }

    #[tokio::test]
    async fn test_emit_never_fails() {
        let emitter = TracingEventEmitter::new();
        for kind in [
            TransferEventKind::DownloadCompleted,
            TransferEventKind::DownloadFailed,
            TransferEventKind::UploadArchived,
            TransferEventKind::UploadFailed,
        ] {
            assert!(emitter.emit(task_event(kind)).await.is_ok());
        }
    }

    #[test]
    fn test_failure_kinds() {
        assert!(is_failure(TransferEventKind::UploadFailed));
        assert!(!is_failure(TransferEventKind::UploadArchived));
    }
}
