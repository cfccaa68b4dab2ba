//! Progress reporting for long running transfers

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::traits::{TransferError, TransferResponse, TransferResult, TransferStatusReport};

/// Callbacks for a transfer started with a listener.
///
/// Callbacks run on the backend's own task and may race orchestration calls
/// for the same task id.
#[async_trait]
pub trait TransferProgressListener: Send + Sync {
    async fn progressed(&self, bytes_transferred: u64);

    async fn completed(&self, bytes_transferred: u64);

    async fn failed(&self, message: String);
}

/// Counts bytes and forwards progress to a listener only when the whole
/// percentage changes.
pub struct ProgressTracker {
    listener: Option<Arc<dyn TransferProgressListener>>,
    total: Option<u64>,
    transferred: u64,
    last_percent: Option<u64>,
}

impl ProgressTracker {
    pub fn new(listener: Option<Arc<dyn TransferProgressListener>>, total: Option<u64>) -> Self {
        Self {
            listener,
            total,
            transferred: 0,
            last_percent: None,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn percent(&self) -> Option<u64> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some((self.transferred.min(total) * 100) / total),
            None => None,
        }
    }

    pub async fn advance(&mut self, bytes: u64) {
        self.transferred += bytes;
        let Some(listener) = &self.listener else {
            return;
        };
        let percent = self.percent();
        if percent.is_none() || percent != self.last_percent {
            self.last_percent = percent;
            listener.progressed(self.transferred).await;
        }
    }
}

/// Run `transfer` on a spawned task and report its outcome to `listener`.
pub fn spawn_with_listener<F>(listener: Arc<dyn TransferProgressListener>, transfer: F)
where
    F: Future<Output = Result<u64, String>> + Send + 'static,
{
    tokio::spawn(async move {
        match transfer.await {
            Ok(bytes) => listener.completed(bytes).await,
            Err(message) => {
                tracing::warn!(error = %message, "Background transfer failed");
                listener.failed(message).await
            }
        }
    });
}

/// How long a finished transfer stays visible to `get_transfer_status`.
pub const TERMINAL_REPORT_RETENTION: Duration = Duration::from_secs(3600);

struct TrackedTransfer {
    report: TransferStatusReport,
    finished_at: Option<Instant>,
}

/// In-process transfers started with a listener, addressable by request id
/// for `get_transfer_status` polling.
///
/// Finished transfers are dropped once they are older than the retention
/// window; a later lookup reports them as not found.
#[derive(Clone)]
pub struct BackgroundTransfers {
    reports: Arc<RwLock<HashMap<String, TrackedTransfer>>>,
    retention: Duration,
}

impl Default for BackgroundTransfers {
    fn default() -> Self {
        Self::with_retention(TERMINAL_REPORT_RETENTION)
    }
}

impl BackgroundTransfers {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            reports: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    fn record(&self, request_id: &str, report: TransferStatusReport) {
        let Ok(mut reports) = self.reports.write() else {
            return;
        };
        let now = Instant::now();
        reports.retain(|_, tracked| {
            tracked
                .finished_at
                .is_none_or(|finished| now.duration_since(finished) < self.retention)
        });

        let finished_at = match report {
            TransferStatusReport::InProgress { .. } => None,
            _ => Some(now),
        };
        reports.insert(
            request_id.to_string(),
            TrackedTransfer {
                report,
                finished_at,
            },
        );
    }

    pub fn lookup(&self, request_id: &str) -> TransferResult<TransferStatusReport> {
        self.reports
            .read()
            .map_err(|_| TransferError::BackendError("transfer registry poisoned".to_string()))?
            .get(request_id)
            .map(|tracked| tracked.report.clone())
            .ok_or_else(|| TransferError::NotFound(format!("transfer request {}", request_id)))
    }

    /// Transfers currently tracked, running or finished.
    pub fn tracked(&self) -> usize {
        self.reports.read().map(|reports| reports.len()).unwrap_or(0)
    }

    /// Run `work` inline, or on a spawned task when a listener is given.
    ///
    /// `work` resolves to the bytes moved and an optional checksum.
    pub async fn run<F>(
        &self,
        listener: Option<Arc<dyn TransferProgressListener>>,
        work: F,
    ) -> TransferResult<TransferResponse>
    where
        F: Future<Output = TransferResult<(u64, Option<String>)>> + Send + 'static,
    {
        let Some(listener) = listener else {
            let (bytes, checksum) = work.await?;
            return Ok(TransferResponse::completed(bytes, checksum));
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        self.record(
            &request_id,
            TransferStatusReport::InProgress {
                percent_complete: None,
            },
        );
        let transfers = self.clone();
        let id = request_id.clone();
        spawn_with_listener(listener, async move {
            match work.await {
                Ok((bytes, _)) => {
                    transfers.record(
                        &id,
                        TransferStatusReport::Completed {
                            bytes_transferred: Some(bytes),
                        },
                    );
                    Ok(bytes)
                }
                Err(e) => {
                    let message = e.to_string();
                    transfers.record(
                        &id,
                        TransferStatusReport::Failed {
                            message: message.clone(),
                        },
                    );
                    Err(message)
                }
            }
        });
        Ok(TransferResponse::submitted(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counting {
        progressed: AtomicU64,
        completed: AtomicU64,
    }

    #[async_trait]
    impl TransferProgressListener for Counting {
        async fn progressed(&self, _bytes_transferred: u64) {
            self.progressed.fetch_add(1, Ordering::SeqCst);
        }

        async fn completed(&self, bytes_transferred: u64) {
            self.completed.store(bytes_transferred, Ordering::SeqCst);
        }

        async fn failed(&self, _message: String) {}
    }

    #[tokio::test]
    async fn test_progress_reported_on_percent_change_only() {
        let listener = Arc::new(Counting::default());
        let mut tracker = ProgressTracker::new(Some(listener.clone()), Some(1000));
        for _ in 0..100 {
            tracker.advance(1).await;
        }
        // 100 bytes of 1000 crosses 0..=10 percent: 11 distinct values
        assert_eq!(listener.progressed.load(Ordering::SeqCst), 11);
        assert_eq!(tracker.transferred(), 100);
        assert_eq!(tracker.percent(), Some(10));
    }

    #[tokio::test]
    async fn test_spawn_with_listener_reports_completion() {
        let listener = Arc::new(Counting::default());
        spawn_with_listener(listener.clone(), async { Ok(42) });
        for _ in 0..50 {
            if listener.completed.load(Ordering::SeqCst) == 42 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("listener was not completed");
    }

    #[tokio::test]
    async fn test_background_transfers_record_outcome() {
        let transfers = BackgroundTransfers::default();

        let inline = transfers.run(None, async { Ok((5, None)) }).await.unwrap();
        assert!(inline.completed);
        assert_eq!(inline.bytes_transferred, Some(5));

        let listener = Arc::new(Counting::default());
        let response = transfers
            .run(Some(listener.clone()), async {
                Err(TransferError::TransferFailed("disk full".to_string()))
            })
            .await
            .unwrap();
        let request_id = response.request_id.unwrap();
        for _ in 0..50 {
            if let Ok(TransferStatusReport::Failed { message }) = transfers.lookup(&request_id) {
                assert!(message.contains("disk full"));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("failure was not recorded");
    }

    #[tokio::test]
    async fn test_finished_transfers_expire_after_retention() {
        let transfers = BackgroundTransfers::with_retention(Duration::ZERO);
        let listener = Arc::new(Counting::default());

        let first = transfers
            .run(Some(listener.clone()), async { Ok((7, None)) })
            .await
            .unwrap()
            .request_id
            .unwrap();
        for _ in 0..50 {
            if listener.completed.load(Ordering::SeqCst) == 7 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(
            transfers.lookup(&first),
            Ok(TransferStatusReport::Completed { .. })
        ));

        let second = transfers
            .run(
                Some(listener.clone()),
                std::future::pending::<TransferResult<(u64, Option<String>)>>(),
            )
            .await
            .unwrap()
            .request_id
            .unwrap();

        assert!(matches!(transfers.lookup(&first), Err(TransferError::NotFound(_))));
        assert!(matches!(
            transfers.lookup(&second),
            Ok(TransferStatusReport::InProgress { .. })
        ));
        assert_eq!(transfers.tracked(), 1);
    }
}
