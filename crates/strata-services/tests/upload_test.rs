//! Upload orchestration tests.
//!
//! Run with: `cargo test -p strata-services --test upload_test`

use std::path::PathBuf;

use strata_core::models::{
    DataObjectUploadRequest, DataTransferStatus, FileLocation, TransferEventKind, UploadSource,
    UploadStatus,
};
use strata_core::{AppError, NamespaceIdentity};
use strata_db::UploadCredentialStore;
use strata_services::test_helpers::*;
use strata_services::InvocationContext;
use strata_transfer::{PathAttributes, TransferStatusReport};

fn local_request(path: &str, file: PathBuf) -> DataObjectUploadRequest {
    DataObjectUploadRequest {
        path: path.to_string(),
        user_id: TEST_USER.to_string(),
        configuration_id: DOC_A.to_string(),
        source_file: Some(file),
        ..Default::default()
    }
}

fn remote_request(path: &str, source: FileLocation) -> DataObjectUploadRequest {
    DataObjectUploadRequest {
        path: path.to_string(),
        user_id: TEST_USER.to_string(),
        configuration_id: DOC_A.to_string(),
        source_location: Some(source),
        ..Default::default()
    }
}

fn source_file(harness: &TestHarness, name: &str, len: usize) -> PathBuf {
    let path = harness.download_dir.path().join(name);
    std::fs::write(&path, vec![7u8; len]).unwrap();
    path
}

#[tokio::test]
async fn test_small_local_file_uploads_synchronously() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/small.dat");
    harness.s3.set_synchronous(true);
    let file = source_file(&harness, "small.dat", 10);

    let response = harness
        .uploads()
        .upload(&harness.ctx(), &local_request("/ProjA/small.dat", file))
        .await
        .unwrap();

    assert_eq!(response.status, UploadStatus::Completed);
    assert_eq!(response.archive_configuration_id, S3_ARCHIVE);
    assert_eq!(response.archive_location, FileLocation::new("bucket", "root/ProjA/small.dat"));

    let uploads = harness.s3.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(matches!(uploads[0].source, UploadSource::LocalFile(_)));
    assert_eq!(uploads[0].metadata.get("strata-path").unwrap(), "/ProjA/small.dat");

    let metadata = harness.namespace.metadata("/ProjA/small.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Archived);
    assert_eq!(metadata.source_size, Some(10));
    assert_eq!(harness.emitter.kinds(), vec![TransferEventKind::UploadArchived]);
}

#[tokio::test]
async fn test_large_local_file_reports_through_listener() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/large.dat");
    let file = source_file(&harness, "large.dat", 2 * STREAMING_THRESHOLD as usize);

    let response = harness
        .uploads()
        .upload(&harness.ctx(), &local_request("/ProjA/large.dat", file))
        .await
        .unwrap();
    assert_eq!(response.status, UploadStatus::InProgress);

    let metadata = harness.namespace.metadata("/ProjA/large.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::InProgressToArchive);

    let request_id = response.data_transfer_request_id.unwrap();
    let listener = harness.s3.listener(&request_id).expect("listener attached");
    listener.progressed(STREAMING_THRESHOLD).await;
    assert!(harness
        .namespace
        .updates()
        .iter()
        .any(|(_, _, update)| update.data_transfer_percent_complete == Some(50)));

    listener.completed(2 * STREAMING_THRESHOLD).await;
    listener.completed(2 * STREAMING_THRESHOLD).await;

    let metadata = harness.namespace.metadata("/ProjA/large.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Archived);
    assert_eq!(harness.emitter.kinds(), vec![TransferEventKind::UploadArchived]);
}

#[tokio::test]
async fn test_failure_revokes_source_credential_once() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/large.dat");
    let file = source_file(&harness, "large.dat", 4 * STREAMING_THRESHOLD as usize);
    let mut request = local_request("/ProjA/large.dat", file);
    request.source_access_token = Some("delegated-token".to_string());

    let response = harness
        .uploads()
        .upload(&harness.ctx(), &request)
        .await
        .unwrap();
    let listener = harness
        .s3
        .listener(&response.data_transfer_request_id.unwrap())
        .unwrap();

    listener.failed("connection reset".to_string()).await;
    listener.failed("connection reset".to_string()).await;

    assert_eq!(harness.revoker.revoked(), vec!["delegated-token".to_string()]);
    let metadata = harness.namespace.metadata("/ProjA/large.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Failed);
    let events = harness.emitter.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, TransferEventKind::UploadFailed);
    assert_eq!(events[0].message.as_deref(), Some("connection reset"));
}

#[tokio::test]
async fn test_synchronous_transfer_error_marks_upload_failed() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/small.dat");
    harness.s3.set_synchronous(true);
    harness.s3.fail_transfers(Some("boom"));
    let file = source_file(&harness, "small.dat", 10);
    let mut request = local_request("/ProjA/small.dat", file);
    request.source_access_token = Some("delegated-token".to_string());
    let uploads = harness.uploads();

    let result = uploads.upload(&harness.ctx(), &request).await;
    assert!(matches!(result, Err(AppError::TransferFailed(_))));

    let metadata = harness.namespace.metadata("/ProjA/small.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Failed);
    let events = harness.emitter.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, TransferEventKind::UploadFailed);
    assert!(events[0].message.as_deref().unwrap().contains("boom"));
    assert_eq!(harness.revoker.revoked(), vec!["delegated-token".to_string()]);

    let status = uploads
        .refresh_upload_status(&harness.ctx(), "/ProjA/small.dat")
        .await
        .unwrap();
    assert_eq!(status, UploadStatus::Failed);
}

#[tokio::test]
async fn test_saturated_backend_leaves_upload_received() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/queued.dat");
    harness.s3.set_accepts(false);
    let file = source_file(&harness, "queued.dat", 10);

    let response = harness
        .uploads()
        .upload(&harness.ctx(), &local_request("/ProjA/queued.dat", file))
        .await
        .unwrap();

    assert_eq!(response.status, UploadStatus::Received);
    assert_eq!(harness.s3.transfer_count(), 0);
    assert!(harness.namespace.updates().is_empty());
    assert!(harness.emitter.events().is_empty());
}

#[tokio::test]
async fn test_remote_source_is_validated_before_transfer() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/remote.dat");
    let source = FileLocation::new("user-endpoint", "/data/remote.dat");
    let uploads = harness.uploads();

    let missing = uploads
        .upload(&harness.ctx(), &remote_request("/ProjA/remote.dat", source.clone()))
        .await;
    assert!(matches!(missing, Err(AppError::SourceNotFound(_))));

    harness
        .globus
        .set_attributes(source.clone(), PathAttributes::directory());
    let directory = uploads
        .upload(&harness.ctx(), &remote_request("/ProjA/remote.dat", source.clone()))
        .await;
    assert!(matches!(directory, Err(AppError::SourceIsDirectory(_))));

    harness.globus.set_attributes(
        source.clone(),
        PathAttributes {
            is_accessible: false,
            ..Default::default()
        },
    );
    let denied = uploads
        .upload(&harness.ctx(), &remote_request("/ProjA/remote.dat", source))
        .await;
    assert!(matches!(denied, Err(AppError::SourceNotAccessible(_))));

    assert_eq!(harness.globus.transfer_count(), 0);
}

#[tokio::test]
async fn test_missing_local_file_rejected() {
    let harness = TestHarness::new();
    let request = local_request("/ProjA/none.dat", PathBuf::from("/nonexistent/none.dat"));

    let result = harness.uploads().upload(&harness.ctx(), &request).await;

    assert!(matches!(result, Err(AppError::SourceNotFound(_))));
    assert_eq!(harness.s3.transfer_count(), 0);
}

#[tokio::test]
async fn test_both_sources_rejected() {
    let harness = TestHarness::new();
    let mut request = remote_request("/ProjA/x.dat", FileLocation::new("ep", "/x.dat"));
    request.source_file = Some(PathBuf::from("/tmp/x.dat"));

    let result = harness.uploads().upload(&harness.ctx(), &request).await;

    assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    assert!(harness.s3.calls().is_empty());
    assert!(harness.globus.calls().is_empty());
}

#[tokio::test]
async fn test_managed_endpoint_upload_polled_to_completion() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/remote.dat");
    let source = FileLocation::new("user-endpoint", "/data/remote.dat");
    harness
        .globus
        .set_attributes(source.clone(), PathAttributes::file(Some(500)));

    let response = harness
        .uploads()
        .upload(&harness.ctx(), &remote_request("/ProjA/remote.dat", source))
        .await
        .unwrap();
    assert_eq!(response.status, UploadStatus::InProgress);
    assert_eq!(response.archive_configuration_id, GLOBUS_ARCHIVE);
    let request_id = response.data_transfer_request_id.unwrap();

    let uploads = harness.uploads();
    let status = uploads
        .refresh_upload_status(&harness.ctx(), "/ProjA/remote.dat")
        .await
        .unwrap();
    assert_eq!(status, UploadStatus::InProgress);

    harness.globus.set_status(
        &request_id,
        TransferStatusReport::Completed {
            bytes_transferred: Some(500),
        },
    );
    let status = uploads
        .refresh_upload_status(&harness.ctx(), "/ProjA/remote.dat")
        .await
        .unwrap();
    assert_eq!(status, UploadStatus::Completed);

    let metadata = harness.namespace.metadata("/ProjA/remote.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Archived);
    assert_eq!(metadata.source_size, Some(500));
    assert_eq!(harness.emitter.kinds(), vec![TransferEventKind::UploadArchived]);

    // Already terminal: no further backend polling
    let polls = harness.globus.call_count("status");
    uploads
        .refresh_upload_status(&harness.ctx(), "/ProjA/remote.dat")
        .await
        .unwrap();
    assert_eq!(harness.globus.call_count("status"), polls);
}

#[tokio::test]
async fn test_backend_token_reused_within_one_invocation() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/remote.dat");
    let source = FileLocation::new("user-endpoint", "/data/remote.dat");
    harness
        .globus
        .set_attributes(source.clone(), PathAttributes::file(Some(1)));
    let request = remote_request("/ProjA/remote.dat", source);

    let ctx = harness.ctx();
    harness.uploads().upload(&ctx, &request).await.unwrap();
    assert_eq!(harness.globus.call_count("authenticate"), 1);
    assert_eq!(ctx.tokens().len(), 1);

    harness
        .uploads()
        .upload(&InvocationContext::new(TEST_USER), &request)
        .await
        .unwrap();
    assert_eq!(harness.globus.call_count("authenticate"), 2);
}

#[tokio::test]
async fn test_metadata_updates_run_as_caller() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/small.dat");
    harness.s3.set_synchronous(true);
    let file = source_file(&harness, "small.dat", 10);

    harness
        .uploads()
        .upload(&harness.ctx(), &local_request("/ProjA/small.dat", file))
        .await
        .unwrap();

    assert!(harness
        .namespace
        .updates()
        .iter()
        .all(|(identity, _, _)| *identity == NamespaceIdentity::User(TEST_USER.to_string())));
}

#[tokio::test]
async fn test_failed_managed_endpoint_upload_revokes_source_token() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/remote.dat");
    let source = FileLocation::new("user-endpoint", "/data/remote.dat");
    harness
        .globus
        .set_attributes(source.clone(), PathAttributes::file(Some(500)));
    let mut request = remote_request("/ProjA/remote.dat", source);
    request.source_access_token = Some("delegated-token".to_string());
    let uploads = harness.uploads();

    let response = uploads.upload(&harness.ctx(), &request).await.unwrap();
    assert_eq!(response.status, UploadStatus::InProgress);
    assert!(harness.revoker.revoked().is_empty());

    harness.globus.set_status(
        &response.data_transfer_request_id.unwrap(),
        TransferStatusReport::Failed {
            message: "endpoint offline".to_string(),
        },
    );
    let status = uploads
        .refresh_upload_status(&harness.ctx(), "/ProjA/remote.dat")
        .await
        .unwrap();
    assert_eq!(status, UploadStatus::Failed);

    assert_eq!(harness.revoker.revoked(), vec!["delegated-token".to_string()]);
    assert_eq!(harness.emitter.kinds(), vec![TransferEventKind::UploadFailed]);
    assert!(harness
        .store
        .take_upload_source_token("/ProjA/remote.dat")
        .await
        .unwrap()
        .is_none());

    uploads
        .refresh_upload_status(&harness.ctx(), "/ProjA/remote.dat")
        .await
        .unwrap();
    assert_eq!(harness.revoker.revoked().len(), 1);
}

#[tokio::test]
async fn test_completed_managed_endpoint_upload_drops_source_token() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/remote.dat");
    let source = FileLocation::new("user-endpoint", "/data/remote.dat");
    harness
        .globus
        .set_attributes(source.clone(), PathAttributes::file(Some(500)));
    let mut request = remote_request("/ProjA/remote.dat", source);
    request.source_access_token = Some("delegated-token".to_string());
    let uploads = harness.uploads();

    let response = uploads.upload(&harness.ctx(), &request).await.unwrap();
    harness.globus.set_status(
        &response.data_transfer_request_id.unwrap(),
        TransferStatusReport::Completed {
            bytes_transferred: Some(500),
        },
    );
    let status = uploads
        .refresh_upload_status(&harness.ctx(), "/ProjA/remote.dat")
        .await
        .unwrap();

    assert_eq!(status, UploadStatus::Completed);
    assert!(harness.revoker.revoked().is_empty());
    assert!(harness
        .store
        .take_upload_source_token("/ProjA/remote.dat")
        .await
        .unwrap()
        .is_none());
}
