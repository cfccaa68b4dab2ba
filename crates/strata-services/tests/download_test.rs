//! Download orchestration tests: direct and two-hop transfers, queueing,
//! finalize-once, collection downloads.

use std::path::Path;

use strata_core::models::{
    CollectionDownloadRequest, CollectionDownloadTaskStatus, DataObjectDownloadRequest,
    DownloadDestination, DownloadTaskStatus, DownloadTaskStatusReport, DownloadTaskType,
    FileLocation, TransferEventKind, TransferOutcome,
};
use strata_core::{AppError, DataTransferType};
use strata_db::DownloadTaskStore;
use strata_services::test_helpers::*;
use strata_transfer::{DownloadTarget, PathAttributes, TransferStatusReport};
use uuid::Uuid;

fn to(transfer_type: DataTransferType, container: &str, file_id: &str) -> DownloadDestination {
    DownloadDestination::new(transfer_type, FileLocation::new(container, file_id))
}

fn request(path: &str, destination: Option<DownloadDestination>) -> DataObjectDownloadRequest {
    DataObjectDownloadRequest {
        path: path.to_string(),
        user_id: TEST_USER.to_string(),
        destination,
        completion_event: true,
    }
}

fn collection_request(path: &str, destination: DownloadDestination) -> CollectionDownloadRequest {
    CollectionDownloadRequest {
        task_type: DownloadTaskType::Collection,
        user_id: TEST_USER.to_string(),
        path: Some(path.to_string()),
        paths: Vec::new(),
        destination,
        completion_event: true,
    }
}

async fn finished(harness: &TestHarness, id: Uuid) -> strata_core::models::DownloadTaskResult {
    match harness.downloads().get_download_task_status(id).await.unwrap() {
        DownloadTaskStatusReport::Finished(result) => *result,
        other => panic!("expected a finished task, got {:?}", other),
    }
}

#[tokio::test]
async fn test_download_without_destination_writes_private_file() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 14);
    harness.s3.set_synchronous(true);

    let response = harness
        .downloads()
        .download_data_object(&harness.ctx(), &request("/ProjA/a.dat", None))
        .await
        .unwrap();

    assert!(response.task_id.is_none());
    assert_eq!(response.outcome, TransferOutcome::Completed);
    let file = response.download_file_path.unwrap();
    assert!(Path::new(&file).starts_with(harness.download_dir.path()));
    assert_eq!(std::fs::read(&file).unwrap(), b"archived bytes");

    let downloads = harness.s3.downloads();
    assert_eq!(downloads[0].source, FileLocation::new("bucket", "root/ProjA/a.dat"));
    assert_eq!(harness.store.download_result_count().await, 0);
}

#[tokio::test]
async fn test_download_of_unarchived_object_rejected() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/pending.dat");

    let result = harness
        .downloads()
        .download_data_object(&harness.ctx(), &request("/ProjA/pending.dat", None))
        .await;
    assert!(matches!(result, Err(AppError::InvalidRequest(_))));

    let missing = harness
        .downloads()
        .download_data_object(&harness.ctx(), &request("/ProjA/none.dat", None))
        .await;
    assert!(matches!(missing, Err(AppError::SourceNotFound(_))));
}

#[tokio::test]
async fn test_racing_completion_and_failure_finalize_once() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    let downloads = harness.downloads();

    let response = downloads
        .download_data_object(
            &harness.ctx(),
            &request("/ProjA/a.dat", Some(to(DataTransferType::S3, "dest", "copy.dat"))),
        )
        .await
        .unwrap();
    assert_eq!(response.outcome, TransferOutcome::InProgress);
    let task_id = response.task_id.unwrap();
    let listener = harness.s3.listener("s3-1").unwrap();

    let (_, failed) = tokio::join!(
        listener.completed(100),
        downloads.finalize_download_task(task_id, false, Some("timed out".to_string())),
    );
    failed.unwrap();

    assert_eq!(harness.store.download_result_count().await, 1);
    assert!(harness
        .store
        .get_data_object_download_task(task_id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(harness.emitter.events().len(), 1);

    // A third report for the same task changes nothing
    assert!(!downloads
        .finalize_download_task(task_id, true, None)
        .await
        .unwrap());
    assert_eq!(harness.emitter.events().len(), 1);
}

#[tokio::test]
async fn test_late_progress_does_not_resurrect_task() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);

    let response = harness
        .downloads()
        .download_data_object(
            &harness.ctx(),
            &request("/ProjA/a.dat", Some(to(DataTransferType::S3, "dest", "copy.dat"))),
        )
        .await
        .unwrap();
    let task_id = response.task_id.unwrap();
    let listener = harness.s3.listener("s3-1").unwrap();

    listener.progressed(40).await;
    match harness.downloads().get_download_task_status(task_id).await.unwrap() {
        DownloadTaskStatusReport::Active(task) => assert_eq!(task.percent_complete, 40),
        other => panic!("expected an active task, got {:?}", other),
    }

    listener.completed(100).await;
    listener.progressed(60).await;

    let result = finished(&harness, task_id).await;
    assert!(result.result);
    assert_eq!(harness.emitter.kinds(), vec![TransferEventKind::DownloadCompleted]);
}

#[tokio::test]
async fn test_destination_checks() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    let downloads = harness.downloads();
    let ctx = harness.ctx();

    let existing = FileLocation::new("dest", "existing.dat");
    harness
        .s3
        .set_attributes(existing.clone(), PathAttributes::file(Some(5)));
    let conflict = downloads
        .download_data_object(
            &ctx,
            &request("/ProjA/a.dat", Some(DownloadDestination::new(DataTransferType::S3, existing))),
        )
        .await;
    assert!(matches!(conflict, Err(AppError::DestinationConflict(_))));

    let locked = FileLocation::new("dest", "locked");
    harness.s3.set_attributes(
        locked.clone(),
        PathAttributes {
            is_accessible: false,
            ..Default::default()
        },
    );
    let denied = downloads
        .download_data_object(
            &ctx,
            &request("/ProjA/a.dat", Some(DownloadDestination::new(DataTransferType::S3, locked))),
        )
        .await;
    assert!(matches!(denied, Err(AppError::DestinationNotAccessible(_))));

    let taken = FileLocation::new("dest", "taken");
    harness
        .s3
        .set_attributes(taken.clone(), PathAttributes::directory());
    harness
        .s3
        .set_attributes(taken.child("a.dat"), PathAttributes::directory());
    let nested = downloads
        .download_data_object(
            &ctx,
            &request("/ProjA/a.dat", Some(DownloadDestination::new(DataTransferType::S3, taken))),
        )
        .await;
    assert!(matches!(nested, Err(AppError::DestinationConflict(_))));

    assert_eq!(harness.s3.transfer_count(), 0);
    assert_eq!(harness.store.download_result_count().await, 0);
}

#[tokio::test]
async fn test_directory_destination_receives_base_name() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/Set1/a.dat", S3_ARCHIVE, 100);
    let folder = FileLocation::new("dest", "folder");
    harness
        .s3
        .set_attributes(folder.clone(), PathAttributes::directory());

    let response = harness
        .downloads()
        .download_data_object(
            &harness.ctx(),
            &request(
                "/ProjA/Set1/a.dat",
                Some(DownloadDestination::new(DataTransferType::S3, folder)),
            ),
        )
        .await
        .unwrap();

    assert_eq!(response.destination_location, FileLocation::new("dest", "folder/a.dat"));
}

#[tokio::test]
async fn test_two_hop_download_through_staging() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    let downloads = harness.downloads();
    let ctx = harness.ctx();

    let response = downloads
        .download_data_object(
            &ctx,
            &request(
                "/ProjA/a.dat",
                Some(to(DataTransferType::Globus, "user-endpoint", "/home/alice/a.dat")),
            ),
        )
        .await
        .unwrap();
    let task_id = response.task_id.unwrap();
    assert_eq!(response.outcome, TransferOutcome::InProgress);

    let staging_file = harness.staging_dir.path().join(task_id.to_string());
    assert_eq!(
        response.download_file_path.as_deref(),
        Some(staging_file.to_str().unwrap())
    );
    match &harness.s3.downloads()[0].target {
        DownloadTarget::LocalFile(path) => assert_eq!(path, &staging_file),
        other => panic!("first hop should write the staging file, got {:?}", other),
    }
    assert_eq!(harness.globus.transfer_count(), 0);

    // First hop lands the bytes in staging
    std::fs::write(&staging_file, b"staged").unwrap();
    harness.s3.listener("s3-1").unwrap().completed(100).await;

    let globus_downloads = harness.globus.downloads();
    assert_eq!(globus_downloads.len(), 1);
    assert_eq!(
        globus_downloads[0].source,
        FileLocation::new("staging-endpoint", format!("/staging/{}", task_id))
    );
    let task = harness
        .store
        .get_data_object_download_task(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.data_transfer_type, DataTransferType::Globus);
    assert_eq!(task.data_transfer_status, DownloadTaskStatus::InProgress);
    assert_eq!(task.data_transfer_request_id.as_deref(), Some("globus-1"));
    assert!(!task.is_first_hop());

    downloads.refresh_download_task(&ctx, &task).await.unwrap();
    assert!(harness
        .store
        .get_data_object_download_task(task_id)
        .await
        .unwrap()
        .is_some());

    harness.globus.set_status(
        "globus-1",
        TransferStatusReport::Completed {
            bytes_transferred: Some(100),
        },
    );
    downloads.refresh_download_task(&ctx, &task).await.unwrap();

    let result = finished(&harness, task_id).await;
    assert!(result.result);
    assert_eq!(result.destination_type, DataTransferType::Globus);
    assert!(!staging_file.exists());
    assert_eq!(harness.emitter.kinds(), vec![TransferEventKind::DownloadCompleted]);
}

#[tokio::test]
async fn test_first_hop_failure_finalizes_task() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.s3.fail_transfers(Some("bucket unreachable"));

    let result = harness
        .downloads()
        .download_data_object(
            &harness.ctx(),
            &request(
                "/ProjA/a.dat",
                Some(to(DataTransferType::Globus, "user-endpoint", "/home/alice/a.dat")),
            ),
        )
        .await;

    assert!(matches!(result, Err(AppError::TransferFailed(_))));
    assert_eq!(harness.store.download_result_count().await, 1);
    let events = harness.emitter.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, TransferEventKind::DownloadFailed);
    assert!(events[0].message.as_deref().unwrap().contains("bucket unreachable"));
    assert_eq!(harness.globus.transfer_count(), 0);
}

#[tokio::test]
async fn test_final_hop_queued_behind_saturated_destination() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    let downloads = harness.downloads();
    let ctx = harness.ctx();

    let response = downloads
        .download_data_object(
            &ctx,
            &request(
                "/ProjA/a.dat",
                Some(to(DataTransferType::Globus, "user-endpoint", "/home/alice/a.dat")),
            ),
        )
        .await
        .unwrap();
    let task_id = response.task_id.unwrap();
    let staging_file = harness.staging_dir.path().join(task_id.to_string());
    std::fs::write(&staging_file, b"staged").unwrap();

    harness.globus.set_accepts(false);
    harness.s3.listener("s3-1").unwrap().completed(100).await;

    let queued = harness
        .store
        .get_data_object_download_task(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queued.data_transfer_status, DownloadTaskStatus::Received);
    assert_eq!(queued.data_transfer_type, DataTransferType::Globus);
    assert!(queued.data_transfer_request_id.is_none());
    assert!(staging_file.exists());
    assert_eq!(harness.globus.transfer_count(), 0);

    harness.globus.set_accepts(true);
    let outcome = downloads
        .resume_received_download_task(&ctx, &queued)
        .await
        .unwrap();
    assert_eq!(outcome, Some(TransferOutcome::InProgress));

    let globus_downloads = harness.globus.downloads();
    assert_eq!(globus_downloads.len(), 1);
    assert_eq!(
        globus_downloads[0].source,
        FileLocation::new("staging-endpoint", format!("/staging/{}", task_id))
    );
    assert_eq!(harness.s3.call_count("download"), 1);
    let resumed = harness
        .store
        .get_data_object_download_task(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resumed.data_transfer_status, DownloadTaskStatus::InProgress);
    assert_eq!(resumed.data_transfer_request_id.as_deref(), Some("globus-1"));
}

#[tokio::test]
async fn test_first_hop_failure_callback_removes_staging_file() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);

    let response = harness
        .downloads()
        .download_data_object(
            &harness.ctx(),
            &request(
                "/ProjA/a.dat",
                Some(to(DataTransferType::Globus, "user-endpoint", "/home/alice/a.dat")),
            ),
        )
        .await
        .unwrap();
    let task_id = response.task_id.unwrap();
    let staging_file = harness.staging_dir.path().join(task_id.to_string());
    std::fs::write(&staging_file, b"partial").unwrap();

    let listener = harness.s3.listener("s3-1").unwrap();
    listener.failed("checksum mismatch".to_string()).await;
    listener.failed("checksum mismatch".to_string()).await;

    assert!(!staging_file.exists());
    let result = finished(&harness, task_id).await;
    assert!(!result.result);
    assert_eq!(harness.store.download_result_count().await, 1);
    let events = harness.emitter.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, TransferEventKind::DownloadFailed);
    assert_eq!(events[0].message.as_deref(), Some("checksum mismatch"));
    assert_eq!(harness.globus.transfer_count(), 0);
}

#[tokio::test]
async fn test_saturated_download_queued_then_resumed() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.s3.set_accepts(false);
    let downloads = harness.downloads();

    let response = downloads
        .download_data_object(
            &harness.ctx(),
            &request("/ProjA/a.dat", Some(to(DataTransferType::S3, "dest", "copy.dat"))),
        )
        .await
        .unwrap();
    assert_eq!(response.outcome, TransferOutcome::Queued);
    assert_eq!(harness.s3.transfer_count(), 0);

    let queued = harness
        .store
        .list_data_object_download_tasks(DownloadTaskStatus::Received, None)
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);

    // Still saturated: stays queued
    let outcome = downloads
        .resume_received_download_task(&harness.ctx(), &queued[0])
        .await
        .unwrap();
    assert_eq!(outcome, Some(TransferOutcome::Queued));

    harness.s3.set_accepts(true);
    let outcome = downloads
        .resume_received_download_task(&harness.ctx(), &queued[0])
        .await
        .unwrap();
    assert_eq!(outcome, Some(TransferOutcome::InProgress));

    let task = harness
        .store
        .get_data_object_download_task(queued[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.data_transfer_status, DownloadTaskStatus::InProgress);
    assert_eq!(task.data_transfer_request_id.as_deref(), Some("s3-1"));

    // No longer RECEIVED: resuming again is a no-op
    let outcome = downloads
        .resume_received_download_task(&harness.ctx(), &queued[0])
        .await
        .unwrap();
    assert_eq!(outcome, None);
    assert_eq!(harness.s3.transfer_count(), 1);
}

#[tokio::test]
async fn test_request_unknown_to_backend_is_requeued() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);

    let response = harness
        .downloads()
        .download_data_object(
            &harness.ctx(),
            &request("/ProjA/a.dat", Some(to(DataTransferType::S3, "dest", "copy.dat"))),
        )
        .await
        .unwrap();
    let task_id = response.task_id.unwrap();

    let mut task = harness
        .store
        .get_data_object_download_task(task_id)
        .await
        .unwrap()
        .unwrap();
    task.data_transfer_request_id = Some("s3-lost".to_string());
    harness
        .store
        .upsert_data_object_download_task(&task)
        .await
        .unwrap();

    harness
        .downloads()
        .refresh_download_task(&harness.ctx(), &task)
        .await
        .unwrap();

    let task = harness
        .store
        .get_data_object_download_task(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.data_transfer_status, DownloadTaskStatus::Received);
    assert!(task.data_transfer_request_id.is_none());
}

#[tokio::test]
async fn test_unknown_task_status_not_found() {
    let harness = TestHarness::new();
    let result = harness
        .downloads()
        .get_download_task_status(Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_collection_download_keeps_relative_layout() {
    let harness = TestHarness::new();
    harness.namespace.add_collection("/ProjA/Set1");
    harness.namespace.add_collection("/ProjA/Set1/sub");
    harness.archived_object("/ProjA/Set1/a.dat", S3_ARCHIVE, 10);
    harness.archived_object("/ProjA/Set1/sub/b.dat", S3_ARCHIVE, 20);
    let downloads = harness.downloads();
    let ctx = harness.ctx();

    let task = downloads
        .download_collection(
            &ctx,
            &collection_request("/ProjA/Set1", to(DataTransferType::S3, "dest", "out")),
        )
        .await
        .unwrap();
    assert_eq!(task.status, CollectionDownloadTaskStatus::Received);
    assert_eq!(harness.s3.transfer_count(), 0);

    downloads
        .process_collection_download_task(&ctx, &task)
        .await
        .unwrap();

    let active = harness
        .store
        .get_collection_download_task(task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.status, CollectionDownloadTaskStatus::Active);
    assert_eq!(active.items.len(), 2);
    let targets: Vec<FileLocation> = harness
        .s3
        .downloads()
        .into_iter()
        .filter_map(|request| match request.target {
            DownloadTarget::Remote(destination) => Some(destination.location),
            DownloadTarget::LocalFile(_) => None,
        })
        .collect();
    assert!(targets.contains(&FileLocation::new("dest", "out/Set1/a.dat")));
    assert!(targets.contains(&FileLocation::new("dest", "out/Set1/sub/b.dat")));

    // Processing twice does not spawn more children
    downloads
        .process_collection_download_task(&ctx, &task)
        .await
        .unwrap();
    assert_eq!(harness.s3.transfer_count(), 2);

    assert!(!downloads
        .complete_collection_download_task(&task)
        .await
        .unwrap());

    harness.s3.listener("s3-1").unwrap().completed(10).await;
    harness.s3.listener("s3-2").unwrap().completed(20).await;
    assert!(downloads
        .complete_collection_download_task(&task)
        .await
        .unwrap());

    let result = finished(&harness, task.id).await;
    assert!(result.result);
    assert!(result.message.is_none());
    assert_eq!(result.items.len(), 2);
    assert!(result.items.iter().all(|item| item.result == Some(true)));
    assert_eq!(
        harness.emitter.kinds(),
        vec![TransferEventKind::DownloadCompleted]
    );
}

#[tokio::test]
async fn test_collection_with_failed_item_fails() {
    let harness = TestHarness::new();
    harness.namespace.add_collection("/ProjA/Set2");
    harness.archived_object("/ProjA/Set2/ok.dat", S3_ARCHIVE, 10);
    harness.registered_object("/ProjA/Set2/pending.dat");
    let downloads = harness.downloads();
    let ctx = harness.ctx();

    let task = downloads
        .download_collection(
            &ctx,
            &collection_request("/ProjA/Set2", to(DataTransferType::S3, "dest", "out")),
        )
        .await
        .unwrap();
    downloads
        .process_collection_download_task(&ctx, &task)
        .await
        .unwrap();
    assert_eq!(harness.s3.transfer_count(), 1);

    harness.s3.listener("s3-1").unwrap().completed(10).await;
    assert!(downloads
        .complete_collection_download_task(&task)
        .await
        .unwrap());

    let result = finished(&harness, task.id).await;
    assert!(!result.result);
    assert_eq!(result.message.as_deref(), Some("1 of 2 items downloaded"));
    let failed = result
        .items
        .iter()
        .find(|item| item.path == "/ProjA/Set2/pending.dat")
        .unwrap();
    assert_eq!(failed.result, Some(false));
    assert!(failed.data_object_download_task_id.is_none());
}

#[tokio::test]
async fn test_collection_request_validation() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 10);
    let downloads = harness.downloads();
    let ctx = harness.ctx();

    let missing = downloads
        .download_collection(
            &ctx,
            &collection_request("/ProjA/none", to(DataTransferType::S3, "dest", "out")),
        )
        .await;
    assert!(matches!(missing, Err(AppError::SourceNotFound(_))));

    let not_a_collection = downloads
        .download_collection(
            &ctx,
            &collection_request("/ProjA/a.dat", to(DataTransferType::S3, "dest", "out")),
        )
        .await;
    assert!(matches!(not_a_collection, Err(AppError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_cancel_only_before_processing() {
    let harness = TestHarness::new();
    harness.namespace.add_collection("/ProjA/Set1");
    harness.archived_object("/ProjA/Set1/a.dat", S3_ARCHIVE, 10);
    let downloads = harness.downloads();
    let ctx = harness.ctx();
    let destination = to(DataTransferType::S3, "dest", "out");

    let received = downloads
        .download_collection(&ctx, &collection_request("/ProjA/Set1", destination.clone()))
        .await
        .unwrap();
    let result = downloads
        .cancel_collection_download_task(received.id)
        .await
        .unwrap();
    assert!(!result.result);
    assert!(!finished(&harness, received.id).await.result);
    assert_eq!(harness.s3.transfer_count(), 0);

    let active = downloads
        .download_collection(&ctx, &collection_request("/ProjA/Set1", destination))
        .await
        .unwrap();
    downloads
        .process_collection_download_task(&ctx, &active)
        .await
        .unwrap();
    let refused = downloads.cancel_collection_download_task(active.id).await;
    assert!(matches!(refused, Err(AppError::InvalidRequest(_))));

    let unknown = downloads.cancel_collection_download_task(Uuid::new_v4()).await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
}
