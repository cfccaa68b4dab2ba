//! Archive to archive migration tests.

use strata_core::models::{
    BulkMigrationRequest, DataMigrationTaskResult, DataTransferStatus, DeepArchiveStatus,
    FileLocation, MigrationResult, MigrationStatus, MigrationTaskStatusReport, MigrationType,
    UploadSource,
};
use strata_core::{AppError, NamespaceIdentity};
use strata_db::MigrationTaskStore;
use strata_services::test_helpers::*;
use strata_transfer::PathAttributes;
use uuid::Uuid;

fn glacier(size: u64) -> PathAttributes {
    PathAttributes {
        storage_class: Some("GLACIER".to_string()),
        ..PathAttributes::file(Some(size))
    }
}

async fn finished(harness: &TestHarness, id: Uuid) -> DataMigrationTaskResult {
    match harness.migrations().get_migration_task_status(id).await.unwrap() {
        MigrationTaskStatusReport::Finished(result) => *result,
        other => panic!("expected a finished migration, got {:?}", other),
    }
}

async fn migrate_received_children(harness: &TestHarness) {
    let children = harness
        .store
        .list_migration_tasks(MigrationStatus::Received, Some(MigrationType::DataObject))
        .await
        .unwrap();
    for child in children {
        harness
            .migrations()
            .migrate(&harness.ctx(), &child)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_migration_to_same_archive_is_ignored() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    let migrations = harness.migrations();

    let task = migrations
        .create_data_object_migration(&harness.ctx(), "/ProjA/a.dat", S3_ARCHIVE, None)
        .await
        .unwrap();
    migrations.migrate(&harness.ctx(), &task).await.unwrap();

    assert_eq!(finished(&harness, task.id).await.result, MigrationResult::Ignored);
    assert!(harness.s3.calls().is_empty());
    assert!(harness.namespace.updates().is_empty());
}

#[tokio::test]
async fn test_data_object_migration_rewrites_metadata_and_deletes_source() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.s3.set_synchronous(true);
    let target = FileLocation::new("target-bucket", "archive/ProjA/a.dat");
    harness.s3.set_attributes(target.clone(), glacier(100));
    let migrations = harness.migrations();

    let task = migrations
        .create_data_object_migration(&harness.ctx(), "/ProjA/a.dat", S3_TARGET_ARCHIVE, None)
        .await
        .unwrap();
    assert_eq!(task.status, MigrationStatus::Received);
    assert_eq!(task.from_s3_archive_configuration_id, S3_ARCHIVE);
    assert_eq!(task.data_object_id.as_deref(), Some("obj-ProjA-a.dat"));

    migrations.migrate(&harness.ctx(), &task).await.unwrap();

    let uploads = harness.s3.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].destination, target);
    match &uploads[0].source {
        UploadSource::Url { url, size } => {
            assert!(url.contains("bucket/root/ProjA/a.dat"));
            assert!(url.ends_with("expires=3600"));
            assert_eq!(*size, Some(100));
        }
        other => panic!("migration should stream from a URL, got {:?}", other),
    }

    let metadata = harness.namespace.metadata("/ProjA/a.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Archived);
    assert_eq!(metadata.archive_location, target);
    assert_eq!(metadata.s3_archive_configuration_id, S3_TARGET_ARCHIVE);
    assert_eq!(metadata.deep_archive_status, Some(DeepArchiveStatus::DeepArchived));
    assert!(metadata.deep_archive_date.is_some());

    let system = NamespaceIdentity::System(SYSTEM_ACCOUNT.to_string());
    assert!(harness
        .namespace
        .updates()
        .iter()
        .all(|(identity, _, _)| *identity == system));

    assert_eq!(
        harness.s3.deleted(),
        vec![FileLocation::new("bucket", "root/ProjA/a.dat")]
    );
    let (location, provenance) = &harness.s3.archive_metadata()[0];
    assert_eq!(location, &target);
    assert_eq!(provenance.get("strata-migrated-from").unwrap(), S3_ARCHIVE);
    assert_eq!(provenance.get("strata-path").unwrap(), "/ProjA/a.dat");

    let result = finished(&harness, task.id).await;
    assert_eq!(result.result, MigrationResult::Completed);
    assert_eq!(result.to_s3_archive_location, Some(target));
}

#[tokio::test]
async fn test_object_marked_in_migration_while_copy_runs() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.s3.set_attributes(
        FileLocation::new("target-bucket", "archive/ProjA/a.dat"),
        PathAttributes::file(Some(100)),
    );
    let migrations = harness.migrations();

    let task = migrations
        .create_data_object_migration(&harness.ctx(), "/ProjA/a.dat", S3_TARGET_ARCHIVE, None)
        .await
        .unwrap();
    migrations.migrate(&harness.ctx(), &task).await.unwrap();

    let metadata = harness.namespace.metadata("/ProjA/a.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::MigrationInProgress);
    match migrations.get_migration_task_status(task.id).await.unwrap() {
        MigrationTaskStatusReport::Active(active) => {
            assert_eq!(active.status, MigrationStatus::InProgress)
        }
        other => panic!("expected an active migration, got {:?}", other),
    }

    let listener = harness.s3.listener("s3-1").unwrap();
    listener.progressed(25).await;
    listener.completed(100).await;
    listener.failed("late failure".to_string()).await;

    let result = finished(&harness, task.id).await;
    assert_eq!(result.result, MigrationResult::Completed);
    assert_eq!(harness.store.migration_result_count().await, 1);
    assert_eq!(
        harness.namespace.metadata("/ProjA/a.dat").unwrap().deep_archive_status,
        None
    );
}

#[tokio::test]
async fn test_copy_failure_restores_archived_status() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.s3.fail_transfers(Some("connection reset"));
    let migrations = harness.migrations();

    let task = migrations
        .create_data_object_migration(&harness.ctx(), "/ProjA/a.dat", S3_TARGET_ARCHIVE, None)
        .await
        .unwrap();
    migrations.migrate(&harness.ctx(), &task).await.unwrap();

    let result = finished(&harness, task.id).await;
    assert_eq!(result.result, MigrationResult::Failed);
    assert!(result.message.unwrap().contains("connection reset"));

    let metadata = harness.namespace.metadata("/ProjA/a.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Archived);
    assert_eq!(metadata.s3_archive_configuration_id, S3_ARCHIVE);
    assert!(harness.s3.deleted().is_empty());
}

#[tokio::test]
async fn test_post_processing_failure_keeps_source() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.s3.set_synchronous(true);
    harness.s3.set_attributes(
        FileLocation::new("target-bucket", "archive/ProjA/a.dat"),
        PathAttributes::file(Some(100)),
    );
    harness.namespace.fail_location_updates(true);
    let migrations = harness.migrations();

    let task = migrations
        .create_data_object_migration(&harness.ctx(), "/ProjA/a.dat", S3_TARGET_ARCHIVE, None)
        .await
        .unwrap();
    migrations.migrate(&harness.ctx(), &task).await.unwrap();

    let result = finished(&harness, task.id).await;
    assert_eq!(result.result, MigrationResult::Failed);
    assert!(result
        .message
        .unwrap()
        .starts_with("Migration post-processing failed"));

    assert!(harness.s3.deleted().is_empty());
    let metadata = harness.namespace.metadata("/ProjA/a.dat").unwrap();
    assert_eq!(metadata.data_transfer_status, DataTransferStatus::Archived);
    assert_eq!(metadata.archive_location, FileLocation::new("bucket", "root/ProjA/a.dat"));
}

#[tokio::test]
async fn test_migration_preconditions() {
    let harness = TestHarness::new();
    harness.registered_object("/ProjA/pending.dat");
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.namespace.add_collection("/ProjA/Set1");
    let migrations = harness.migrations();
    let ctx = harness.ctx();

    let pending = migrations
        .create_data_object_migration(&ctx, "/ProjA/pending.dat", S3_TARGET_ARCHIVE, None)
        .await;
    assert!(matches!(pending, Err(AppError::InvalidRequest(_))));

    let to_endpoint = migrations
        .create_data_object_migration(&ctx, "/ProjA/a.dat", GLOBUS_ARCHIVE, None)
        .await;
    assert!(matches!(to_endpoint, Err(AppError::UnsupportedBackend(_))));

    let collection = migrations
        .create_data_object_migration(&ctx, "/ProjA/Set1", S3_TARGET_ARCHIVE, None)
        .await;
    assert!(matches!(collection, Err(AppError::InvalidRequest(_))));

    let unknown = migrations
        .create_data_object_migration(&ctx, "/ProjA/a.dat", "no-such-archive", None)
        .await;
    assert!(unknown.is_err());

    let status = migrations.get_migration_task_status(Uuid::new_v4()).await;
    assert!(matches!(status, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_collection_migration_with_ignored_child() {
    let harness = TestHarness::new();
    harness.namespace.add_collection("/ProjA/Set1");
    harness.namespace.add_collection("/ProjA/Set1/sub");
    harness.archived_object("/ProjA/Set1/a.dat", S3_ARCHIVE, 100);
    harness.archived_object("/ProjA/Set1/sub/b.dat", S3_TARGET_ARCHIVE, 50);
    harness.s3.set_attributes(
        FileLocation::new("target-bucket", "archive/ProjA/Set1/a.dat"),
        PathAttributes::file(Some(100)),
    );
    let migrations = harness.migrations();
    let ctx = harness.ctx();

    let parent = migrations
        .create_bulk_migration(
            &ctx,
            &BulkMigrationRequest {
                migration_type: MigrationType::Collection,
                user_id: TEST_USER.to_string(),
                path: Some("/ProjA/Set1".to_string()),
                data_object_paths: Vec::new(),
                collection_paths: Vec::new(),
                to_s3_archive_configuration_id: S3_TARGET_ARCHIVE.to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(parent.from_s3_archive_configuration_id, S3_ARCHIVE);

    migrations.migrate(&ctx, &parent).await.unwrap();
    assert_eq!(
        harness
            .store
            .count_active_child_migration_tasks(parent.id)
            .await
            .unwrap(),
        2
    );
    // Re-processing never spawns a second set of children
    migrations.process_bulk_migration(&ctx, &parent).await.unwrap();
    assert_eq!(
        harness
            .store
            .count_active_child_migration_tasks(parent.id)
            .await
            .unwrap(),
        2
    );

    migrate_received_children(&harness).await;
    assert_eq!(migrations.complete_bulk_migration(&parent, None).await.unwrap(), None);

    harness.s3.listener("s3-1").unwrap().completed(100).await;
    let result = migrations.complete_bulk_migration(&parent, None).await.unwrap();
    assert_eq!(result, Some(MigrationResult::CompletedWithIgnoredItems));

    let record = finished(&harness, parent.id).await;
    assert_eq!(record.result, MigrationResult::CompletedWithIgnoredItems);
    assert!(record.message.is_none());
}

#[tokio::test]
async fn test_interrupted_child_spawn_is_completed_on_redrive() {
    let harness = TestHarness::new();
    harness.namespace.add_collection("/ProjA/Set1");
    harness.archived_object("/ProjA/Set1/a.dat", S3_ARCHIVE, 100);
    harness.archived_object("/ProjA/Set1/b.dat", S3_TARGET_ARCHIVE, 50);
    harness.s3.set_attributes(
        FileLocation::new("target-bucket", "archive/ProjA/Set1/a.dat"),
        PathAttributes::file(Some(100)),
    );
    let migrations = harness.migrations();
    let ctx = harness.ctx();

    let parent = migrations
        .create_bulk_migration(
            &ctx,
            &BulkMigrationRequest {
                migration_type: MigrationType::Collection,
                user_id: TEST_USER.to_string(),
                path: Some("/ProjA/Set1".to_string()),
                data_object_paths: Vec::new(),
                collection_paths: Vec::new(),
                to_s3_archive_configuration_id: S3_TARGET_ARCHIVE.to_string(),
            },
        )
        .await
        .unwrap();
    // A pass that stopped after its first child: the parent is still RECEIVED
    migrations
        .create_data_object_migration(
            &ctx,
            "/ProjA/Set1/b.dat",
            S3_TARGET_ARCHIVE,
            Some(parent.id),
        )
        .await
        .unwrap();

    migrations.migrate(&ctx, &parent).await.unwrap();
    let children = harness
        .store
        .list_child_migration_tasks(parent.id)
        .await
        .unwrap();
    let mut paths: Vec<_> = children.iter().filter_map(|c| c.path.clone()).collect();
    paths.sort();
    assert_eq!(paths, vec!["/ProjA/Set1/a.dat", "/ProjA/Set1/b.dat"]);

    migrate_received_children(&harness).await;
    harness.s3.listener("s3-1").unwrap().completed(100).await;
    let result = migrations.complete_bulk_migration(&parent, None).await.unwrap();
    assert_eq!(result, Some(MigrationResult::CompletedWithIgnoredItems));

    let migrated = harness.namespace.metadata("/ProjA/Set1/a.dat").unwrap();
    assert_eq!(migrated.s3_archive_configuration_id, S3_TARGET_ARCHIVE);
    assert_eq!(
        harness
            .store
            .list_child_migration_results(parent.id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_list_migration_with_uncreatable_child_fails() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    harness.registered_object("/ProjA/pending.dat");
    harness.s3.set_synchronous(true);
    harness.s3.set_attributes(
        FileLocation::new("target-bucket", "archive/ProjA/a.dat"),
        PathAttributes::file(Some(100)),
    );
    let migrations = harness.migrations();
    let ctx = harness.ctx();

    let parent = migrations
        .create_bulk_migration(
            &ctx,
            &BulkMigrationRequest {
                migration_type: MigrationType::DataObjectList,
                user_id: TEST_USER.to_string(),
                path: None,
                data_object_paths: vec![
                    "/ProjA/a.dat".to_string(),
                    "/ProjA/pending.dat".to_string(),
                ],
                collection_paths: Vec::new(),
                to_s3_archive_configuration_id: S3_TARGET_ARCHIVE.to_string(),
            },
        )
        .await
        .unwrap();

    migrations.migrate(&ctx, &parent).await.unwrap();
    migrate_received_children(&harness).await;

    let result = migrations.complete_bulk_migration(&parent, None).await.unwrap();
    assert_eq!(result, Some(MigrationResult::Failed));
    let record = finished(&harness, parent.id).await;
    assert_eq!(
        record.message.as_deref(),
        Some("1 of 2 data objects failed to migrate")
    );

    let children = harness
        .store
        .list_child_migration_results(parent.id)
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
    assert!(children
        .iter()
        .any(|child| child.path.as_deref() == Some("/ProjA/a.dat")
            && child.result == MigrationResult::Completed));
}

#[tokio::test]
async fn test_reset_in_process_requeues_interrupted_tasks() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);
    let migrations = harness.migrations();

    let task = migrations
        .create_data_object_migration(&harness.ctx(), "/ProjA/a.dat", S3_TARGET_ARCHIVE, None)
        .await
        .unwrap();
    migrations.migrate(&harness.ctx(), &task).await.unwrap();

    assert_eq!(migrations.reset_in_process().await.unwrap(), 1);
    let requeued = harness
        .store
        .get_migration_task(task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(requeued.status, MigrationStatus::Received);
    assert_eq!(migrations.reset_in_process().await.unwrap(), 0);
}
