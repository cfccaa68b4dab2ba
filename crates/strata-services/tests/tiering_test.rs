//! Storage tiering tests

use chrono::{Duration, Utc};
use strata_core::models::TieringRequestType;
use strata_core::AppError;
use strata_services::test_helpers::*;

#[tokio::test]
async fn test_tier_data_object_uses_exact_archive_key() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 100);

    let response = harness
        .tiering()
        .tier_data_object(&harness.ctx(), "/ProjA/a.dat")
        .await
        .unwrap();

    assert_eq!(response.key_prefix, "root/ProjA/a.dat");
    assert_eq!(response.s3_archive_configuration_id, S3_ARCHIVE);
    let policies = harness.s3.tiering_policies();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].bucket, "bucket");
    assert_eq!(policies[0].prefix, "root/ProjA/a.dat");
    assert_eq!(policies[0].storage_class, "GLACIER");
    assert_eq!(policies[0].transition_days, 0);
}

#[tokio::test]
async fn test_tier_collection_uses_key_prefix() {
    let harness = TestHarness::new();
    harness.namespace.add_collection("/ProjA/Set1");

    let response = harness
        .tiering()
        .tier_collection(&harness.ctx(), "/ProjA/Set1")
        .await
        .unwrap();

    assert_eq!(response.key_prefix, "root/ProjA/Set1/");
    let policies = harness.s3.tiering_policies();
    assert_eq!(policies[0].bucket, "bucket");
    assert_eq!(policies[0].prefix, "root/ProjA/Set1/");

    let records = harness.tiering().list_tiering_records(TEST_USER).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request_type, TieringRequestType::TierCollection);
    assert_eq!(records[0].id, response.record_id);
}

#[tokio::test]
async fn test_provider_without_tiering_rejected() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjB/b.dat", S3_UNTIERED_ARCHIVE, 10);
    harness.namespace.add_collection("/ProjB/Set1");
    let tiering = harness.tiering();

    let object = tiering.tier_data_object(&harness.ctx(), "/ProjB/b.dat").await;
    assert!(matches!(object, Err(AppError::UnsupportedBackend(_))));
    let collection = tiering.tier_collection(&harness.ctx(), "/ProjB/Set1").await;
    assert!(matches!(collection, Err(AppError::UnsupportedBackend(_))));

    assert!(harness.s3.tiering_policies().is_empty());
    assert!(tiering.list_tiering_records(TEST_USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_is_tiering_supported() {
    let harness = TestHarness::new();
    let tiering = harness.tiering();

    assert!(tiering.is_tiering_supported(DOC_A).unwrap());
    assert!(!tiering.is_tiering_supported(DOC_B).unwrap());
    assert!(tiering.is_tiering_supported("no-such-doc").is_err());
}

#[tokio::test]
async fn test_bulk_tiering_applies_all_or_nothing() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 10);
    harness.archived_object("/ProjA/b.dat", S3_ARCHIVE, 20);
    let tiering = harness.tiering();
    let ctx = harness.ctx();

    let rejected = tiering
        .tier_data_objects(
            &ctx,
            &["/ProjA/a.dat".to_string(), "/ProjA/missing.dat".to_string()],
        )
        .await;
    assert!(matches!(rejected, Err(AppError::SourceNotFound(_))));
    assert!(harness.s3.tiering_policies().is_empty());

    let empty = tiering.tier_collections(&ctx, &[]).await;
    assert!(matches!(empty, Err(AppError::InvalidRequest(_))));

    let responses = tiering
        .tier_data_objects(&ctx, &["/ProjA/a.dat".to_string(), "/ProjA/b.dat".to_string()])
        .await
        .unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(harness.s3.tiering_policies().len(), 2);
    assert_eq!(tiering.list_tiering_records(TEST_USER).await.unwrap().len(), 2);
    assert!(tiering.list_tiering_records("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_path_kind_rejected() {
    let harness = TestHarness::new();
    harness.archived_object("/ProjA/a.dat", S3_ARCHIVE, 10);
    harness.namespace.add_collection("/ProjA/Set1");
    let tiering = harness.tiering();

    let object_as_collection = tiering.tier_collection(&harness.ctx(), "/ProjA/a.dat").await;
    assert!(matches!(object_as_collection, Err(AppError::InvalidRequest(_))));
    let collection_as_object = tiering.tier_data_object(&harness.ctx(), "/ProjA/Set1").await;
    assert!(matches!(collection_as_object, Err(AppError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_deep_archive_delay_uses_configured_maximum() {
    let harness = TestHarness::new();
    let tiering = harness.tiering();

    assert!(tiering.deep_archive_delayed(None));
    assert!(tiering.deep_archive_delayed(Some(Utc::now() - Duration::days(3))));
    assert!(!tiering.deep_archive_delayed(Some(Utc::now() - Duration::hours(12))));
}
