//! Storage tiering
//!
//! Tiering installs a lifecycle rule on the archive bucket that moves every key
//! under a prefix into a colder storage class. A data object is tiered by its
//! exact archive key, a collection by the key prefix of everything archived
//! below it. Each applied rule is recorded.

use chrono::{DateTime, Duration, Utc};
use strata_core::models::{ArchiveConfiguration, TieringRecord, TieringRequestType, TieringResponse};
use strata_core::{AppError, DataTransferType, PathKind};
use strata_transfer::TieringPolicy;
use uuid::Uuid;

use crate::context::InvocationContext;
use crate::state::ServiceState;

/// A resolved rule, not yet applied.
#[derive(Debug, Clone)]
struct PlannedTiering {
    request_type: TieringRequestType,
    path: String,
    archive: ArchiveConfiguration,
    policy: TieringPolicy,
}

#[derive(Clone)]
pub struct TieringService {
    state: ServiceState,
}

impl TieringService {
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id()))]
    pub async fn tier_data_object(
        &self,
        ctx: &InvocationContext,
        path: &str,
    ) -> Result<TieringResponse, AppError> {
        let planned = self.plan_data_object(path).await?;
        self.apply(ctx, planned).await
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id()))]
    pub async fn tier_collection(
        &self,
        ctx: &InvocationContext,
        path: &str,
    ) -> Result<TieringResponse, AppError> {
        let planned = self.plan_collection(path).await?;
        self.apply(ctx, planned).await
    }

    /// Every path is resolved before any rule is applied, so an invalid
    /// item rejects the whole request.
    #[tracing::instrument(skip(self, ctx, paths), fields(user_id = %ctx.user_id(), count = paths.len()))]
    pub async fn tier_data_objects(
        &self,
        ctx: &InvocationContext,
        paths: &[String],
    ) -> Result<Vec<TieringResponse>, AppError> {
        require_paths(paths)?;
        let mut planned = Vec::with_capacity(paths.len());
        for path in paths {
            planned.push(self.plan_data_object(path).await?);
        }
        self.apply_all(ctx, planned).await
    }

    #[tracing::instrument(skip(self, ctx, paths), fields(user_id = %ctx.user_id(), count = paths.len()))]
    pub async fn tier_collections(
        &self,
        ctx: &InvocationContext,
        paths: &[String],
    ) -> Result<Vec<TieringResponse>, AppError> {
        require_paths(paths)?;
        let mut planned = Vec::with_capacity(paths.len());
        for path in paths {
            planned.push(self.plan_collection(path).await?);
        }
        self.apply_all(ctx, planned).await
    }

    /// Whether the upload archive of a data management configuration is on a
    /// provider that supports lifecycle tiering.
    pub fn is_tiering_supported(&self, configuration_id: &str) -> Result<bool, AppError> {
        let locator = self.state.gateway.locator();
        let doc = locator.data_management(configuration_id)?;
        Ok(locator
            .upload_archive(doc, DataTransferType::S3)?
            .supports_tiering())
    }

    /// A deep archive transition is delayed when it never started or started
    /// longer ago than the configured maximum.
    pub fn deep_archive_delayed(&self, date: Option<DateTime<Utc>>) -> bool {
        deep_archive_delayed_at(date, Utc::now(), self.state.settings.deep_archive_max_days)
    }

    pub async fn list_tiering_records(
        &self,
        user_id: &str,
    ) -> Result<Vec<TieringRecord>, AppError> {
        self.state.store.list_tiering_records(user_id).await
    }

    async fn plan_data_object(&self, path: &str) -> Result<PlannedTiering, AppError> {
        match self.state.namespace.path_kind(path).await? {
            Some(PathKind::DataObject) => {}
            Some(PathKind::Collection) => {
                return Err(AppError::InvalidRequest(format!("{} is a collection", path)))
            }
            None => return Err(AppError::SourceNotFound(path.to_string())),
        }

        let metadata = self.state.namespace.get_system_generated_metadata(path).await?;
        let archive = self
            .state
            .gateway
            .locator()
            .archive(&metadata.s3_archive_configuration_id)?
            .clone();
        let policy = tiering_policy(
            &archive,
            &metadata.archive_location.file_container_id,
            &metadata.archive_location.file_id,
        )?;

        Ok(PlannedTiering {
            request_type: TieringRequestType::TierDataObject,
            path: path.to_string(),
            archive,
            policy,
        })
    }

    async fn plan_collection(&self, path: &str) -> Result<PlannedTiering, AppError> {
        match self.state.namespace.path_kind(path).await? {
            Some(PathKind::Collection) => {}
            Some(PathKind::DataObject) => {
                return Err(AppError::InvalidRequest(format!("{} is not a collection", path)))
            }
            None => return Err(AppError::SourceNotFound(path.to_string())),
        }

        let locator = self.state.gateway.locator();
        let doc = locator.data_management_for_path(path)?;
        let archive = locator.upload_archive(doc, DataTransferType::S3)?.clone();
        let policy = tiering_policy(
            &archive,
            &archive.base_archive_destination.file_container_id,
            &archive.collection_prefix(path),
        )?;

        Ok(PlannedTiering {
            request_type: TieringRequestType::TierCollection,
            path: path.to_string(),
            archive,
            policy,
        })
    }

    async fn apply_all(
        &self,
        ctx: &InvocationContext,
        planned: Vec<PlannedTiering>,
    ) -> Result<Vec<TieringResponse>, AppError> {
        let mut responses = Vec::with_capacity(planned.len());
        for item in planned {
            responses.push(self.apply(ctx, item).await?);
        }
        Ok(responses)
    }

    async fn apply(
        &self,
        ctx: &InvocationContext,
        planned: PlannedTiering,
    ) -> Result<TieringResponse, AppError> {
        self.state
            .gateway
            .set_tiering_policy(ctx, &planned.archive, &planned.policy)
            .await?;

        let record = TieringRecord {
            id: Uuid::new_v4(),
            user_id: ctx.user_id().to_string(),
            request_type: planned.request_type,
            path: planned.path.clone(),
            s3_archive_configuration_id: planned.archive.id.clone(),
            key_prefix: planned.policy.prefix.clone(),
            storage_class: planned.policy.storage_class.clone(),
            applied_at: Utc::now(),
        };
        self.state.store.insert_tiering_record(&record).await?;

        tracing::info!(
            path = %record.path,
            bucket = %planned.policy.bucket,
            prefix = %record.key_prefix,
            storage_class = %record.storage_class,
            "Tiering rule applied"
        );
        Ok(TieringResponse {
            path: record.path,
            key_prefix: record.key_prefix,
            s3_archive_configuration_id: record.s3_archive_configuration_id,
            record_id: record.id,
        })
    }
}

fn tiering_policy(
    archive: &ArchiveConfiguration,
    bucket: &str,
    prefix: &str,
) -> Result<TieringPolicy, AppError> {
    if !archive.supports_tiering() {
        return Err(AppError::UnsupportedBackend(format!(
            "Archive {} on {} does not support tiering",
            archive.id, archive.provider
        )));
    }
    Ok(TieringPolicy {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
        storage_class: archive.tiering_storage_class().to_string(),
        transition_days: archive.tiering_transition_days(),
    })
}

fn require_paths(paths: &[String]) -> Result<(), AppError> {
    if paths.is_empty() || paths.iter().any(|p| p.trim().is_empty()) {
        return Err(AppError::InvalidRequest(
            "A non-empty list of paths is required".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn deep_archive_delayed_at(
    date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    max_days: i64,
) -> bool {
    match date {
        None => true,
        Some(date) => date + Duration::days(max_days) < now,
    }
}
