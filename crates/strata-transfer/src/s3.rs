use crate::listener::{BackgroundTransfers, ProgressTracker, TransferProgressListener};
use crate::traits::{
    AuthToken, DownloadRequest, DownloadTarget, PathAttributes, TieringPolicy, TransferBackend,
    TransferError, TransferResponse, TransferResult, TransferStatusReport, UploadRequest,
};
use async_trait::async_trait;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, CompletedMultipartUpload, CompletedPart, ExpirationStatus,
    LifecycleRule, LifecycleRuleFilter, MetadataDirective, Transition, TransitionStorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Error as ObjectStoreError, ObjectStoreExt, Result as ObjectResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use strata_core::models::{ArchiveConfiguration, FileLocation, UploadSource};
use strata_core::DataTransferType;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const DEFAULT_REGION: &str = "us-east-1";
/// Minimum S3 part size (except for the last part)
const PART_SIZE: usize = 8 * 1024 * 1024;
const RULE_ID_MAX_LEN: usize = 255;

/// Bytes that must be escaped in an `x-amz-copy-source` header
const COPY_SOURCE_ESCAPE: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Session carried inside an [`AuthToken`] issued by [`S3Backend`]
#[derive(Clone)]
struct S3Session {
    client: Client,
    region: String,
    endpoint_url: Option<String>,
    access_key_id: String,
    secret_access_key: String,
}

impl S3Session {
    /// object_store handle for one bucket, used for signing and streamed reads
    fn store(&self, bucket: &str) -> TransferResult<AmazonS3> {
        let mut builder = AmazonS3Builder::new()
            .with_region(self.region.clone())
            .with_bucket_name(bucket)
            .with_access_key_id(self.access_key_id.clone())
            .with_secret_access_key(self.secret_access_key.clone());

        if let Some(ref endpoint) = self.endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http)
                .with_virtual_hosted_style_request(false);
        }

        builder
            .build()
            .map_err(|e| TransferError::ConfigError(e.to_string()))
    }
}

/// Object store archive backend (AWS S3 and S3-compatible providers)
#[derive(Clone)]
pub struct S3Backend {
    http: reqwest::Client,
    multipart_threshold: u64,
    transfers: BackgroundTransfers,
}

impl S3Backend {
    /// Create a new S3 backend
    ///
    /// # Arguments
    /// * `multipart_threshold` - uploads at or above this size use multipart upload
    pub fn new(multipart_threshold: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            multipart_threshold: multipart_threshold.max(PART_SIZE as u64),
            transfers: BackgroundTransfers::default(),
        }
    }
}

/// Object key for a file id: S3 keys never start with a separator.
fn object_key(location: &FileLocation) -> TransferResult<String> {
    let key = location.file_id.trim_start_matches('/');
    if location.file_container_id.trim().is_empty() || key.is_empty() {
        return Err(TransferError::InvalidLocation(location.to_string()));
    }
    Ok(key.to_string())
}

fn copy_source(location: &FileLocation) -> TransferResult<String> {
    let key = object_key(location)?;
    Ok(percent_encoding::utf8_percent_encode(
        &format!("{}/{}", location.file_container_id, key),
        COPY_SOURCE_ESCAPE,
    )
    .to_string())
}

fn lifecycle_rule_id(prefix: &str) -> String {
    let mut id = format!("strata-tier-{}", prefix.trim_end_matches('/'));
    id.truncate(RULE_ID_MAX_LEN);
    id
}

#[allow(clippy::too_many_arguments)]
async fn put_object_from_reader<R>(
    client: &Client,
    bucket: &str,
    key: &str,
    mut reader: R,
    size_hint: Option<u64>,
    multipart_threshold: u64,
    metadata: &BTreeMap<String, String>,
    tracker: &mut ProgressTracker,
) -> TransferResult<(u64, Option<String>)>
where
    R: AsyncRead + Unpin + Send,
{
    let start = std::time::Instant::now();
    let metadata: HashMap<String, String> = metadata.clone().into_iter().collect();

    let use_multipart = size_hint
        .map(|len| len >= multipart_threshold)
        .unwrap_or(true);

    if !use_multipart {
        let mut buffer = Vec::with_capacity(size_hint.unwrap_or(0) as usize);
        reader.read_to_end(&mut buffer).await?;
        let size = buffer.len() as u64;

        let output = client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(Bytes::from(buffer)))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    size_bytes = size,
                    "S3 upload failed"
                );
                TransferError::TransferFailed(e.to_string())
            })?;
        tracker.advance(size).await;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );
        return Ok((size, output.e_tag().map(|t| t.trim_matches('"').to_string())));
    }

    let create_result = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .set_metadata(Some(metadata))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                key = %key,
                "Failed to create multipart upload"
            );
            TransferError::TransferFailed(e.to_string())
        })?;

    let upload_id = create_result
        .upload_id()
        .ok_or_else(|| TransferError::TransferFailed("No upload ID returned from S3".to_string()))?
        .to_string();

    let mut part_number = 1i32;
    let mut parts = Vec::new();
    let mut part_buffer = vec![0u8; PART_SIZE];
    let mut total_size = 0u64;

    let upload_result: TransferResult<()> = async {
        loop {
            let mut bytes_in_part = 0usize;
            while bytes_in_part < PART_SIZE {
                let bytes_read = reader.read(&mut part_buffer[bytes_in_part..]).await?;
                if bytes_read == 0 {
                    break;
                }
                bytes_in_part += bytes_read;
            }

            // An empty object still needs one (empty) part
            if bytes_in_part == 0 && part_number > 1 {
                break;
            }

            let part = client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(Bytes::copy_from_slice(
                    &part_buffer[..bytes_in_part],
                )))
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        part_number = part_number,
                        "Failed to upload part"
                    );
                    TransferError::TransferFailed(e.to_string())
                })?;

            let etag = part.e_tag().ok_or_else(|| {
                TransferError::TransferFailed(format!("No ETag returned for part {}", part_number))
            })?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );

            total_size += bytes_in_part as u64;
            tracker.advance(bytes_in_part as u64).await;
            part_number += 1;

            if bytes_in_part < PART_SIZE {
                break;
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = upload_result {
        if let Err(abort_err) = client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .send()
            .await
        {
            tracing::warn!(
                error = %abort_err,
                bucket = %bucket,
                key = %key,
                "Failed to abort multipart upload"
            );
        }
        return Err(e);
    }

    let output = client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build(),
        )
        .send()
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                key = %key,
                "Failed to complete multipart upload"
            );
            TransferError::TransferFailed(e.to_string())
        })?;

    tracing::info!(
        bucket = %bucket,
        key = %key,
        size_bytes = total_size,
        parts = part_number - 1,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "S3 multipart upload successful"
    );

    Ok((
        total_size,
        output.e_tag().map(|t| t.trim_matches('"').to_string()),
    ))
}

#[async_trait]
impl TransferBackend for S3Backend {
    fn transfer_type(&self) -> DataTransferType {
        DataTransferType::S3
    }

    async fn authenticate(&self, config: &ArchiveConfiguration) -> TransferResult<AuthToken> {
        let credentials = &config.credentials;
        if credentials.username.trim().is_empty() || credentials.password.trim().is_empty() {
            return Err(TransferError::AuthenticationFailed(format!(
                "archive {} has no access key configured",
                config.id
            )));
        }

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .retry_config(retry_config)
            .credentials_provider(Credentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
                None,
                None,
                "strata-archive",
            ));

        // S3-compatible providers need path-style addressing
        if let Some(ref endpoint) = config.url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let session = S3Session {
            client: Client::from_conf(builder.build()),
            region,
            endpoint_url: config.url.clone(),
            access_key_id: credentials.username.clone(),
            secret_access_key: credentials.password.clone(),
        };

        tracing::debug!(archive = %config.id, provider = %config.provider, "S3 session created");

        Ok(AuthToken::new(
            DataTransferType::S3,
            config.id.clone(),
            credentials.username.clone(),
            session,
        ))
    }

    async fn accepts_transfer_requests(&self, _token: &AuthToken) -> TransferResult<bool> {
        Ok(true)
    }

    async fn upload_data_object(
        &self,
        token: &AuthToken,
        request: &UploadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        let session = token.session::<S3Session>()?.clone();
        let bucket = request.destination.file_container_id.clone();
        let key = object_key(&request.destination)?;
        let metadata = request.metadata.clone();
        let threshold = self.multipart_threshold;
        let tracker_listener = listener.clone();

        match request.source.clone() {
            UploadSource::LocalFile(path) => {
                let size = tokio::fs::metadata(&path)
                    .await
                    .map_err(|e| {
                        TransferError::NotFound(format!("{}: {}", path.display(), e))
                    })?
                    .len();
                let work = async move {
                    let file = tokio::fs::File::open(&path).await?;
                    let mut tracker = ProgressTracker::new(tracker_listener, Some(size));
                    put_object_from_reader(
                        &session.client,
                        &bucket,
                        &key,
                        file,
                        Some(size),
                        threshold,
                        &metadata,
                        &mut tracker,
                    )
                    .await
                };
                self.transfers.run(listener, work).await
            }
            UploadSource::Url { url, size } => {
                let http = self.http.clone();
                let work = async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status())
                        .map_err(|e| {
                            TransferError::TransferFailed(format!("source URL unreadable: {}", e))
                        })?;
                    let size = size.or(response.content_length());
                    let stream = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(std::io::Error::other));
                    let reader = StreamReader::new(Box::pin(stream));
                    let mut tracker = ProgressTracker::new(tracker_listener, size);
                    put_object_from_reader(
                        &session.client,
                        &bucket,
                        &key,
                        reader,
                        size,
                        threshold,
                        &metadata,
                        &mut tracker,
                    )
                    .await
                };
                self.transfers.run(listener, work).await
            }
            UploadSource::RemoteLocation(location) => Err(TransferError::Unsupported(format!(
                "S3 cannot pull from managed endpoint location {}",
                location
            ))),
        }
    }

    async fn download_data_object(
        &self,
        token: &AuthToken,
        request: &DownloadRequest,
        listener: Option<Arc<dyn TransferProgressListener>>,
    ) -> TransferResult<TransferResponse> {
        let session = token.session::<S3Session>()?.clone();
        let source = request.source.clone();
        let key = object_key(&source)?;

        match request.target.clone() {
            DownloadTarget::LocalFile(path) => {
                let tracker_listener = listener.clone();
                let work = async move {
                    let start = std::time::Instant::now();
                    let store = session.store(&source.file_container_id)?;
                    let location = Path::from(key.clone());

                    let result: ObjectResult<_> = store.get(&location).await;
                    let result = result.map_err(|e| match e {
                        ObjectStoreError::NotFound { .. } => {
                            TransferError::NotFound(source.to_string())
                        }
                        other => TransferError::TransferFailed(other.to_string()),
                    })?;

                    let size = result.meta.size;
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    let mut file = tokio::fs::File::create(&path).await?;
                    let mut tracker = ProgressTracker::new(tracker_listener, Some(size));
                    let mut stream = result.into_stream();
                    while let Some(chunk) = stream.next().await {
                        let chunk =
                            chunk.map_err(|e| TransferError::TransferFailed(e.to_string()))?;
                        file.write_all(&chunk).await?;
                        tracker.advance(chunk.len() as u64).await;
                    }
                    file.sync_all().await?;

                    tracing::info!(
                        bucket = %source.file_container_id,
                        key = %key,
                        path = %path.display(),
                        size_bytes = tracker.transferred(),
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "S3 download successful"
                    );
                    Ok((tracker.transferred(), None))
                };
                self.transfers.run(listener, work).await
            }
            DownloadTarget::Remote(destination)
                if destination.transfer_type == DataTransferType::S3 =>
            {
                let copy_source = copy_source(&source)?;
                let dest_key = object_key(&destination.location)?;
                let work = async move {
                    let output = session
                        .client
                        .copy_object()
                        .bucket(&destination.location.file_container_id)
                        .key(&dest_key)
                        .copy_source(copy_source)
                        .send()
                        .await
                        .map_err(|e| TransferError::TransferFailed(e.to_string()))?;
                    let checksum = output
                        .copy_object_result()
                        .and_then(|r| r.e_tag())
                        .map(|t| t.trim_matches('"').to_string());
                    Ok((0, checksum))
                };
                self.transfers.run(listener, work).await
            }
            DownloadTarget::Remote(destination) => Err(TransferError::Unsupported(format!(
                "S3 archive cannot write to a {} destination",
                destination.transfer_type
            ))),
        }
    }

    async fn delete_data_object(
        &self,
        token: &AuthToken,
        location: &FileLocation,
    ) -> TransferResult<()> {
        let session = token.session::<S3Session>()?;
        let key = object_key(location)?;
        let start = std::time::Instant::now();

        session
            .client
            .delete_object()
            .bucket(&location.file_container_id)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, location = %location, "S3 delete failed");
                TransferError::BackendError(e.to_string())
            })?;

        tracing::info!(
            location = %location,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );
        Ok(())
    }

    async fn get_path_attributes(
        &self,
        token: &AuthToken,
        location: &FileLocation,
        _want_size: bool,
    ) -> TransferResult<PathAttributes> {
        let session = token.session::<S3Session>()?;
        let key = object_key(location)?;

        match session
            .client
            .head_object()
            .bucket(&location.file_container_id)
            .key(&key)
            .send()
            .await
        {
            Ok(head) => {
                let mut attributes =
                    PathAttributes::file(head.content_length().map(|len| len.max(0) as u64));
                attributes.storage_class = head.storage_class().map(|c| c.as_str().to_string());
                Ok(attributes)
            }
            Err(SdkError::ServiceError(service_err))
                if matches!(service_err.err(), HeadObjectError::NotFound(_)) =>
            {
                // No object at the key; a non-empty prefix makes it a directory
                let listing = session
                    .client
                    .list_objects_v2()
                    .bucket(&location.file_container_id)
                    .prefix(format!("{}/", key.trim_end_matches('/')))
                    .max_keys(1)
                    .send()
                    .await
                    .map_err(|e| TransferError::BackendError(e.to_string()))?;
                if listing.key_count().unwrap_or(0) > 0 {
                    Ok(PathAttributes::directory())
                } else {
                    Ok(PathAttributes::missing())
                }
            }
            Err(e) if e.raw_response().map(|r| r.status().as_u16()) == Some(403) => {
                Ok(PathAttributes::default())
            }
            Err(e) => Err(TransferError::BackendError(e.to_string())),
        }
    }

    async fn get_transfer_status(
        &self,
        _token: &AuthToken,
        request_id: &str,
    ) -> TransferResult<TransferStatusReport> {
        self.transfers.lookup(request_id)
    }

    async fn get_transfer_size(&self, _token: &AuthToken, request_id: &str) -> TransferResult<u64> {
        match self.transfers.lookup(request_id)? {
            TransferStatusReport::Completed { bytes_transferred } => {
                Ok(bytes_transferred.unwrap_or(0))
            }
            _ => Ok(0),
        }
    }

    async fn set_tiering_policy(
        &self,
        token: &AuthToken,
        policy: &TieringPolicy,
    ) -> TransferResult<()> {
        let session = token.session::<S3Session>()?;
        let rule_id = lifecycle_rule_id(&policy.prefix);

        let mut rules: Vec<LifecycleRule> = match session
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(&policy.bucket)
            .send()
            .await
        {
            Ok(output) => output.rules().to_vec(),
            Err(e) if e.code() == Some("NoSuchLifecycleConfiguration") => Vec::new(),
            Err(e) => return Err(TransferError::BackendError(e.to_string())),
        };
        rules.retain(|rule| rule.id() != Some(rule_id.as_str()));

        let rule = LifecycleRule::builder()
            .id(&rule_id)
            .filter(LifecycleRuleFilter::builder().prefix(&policy.prefix).build())
            .status(ExpirationStatus::Enabled)
            .transitions(
                Transition::builder()
                    .days(policy.transition_days)
                    .storage_class(TransitionStorageClass::from(policy.storage_class.as_str()))
                    .build(),
            )
            .build()
            .map_err(|e| TransferError::ConfigError(e.to_string()))?;
        rules.push(rule);

        let configuration = BucketLifecycleConfiguration::builder()
            .set_rules(Some(rules))
            .build()
            .map_err(|e| TransferError::ConfigError(e.to_string()))?;

        session
            .client
            .put_bucket_lifecycle_configuration()
            .bucket(&policy.bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(|e| TransferError::BackendError(e.to_string()))?;

        tracing::info!(
            bucket = %policy.bucket,
            prefix = %policy.prefix,
            storage_class = %policy.storage_class,
            rule_id = %rule_id,
            "Lifecycle rule applied"
        );
        Ok(())
    }

    async fn generate_download_url(
        &self,
        token: &AuthToken,
        location: &FileLocation,
        expires_in: Duration,
    ) -> TransferResult<String> {
        let session = token.session::<S3Session>()?;
        let store = session.store(&location.file_container_id)?;
        let path = Path::from(object_key(location)?);

        let url_result: ObjectResult<_> = store.signed_url(Method::GET, &path, expires_in).await;
        Ok(url_result
            .map_err(|e| TransferError::BackendError(e.to_string()))?
            .to_string())
    }

    async fn add_archive_metadata(
        &self,
        token: &AuthToken,
        location: &FileLocation,
        metadata: &BTreeMap<String, String>,
    ) -> TransferResult<()> {
        let session = token.session::<S3Session>()?;
        let key = object_key(location)?;

        let head = session
            .client
            .head_object()
            .bucket(&location.file_container_id)
            .key(&key)
            .send()
            .await
            .map_err(|e| TransferError::BackendError(e.to_string()))?;

        let mut merged: HashMap<String, String> = head.metadata().cloned().unwrap_or_default();
        merged.extend(metadata.clone());

        session
            .client
            .copy_object()
            .bucket(&location.file_container_id)
            .key(&key)
            .copy_source(copy_source(location)?)
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(merged))
            .send()
            .await
            .map_err(|e| TransferError::BackendError(e.to_string()))?;

        Ok(())
    }
}
