//! Configuration module
//!
//! Environment driven settings for the transfer control plane: database,
//! local staging, archive configuration source, scheduler and telemetry.

use std::env;
use std::path::PathBuf;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Settings shared by every process that talks to the task store
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub log_format: String,
    pub log_filter: String,
}

#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub base: BaseConfig,
    /// Local staging directory for first-hop downloads and attached upload files
    pub download_directory: PathBuf,
    /// JSON file holding archive and data-management configurations
    pub archive_configuration_file: PathBuf,
    /// Files at or above this size are uploaded with multipart streaming
    pub streaming_upload_threshold_bytes: u64,
    /// Fallback expiration for pre-signed URLs when an archive does not set one
    pub presigned_url_expiration_minutes: u32,
    pub deep_archive_max_days: i64,
    pub namespace_proxy_url: Option<String>,
    pub namespace_proxy_token: Option<String>,
    /// System account used for metadata updates that must not run as the caller
    pub system_account_id: String,
    pub scheduler_poll_interval_ms: u64,
    pub scheduler_max_concurrent_tasks: usize,
    pub scheduler_collection_poll_interval_ms: u64,
    pub scheduler_migration_poll_interval_ms: u64,
    pub encryption_key_configured: bool,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<TransferConfig>);

impl Config {
    fn as_transfer(&self) -> &TransferConfig {
        &self.0
    }

    pub fn is_production(&self) -> bool {
        let environment = self.as_transfer().base.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = TransferConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_transfer().validate()
    }

    pub fn environment(&self) -> &str {
        &self.0.base.environment
    }

    pub fn database_url(&self) -> &str {
        &self.0.base.database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.0.base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.0.base.db_timeout_seconds
    }

    pub fn log_format(&self) -> &str {
        &self.0.base.log_format
    }

    pub fn log_filter(&self) -> &str {
        &self.0.base.log_filter
    }

    pub fn download_directory(&self) -> &PathBuf {
        &self.0.download_directory
    }

    pub fn archive_configuration_file(&self) -> &PathBuf {
        &self.0.archive_configuration_file
    }

    pub fn streaming_upload_threshold_bytes(&self) -> u64 {
        self.0.streaming_upload_threshold_bytes
    }

    pub fn presigned_url_expiration_minutes(&self) -> u32 {
        self.0.presigned_url_expiration_minutes
    }

    pub fn deep_archive_max_days(&self) -> i64 {
        self.0.deep_archive_max_days
    }

    pub fn namespace_proxy_url(&self) -> Option<&str> {
        self.0.namespace_proxy_url.as_deref()
    }

    pub fn namespace_proxy_token(&self) -> Option<&str> {
        self.0.namespace_proxy_token.as_deref()
    }

    pub fn system_account_id(&self) -> &str {
        &self.0.system_account_id
    }

    pub fn scheduler_poll_interval_ms(&self) -> u64 {
        self.0.scheduler_poll_interval_ms
    }

    pub fn scheduler_max_concurrent_tasks(&self) -> usize {
        self.0.scheduler_max_concurrent_tasks
    }

    pub fn scheduler_collection_poll_interval_ms(&self) -> u64 {
        self.0.scheduler_collection_poll_interval_ms
    }

    pub fn scheduler_migration_poll_interval_ms(&self) -> u64 {
        self.0.scheduler_migration_poll_interval_ms
    }

    pub fn encryption_key_configured(&self) -> bool {
        self.0.encryption_key_configured
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl TransferConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const STREAMING_UPLOAD_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
        const PRESIGNED_URL_EXPIRATION_MINUTES: u32 = 24 * 60;
        const DEEP_ARCHIVE_MAX_DAYS: i64 = 2;
        const SCHEDULER_POLL_INTERVAL_MS: u64 = 5000;
        const SCHEDULER_MAX_CONCURRENT_TASKS: usize = 8;
        const SCHEDULER_COLLECTION_POLL_INTERVAL_MS: u64 = 10_000;
        const SCHEDULER_MIGRATION_POLL_INTERVAL_MS: u64 = 10_000;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("STRATA_DATABASE_URL"))
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let base = BaseConfig {
            environment,
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| "strata=debug".to_string()),
        };

        let config = TransferConfig {
            base,
            download_directory: env::var("DOWNLOAD_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("strata-downloads")),
            archive_configuration_file: env::var("ARCHIVE_CONFIGURATION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("archives.json")),
            streaming_upload_threshold_bytes: env_or(
                "STREAMING_UPLOAD_THRESHOLD_BYTES",
                STREAMING_UPLOAD_THRESHOLD_BYTES,
            ),
            presigned_url_expiration_minutes: env_or(
                "PRESIGNED_URL_EXPIRATION_MINUTES",
                PRESIGNED_URL_EXPIRATION_MINUTES,
            ),
            deep_archive_max_days: env_or("DEEP_ARCHIVE_MAX_DAYS", DEEP_ARCHIVE_MAX_DAYS),
            namespace_proxy_url: env::var("NAMESPACE_PROXY_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            namespace_proxy_token: env::var("NAMESPACE_PROXY_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            system_account_id: env::var("SYSTEM_ACCOUNT_ID")
                .unwrap_or_else(|_| "strata-system".to_string()),
            scheduler_poll_interval_ms: env_or(
                "SCHEDULER_POLL_INTERVAL_MS",
                SCHEDULER_POLL_INTERVAL_MS,
            ),
            scheduler_max_concurrent_tasks: env_or(
                "SCHEDULER_MAX_CONCURRENT_TASKS",
                SCHEDULER_MAX_CONCURRENT_TASKS,
            ),
            scheduler_collection_poll_interval_ms: env_or(
                "SCHEDULER_COLLECTION_POLL_INTERVAL_MS",
                SCHEDULER_COLLECTION_POLL_INTERVAL_MS,
            ),
            scheduler_migration_poll_interval_ms: env_or(
                "SCHEDULER_MIGRATION_POLL_INTERVAL_MS",
                SCHEDULER_MIGRATION_POLL_INTERVAL_MS,
            ),
            encryption_key_configured: env::var("ENCRYPTION_KEY")
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.base.database_url.starts_with("postgres://")
            && !self.base.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.scheduler_max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!(
                "SCHEDULER_MAX_CONCURRENT_TASKS must be greater than zero"
            ));
        }

        if self.deep_archive_max_days < 0 {
            return Err(anyhow::anyhow!("DEEP_ARCHIVE_MAX_DAYS cannot be negative"));
        }

        if !matches!(self.base.log_format.as_str(), "text" | "json") {
            return Err(anyhow::anyhow!("LOG_FORMAT must be 'text' or 'json'"));
        }

        Ok(())
    }
}
