//! Configuration module
//!
//! Everything the orchestrator tunes at runtime is read from the environment
//! (optionally seeded from a `.env` file) with typed defaults.

use std::env;

// Common constants
const PORT: u16 = 4000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

const SYNC_SIZE_THRESHOLD_MB: u64 = 100;
const SYNC_FAST_MIME_TYPES: &str = "video/mp4,video/webm,video/x-m4v";
const SYNC_POLL_INTERVAL_SECS: u64 = 5;
const SYNC_DEADLINE_SECS: u64 = 90;
const PROVIDER_TRANSIENT_RETRIES: u32 = 3;

const FIND_OR_CREATE_MAX_ATTEMPTS: u32 = 2;

const WEBHOOK_LEDGER_RETENTION_DAYS: i64 = 7;
const WEBHOOK_LOOKUP_RETRIES: u32 = 5;
const WEBHOOK_LOOKUP_BACKOFF_MS: u64 = 200;

const THUMBNAIL_TIER_TIMEOUT_SECS: u64 = 10;
const THUMBNAIL_PLACEHOLDER_URL: &str = "/static/video-placeholder.svg";
const REPROCESS_BATCH_SIZE: u32 = 25;
pub const MAX_REPROCESS_BATCH_SIZE: u32 = 100;

const JOB_QUEUE_MAX_WORKERS: usize = 4;
const JOB_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const JOB_QUEUE_MAX_RETRIES: i32 = 3;
const JOB_QUEUE_TIMEOUT_SECS: u64 = 600;
const STALE_JOB_REAP_INTERVAL_SECS: u64 = 60;
const STALE_JOB_GRACE_PERIOD_SECS: i64 = 3600;

/// Full orchestrator configuration.
#[derive(Clone, Debug)]
pub struct ReelayConfig {
    pub server_port: u16,
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Processing mode selection
    pub sync_size_threshold_bytes: u64,
    pub sync_fast_mime_types: Vec<String>,
    // Synchronous coordinator
    pub sync_poll_interval_secs: u64,
    pub sync_deadline_secs: u64,
    pub provider_transient_retries: u32,
    // Record store
    pub find_or_create_max_attempts: u32,
    // Webhooks
    pub webhook_ledger_retention_days: i64,
    pub webhook_lookup_retries: u32,
    pub webhook_lookup_backoff_ms: u64,
    pub webhook_signing_secret: Option<String>,
    // Thumbnails
    pub thumbnail_tier_timeout_secs: u64,
    pub thumbnail_placeholder_url: String,
    pub thumbnail_synthesized_enabled: bool,
    pub reprocess_batch_size: u32,
    // External processing provider
    pub provider_base_url: String,
    pub provider_token_id: String,
    pub provider_token_secret: String,
    pub provider_playback_policy: String,
    pub provider_image_base_url: String,
    pub provider_stream_base_url: String,
    pub storage_public_base_url: String,
    // Background jobs
    pub job_queue_max_workers: usize,
    pub job_queue_poll_interval_ms: u64,
    pub job_queue_max_retries: i32,
    pub job_queue_timeout_secs: u64,
    /// Interval in seconds between runs of the stale job reaper. 0 = disabled.
    pub stale_job_reap_interval_secs: u64,
    pub stale_job_grace_period_secs: i64,
    pub captions_enabled: bool,
    pub audio_enhancement_enabled: bool,
    pub operator_api_key: Option<String>,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<ReelayConfig>);

impl Config {
    fn inner(&self) -> &ReelayConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.inner().environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = ReelayConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.inner().server_port
    }

    pub fn environment(&self) -> &str {
        &self.inner().environment
    }

    pub fn database_url(&self) -> &str {
        &self.inner().database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().db_timeout_seconds
    }

    pub fn sync_size_threshold_bytes(&self) -> u64 {
        self.inner().sync_size_threshold_bytes
    }

    pub fn sync_fast_mime_types(&self) -> &[String] {
        &self.inner().sync_fast_mime_types
    }

    pub fn sync_poll_interval_secs(&self) -> u64 {
        self.inner().sync_poll_interval_secs
    }

    pub fn sync_deadline_secs(&self) -> u64 {
        self.inner().sync_deadline_secs
    }

    pub fn provider_transient_retries(&self) -> u32 {
        self.inner().provider_transient_retries
    }

    pub fn find_or_create_max_attempts(&self) -> u32 {
        self.inner().find_or_create_max_attempts
    }

    pub fn webhook_ledger_retention_days(&self) -> i64 {
        self.inner().webhook_ledger_retention_days
    }

    pub fn webhook_lookup_retries(&self) -> u32 {
        self.inner().webhook_lookup_retries
    }

    pub fn webhook_lookup_backoff_ms(&self) -> u64 {
        self.inner().webhook_lookup_backoff_ms
    }

    pub fn webhook_signing_secret(&self) -> Option<&str> {
        self.inner().webhook_signing_secret.as_deref()
    }

    pub fn thumbnail_tier_timeout_secs(&self) -> u64 {
        self.inner().thumbnail_tier_timeout_secs
    }

    pub fn thumbnail_placeholder_url(&self) -> &str {
        &self.inner().thumbnail_placeholder_url
    }

    pub fn thumbnail_synthesized_enabled(&self) -> bool {
        self.inner().thumbnail_synthesized_enabled
    }

    pub fn reprocess_batch_size(&self) -> u32 {
        self.inner().reprocess_batch_size
    }

    pub fn provider_base_url(&self) -> &str {
        &self.inner().provider_base_url
    }

    pub fn provider_token_id(&self) -> &str {
        &self.inner().provider_token_id
    }

    pub fn provider_token_secret(&self) -> &str {
        &self.inner().provider_token_secret
    }

    pub fn provider_playback_policy(&self) -> &str {
        &self.inner().provider_playback_policy
    }

    pub fn provider_image_base_url(&self) -> &str {
        &self.inner().provider_image_base_url
    }

    pub fn provider_stream_base_url(&self) -> &str {
        &self.inner().provider_stream_base_url
    }

    pub fn storage_public_base_url(&self) -> &str {
        &self.inner().storage_public_base_url
    }

    pub fn job_queue_max_workers(&self) -> usize {
        self.inner().job_queue_max_workers
    }

    pub fn job_queue_poll_interval_ms(&self) -> u64 {
        self.inner().job_queue_poll_interval_ms
    }

    pub fn job_queue_max_retries(&self) -> i32 {
        self.inner().job_queue_max_retries
    }

    pub fn job_queue_timeout_secs(&self) -> u64 {
        self.inner().job_queue_timeout_secs
    }

    pub fn stale_job_reap_interval_secs(&self) -> u64 {
        self.inner().stale_job_reap_interval_secs
    }

    pub fn stale_job_grace_period_secs(&self) -> i64 {
        self.inner().stale_job_grace_period_secs
    }

    pub fn captions_enabled(&self) -> bool {
        self.inner().captions_enabled
    }

    pub fn audio_enhancement_enabled(&self) -> bool {
        self.inner().audio_enhancement_enabled
    }

    pub fn operator_api_key(&self) -> Option<&str> {
        self.inner().operator_api_key.as_deref()
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .to_lowercase()
        .parse()
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl ReelayConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let sync_size_threshold_mb = env::var("SYNC_SIZE_THRESHOLD_MB")
            .unwrap_or_else(|_| SYNC_SIZE_THRESHOLD_MB.to_string())
            .parse::<u64>()
            .unwrap_or(SYNC_SIZE_THRESHOLD_MB);

        let config = ReelayConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            sync_size_threshold_bytes: sync_size_threshold_mb * 1024 * 1024,
            sync_fast_mime_types: env::var("SYNC_FAST_MIME_TYPES")
                .unwrap_or_else(|_| SYNC_FAST_MIME_TYPES.to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            sync_poll_interval_secs: env::var("SYNC_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| SYNC_POLL_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(SYNC_POLL_INTERVAL_SECS),
            sync_deadline_secs: env::var("SYNC_DEADLINE_SECS")
                .unwrap_or_else(|_| SYNC_DEADLINE_SECS.to_string())
                .parse()
                .unwrap_or(SYNC_DEADLINE_SECS),
            provider_transient_retries: env::var("PROVIDER_TRANSIENT_RETRIES")
                .unwrap_or_else(|_| PROVIDER_TRANSIENT_RETRIES.to_string())
                .parse()
                .unwrap_or(PROVIDER_TRANSIENT_RETRIES),
            find_or_create_max_attempts: env::var("FIND_OR_CREATE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| FIND_OR_CREATE_MAX_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(FIND_OR_CREATE_MAX_ATTEMPTS),
            webhook_ledger_retention_days: env::var("WEBHOOK_LEDGER_RETENTION_DAYS")
                .unwrap_or_else(|_| WEBHOOK_LEDGER_RETENTION_DAYS.to_string())
                .parse()
                .unwrap_or(WEBHOOK_LEDGER_RETENTION_DAYS),
            webhook_lookup_retries: env::var("WEBHOOK_LOOKUP_RETRIES")
                .unwrap_or_else(|_| WEBHOOK_LOOKUP_RETRIES.to_string())
                .parse()
                .unwrap_or(WEBHOOK_LOOKUP_RETRIES),
            webhook_lookup_backoff_ms: env::var("WEBHOOK_LOOKUP_BACKOFF_MS")
                .unwrap_or_else(|_| WEBHOOK_LOOKUP_BACKOFF_MS.to_string())
                .parse()
                .unwrap_or(WEBHOOK_LOOKUP_BACKOFF_MS),
            webhook_signing_secret: non_empty("WEBHOOK_SIGNING_SECRET"),
            thumbnail_tier_timeout_secs: env::var("THUMBNAIL_TIER_TIMEOUT_SECS")
                .unwrap_or_else(|_| THUMBNAIL_TIER_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(THUMBNAIL_TIER_TIMEOUT_SECS),
            thumbnail_placeholder_url: env::var("THUMBNAIL_PLACEHOLDER_URL")
                .unwrap_or_else(|_| THUMBNAIL_PLACEHOLDER_URL.to_string()),
            thumbnail_synthesized_enabled: parse_bool("THUMBNAIL_SYNTHESIZED_ENABLED", true),
            reprocess_batch_size: env::var("REPROCESS_BATCH_SIZE")
                .unwrap_or_else(|_| REPROCESS_BATCH_SIZE.to_string())
                .parse::<u32>()
                .unwrap_or(REPROCESS_BATCH_SIZE)
                .clamp(1, MAX_REPROCESS_BATCH_SIZE),
            provider_base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.mux.com".to_string()),
            provider_token_id: env::var("PROVIDER_TOKEN_ID")
                .map_err(|_| anyhow::anyhow!("PROVIDER_TOKEN_ID must be set"))?,
            provider_token_secret: env::var("PROVIDER_TOKEN_SECRET")
                .map_err(|_| anyhow::anyhow!("PROVIDER_TOKEN_SECRET must be set"))?,
            provider_playback_policy: env::var("PROVIDER_PLAYBACK_POLICY")
                .unwrap_or_else(|_| "public".to_string())
                .to_lowercase(),
            provider_image_base_url: env::var("PROVIDER_IMAGE_BASE_URL")
                .unwrap_or_else(|_| "https://image.mux.com".to_string()),
            provider_stream_base_url: env::var("PROVIDER_STREAM_BASE_URL")
                .unwrap_or_else(|_| "https://stream.mux.com".to_string()),
            storage_public_base_url: env::var("STORAGE_PUBLIC_BASE_URL")
                .map_err(|_| anyhow::anyhow!("STORAGE_PUBLIC_BASE_URL must be set"))?,
            job_queue_max_workers: env::var("JOB_QUEUE_MAX_WORKERS")
                .unwrap_or_else(|_| JOB_QUEUE_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_MAX_WORKERS),
            job_queue_poll_interval_ms: env::var("JOB_QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| JOB_QUEUE_POLL_INTERVAL_MS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_POLL_INTERVAL_MS),
            job_queue_max_retries: env::var("JOB_QUEUE_MAX_RETRIES")
                .unwrap_or_else(|_| JOB_QUEUE_MAX_RETRIES.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_MAX_RETRIES),
            job_queue_timeout_secs: env::var("JOB_QUEUE_TIMEOUT_SECS")
                .unwrap_or_else(|_| JOB_QUEUE_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_TIMEOUT_SECS),
            stale_job_reap_interval_secs: env::var("STALE_JOB_REAP_INTERVAL_SECS")
                .unwrap_or_else(|_| STALE_JOB_REAP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(STALE_JOB_REAP_INTERVAL_SECS),
            stale_job_grace_period_secs: env::var("STALE_JOB_GRACE_PERIOD_SECS")
                .unwrap_or_else(|_| STALE_JOB_GRACE_PERIOD_SECS.to_string())
                .parse()
                .unwrap_or(STALE_JOB_GRACE_PERIOD_SECS),
            captions_enabled: parse_bool("CAPTIONS_ENABLED", true),
            audio_enhancement_enabled: parse_bool("AUDIO_ENHANCEMENT_ENABLED", false),
            operator_api_key: non_empty("OPERATOR_API_KEY"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.sync_poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("SYNC_POLL_INTERVAL_SECS must be at least 1"));
        }

        if self.sync_deadline_secs < self.sync_poll_interval_secs {
            return Err(anyhow::anyhow!(
                "SYNC_DEADLINE_SECS must not be shorter than SYNC_POLL_INTERVAL_SECS"
            ));
        }

        if self.find_or_create_max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "FIND_OR_CREATE_MAX_ATTEMPTS must be at least 1"
            ));
        }

        if self.webhook_ledger_retention_days < 1 {
            return Err(anyhow::anyhow!(
                "WEBHOOK_LEDGER_RETENTION_DAYS must be at least 1"
            ));
        }

        if self.job_queue_max_workers == 0 {
            return Err(anyhow::anyhow!("JOB_QUEUE_MAX_WORKERS must be at least 1"));
        }

        let is_production = {
            let env = self.environment.to_lowercase();
            env == "production" || env == "prod"
        };
        if is_production && self.webhook_signing_secret.is_none() {
            return Err(anyhow::anyhow!(
                "WEBHOOK_SIGNING_SECRET must be set in production"
            ));
        }

        Ok(())
    }

    /// Configuration suitable for tests and local tooling; never read from the environment.
    pub fn for_tests() -> Self {
        ReelayConfig {
            server_port: PORT,
            environment: "test".to_string(),
            database_url: "postgres://localhost/reelay_test".to_string(),
            db_max_connections: 5,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            sync_size_threshold_bytes: SYNC_SIZE_THRESHOLD_MB * 1024 * 1024,
            sync_fast_mime_types: SYNC_FAST_MIME_TYPES
                .split(',')
                .map(|s| s.to_string())
                .collect(),
            sync_poll_interval_secs: SYNC_POLL_INTERVAL_SECS,
            sync_deadline_secs: SYNC_DEADLINE_SECS,
            provider_transient_retries: PROVIDER_TRANSIENT_RETRIES,
            find_or_create_max_attempts: FIND_OR_CREATE_MAX_ATTEMPTS,
            webhook_ledger_retention_days: WEBHOOK_LEDGER_RETENTION_DAYS,
            webhook_lookup_retries: WEBHOOK_LOOKUP_RETRIES,
            webhook_lookup_backoff_ms: WEBHOOK_LOOKUP_BACKOFF_MS,
            webhook_signing_secret: None,
            thumbnail_tier_timeout_secs: THUMBNAIL_TIER_TIMEOUT_SECS,
            thumbnail_placeholder_url: THUMBNAIL_PLACEHOLDER_URL.to_string(),
            thumbnail_synthesized_enabled: true,
            reprocess_batch_size: REPROCESS_BATCH_SIZE,
            provider_base_url: "http://provider.test".to_string(),
            provider_token_id: "token-id".to_string(),
            provider_token_secret: "token-secret".to_string(),
            provider_playback_policy: "public".to_string(),
            provider_image_base_url: "https://image.test".to_string(),
            provider_stream_base_url: "https://stream.test".to_string(),
            storage_public_base_url: "https://uploads.test".to_string(),
            job_queue_max_workers: 1,
            job_queue_poll_interval_ms: JOB_QUEUE_POLL_INTERVAL_MS,
            job_queue_max_retries: JOB_QUEUE_MAX_RETRIES,
            job_queue_timeout_secs: JOB_QUEUE_TIMEOUT_SECS,
            stale_job_reap_interval_secs: 0,
            stale_job_grace_period_secs: STALE_JOB_GRACE_PERIOD_SECS,
            captions_enabled: true,
            audio_enhancement_enabled: false,
            operator_api_key: None,
        }
    }
}
