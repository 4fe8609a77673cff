use crate::error::{Result, SyncError};
use crate::scheduler::{ArchiveSchedule, DEFAULT_SCHEDULE};
use crate::sync::archive::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(SyncError::Config(format!(
                "Unknown STORE_BACKEND '{other}', expected 'postgres' or 'memory'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Document store settings
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub database_pool_size: u32,

    // Redis settings
    pub redis_url: String,
    pub stream_names: Vec<String>,
    pub consumer_group: String,
    pub consumer_name: String,
    pub claim_idle_ms: u64,

    // Processing settings
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub workers: usize,

    // Archive settings
    pub archive_page_size: usize,
    pub archive_schedule: String,
    pub archive_retry_count: u32,

    // Circuit breaker settings
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,

    // HTTP server settings
    pub http_port: u16,

    // Shutdown settings
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_backend: StoreBackend::Postgres,
            database_url: String::new(),
            database_pool_size: 10,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            stream_names: vec!["document_writes".to_string()],
            consumer_group: "review-sync".to_string(),
            consumer_name: format!("consumer-{}", uuid::Uuid::new_v4()),
            claim_idle_ms: 60_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            workers: 4,
            archive_page_size: DEFAULT_PAGE_SIZE,
            archive_schedule: DEFAULT_SCHEDULE.to_string(),
            archive_retry_count: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 60_000,
            http_port: 8080,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Read and parse `key`, keeping `default` when it is unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.store_backend,
        };

        let database_url = match (env::var("DATABASE_URL"), store_backend) {
            (Ok(url), _) => url,
            (Err(_), StoreBackend::Memory) => String::new(),
            (Err(_), StoreBackend::Postgres) => {
                return Err(SyncError::Config("DATABASE_URL is required".to_string()))
            }
        };

        Ok(Config {
            store_backend,
            database_url,
            database_pool_size: env_or("DATABASE_POOL_SIZE", defaults.database_pool_size),

            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_names: env::var("REDIS_STREAMS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.stream_names),
            consumer_group: env::var("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_name: env::var("CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            claim_idle_ms: env_or("CLAIM_IDLE_MS", defaults.claim_idle_ms),

            batch_size: env_or("BATCH_SIZE", defaults.batch_size),
            batch_timeout_ms: env_or("BATCH_TIMEOUT_MS", defaults.batch_timeout_ms),
            workers: env_or("WORKERS", defaults.workers),

            archive_page_size: env_or("ARCHIVE_PAGE_SIZE", defaults.archive_page_size),
            archive_schedule: env::var("ARCHIVE_SCHEDULE").unwrap_or(defaults.archive_schedule),
            archive_retry_count: env_or("ARCHIVE_RETRY_COUNT", defaults.archive_retry_count),

            circuit_breaker_threshold: env_or(
                "CIRCUIT_BREAKER_THRESHOLD",
                defaults.circuit_breaker_threshold,
            ),
            circuit_breaker_timeout_ms: env_or(
                "CIRCUIT_BREAKER_TIMEOUT_MS",
                defaults.circuit_breaker_timeout_ms,
            ),

            http_port: env_or("HTTP_PORT", defaults.http_port),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout_secs),
        })
    }

    pub fn schedule(&self) -> Result<ArchiveSchedule> {
        ArchiveSchedule::parse(&self.archive_schedule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_backend == StoreBackend::Postgres && self.database_url.is_empty() {
            return Err(SyncError::Config(
                "DATABASE_URL is required for the postgres backend".to_string(),
            ));
        }

        if self.database_pool_size == 0 {
            return Err(SyncError::Config(
                "Database pool size must be greater than 0".to_string(),
            ));
        }

        if self.stream_names.is_empty() {
            return Err(SyncError::Config(
                "At least one stream is required".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(SyncError::Config(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.workers == 0 {
            return Err(SyncError::Config(
                "Number of workers must be greater than 0".to_string(),
            ));
        }

        if self.batch_timeout_ms == 0 {
            return Err(SyncError::Config(
                "Batch timeout must be greater than 0".to_string(),
            ));
        }

        if self.claim_idle_ms == 0 {
            return Err(SyncError::Config(
                "Claim idle time must be greater than 0".to_string(),
            ));
        }

        if self.archive_page_size == 0 {
            return Err(SyncError::Config(
                "Archive page size must be greater than 0".to_string(),
            ));
        }

        self.schedule()?;

        if self.circuit_breaker_timeout_ms == 0 {
            return Err(SyncError::Config(
                "Circuit breaker timeout must be greater than 0".to_string(),
            ));
        }

        if self.http_port == 0 {
            return Err(SyncError::Config(
                "HTTP port must be between 1 and 65535".to_string(),
            ));
        }

        if self.shutdown_timeout_secs == 0 {
            return Err(SyncError::Config(
                "Shutdown timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
