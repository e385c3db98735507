use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::env::{self, EnvKey, EnvSource, ProcessEnv};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueBackend {
    Redis,
    RabbitMq,
}

impl QueueBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueBackend::Redis => "redis",
            QueueBackend::RabbitMq => "rabbitmq",
        }
    }
}

#[derive(Clone, Debug)]
pub enum QueueConfig {
    Redis { url: String },
    RabbitMq { url: String },
}

impl QueueConfig {
    pub fn backend(&self) -> QueueBackend {
        match self {
            QueueConfig::Redis { .. } => QueueBackend::Redis,
            QueueConfig::RabbitMq { .. } => QueueBackend::RabbitMq,
        }
    }
}

/// Object store wiring. Absent entirely when `STORAGE_ENDPOINT` is unset,
/// which puts the publisher in its no-op mode.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub queue: QueueConfig,
    pub queue_name: String,
    pub storage: Option<StorageConfig>,
    pub scratch_dir: PathBuf,
    pub ffmpeg_path: String,
    pub download_timeout: Duration,
    pub poll_timeout: Duration,
    pub worker_concurrency: usize,
    pub transcode_permits: usize,
    pub shutdown_grace: Duration,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &impl EnvSource) -> Result<Self, ConfigError> {
        let queue = match env::get_or(source, EnvKey::QueueBackend, "redis")
            .to_ascii_lowercase()
            .as_str()
        {
            "redis" => QueueConfig::Redis {
                url: env::get(source, EnvKey::RedisUrl).map_err(ConfigError::Missing)?,
            },
            "rabbitmq" | "amqp" => QueueConfig::RabbitMq {
                url: env::get(source, EnvKey::RabbitMqUrl).map_err(ConfigError::Missing)?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: EnvKey::QueueBackend.as_str(),
                    value: other.to_string(),
                });
            }
        };

        let storage = match env::get_opt(source, EnvKey::StorageEndpoint) {
            Some(endpoint) => Some(StorageConfig {
                endpoint,
                bucket: env::get(source, EnvKey::StorageBucket).map_err(ConfigError::Missing)?,
                region: env::get_or(source, EnvKey::StorageRegion, "auto"),
                access_key: env::get(source, EnvKey::StorageAccessKey)
                    .map_err(ConfigError::Missing)?,
                secret_key: env::get(source, EnvKey::StorageSecretKey)
                    .map_err(ConfigError::Missing)?,
            }),
            None => None,
        };

        let scratch_dir = env::get_opt(source, EnvKey::ScratchDir)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("acquisitions"));

        Ok(Self {
            server_port: env::get_parsed(source, EnvKey::ServerPort, 3000),
            database_url: env::get(source, EnvKey::DatabaseUrl).map_err(ConfigError::Missing)?,
            queue,
            queue_name: env::get_or(source, EnvKey::QueueName, "acquisition_jobs"),
            storage,
            scratch_dir,
            ffmpeg_path: env::get_or(source, EnvKey::FfmpegPath, "ffmpeg"),
            download_timeout: Duration::from_secs(env::get_parsed(
                source,
                EnvKey::DownloadTimeoutSecs,
                1800,
            )),
            poll_timeout: Duration::from_secs(
                env::get_parsed(source, EnvKey::PollTimeoutSecs, 5u64).max(1),
            ),
            worker_concurrency: env::get_parsed(source, EnvKey::WorkerConcurrency, 4usize).max(1),
            transcode_permits: env::get_parsed(
                source,
                EnvKey::TranscodePermits,
                default_transcode_permits(),
            )
            .max(1),
            shutdown_grace: Duration::from_secs(env::get_parsed(
                source,
                EnvKey::ShutdownGraceSecs,
                60,
            )),
        })
    }

    /// Consumers each hold a connection while their job holds a lock, plus
    /// headroom for ledger writes and readiness probes.
    pub fn db_max_connections(&self) -> u32 {
        (self.worker_concurrency as u32) * 2 + 4
    }
}

fn default_transcode_permits() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}
