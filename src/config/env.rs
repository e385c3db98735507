use std::collections::HashMap;
use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    QueueBackend,
    QueueName,
    RedisUrl,
    RabbitMqUrl,
    StorageEndpoint,
    StorageBucket,
    StorageRegion,
    StorageAccessKey,
    StorageSecretKey,
    ScratchDir,
    FfmpegPath,
    DownloadTimeoutSecs,
    PollTimeoutSecs,
    WorkerConcurrency,
    TranscodePermits,
    ShutdownGraceSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::QueueBackend => "QUEUE_BACKEND",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::StorageEndpoint => "STORAGE_ENDPOINT",
            EnvKey::StorageBucket => "STORAGE_BUCKET",
            EnvKey::StorageRegion => "STORAGE_REGION",
            EnvKey::StorageAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::StorageSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::ScratchDir => "SCRATCH_DIR",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::DownloadTimeoutSecs => "DOWNLOAD_TIMEOUT_SECS",
            EnvKey::PollTimeoutSecs => "POLL_TIMEOUT_SECS",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::TranscodePermits => "TRANSCODE_PERMITS",
            EnvKey::ShutdownGraceSecs => "SHUTDOWN_GRACE_SECS",
        }
    }
}

/// Where configuration values come from. The process environment in
/// production, a plain map in tests.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Value of `key`, treating blank values as unset.
pub fn get_opt(source: &impl EnvSource, key: EnvKey) -> Option<String> {
    source
        .var(key.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn get(source: &impl EnvSource, key: EnvKey) -> Result<String, &'static str> {
    let name = key.as_str();
    get_opt(source, key).ok_or(name)
}

pub fn get_or(source: &impl EnvSource, key: EnvKey, default: &str) -> String {
    get_opt(source, key).unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T: FromStr>(source: &impl EnvSource, key: EnvKey, default: T) -> T {
    match get_opt(source, key) {
        Some(val) => val.parse::<T>().unwrap_or(default),
        None => default,
    }
}
