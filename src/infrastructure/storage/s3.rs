use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use tracing::{debug, info};

use crate::common::error::{AcquisitionError, AcquisitionResult};
use crate::config::settings::StorageConfig;
use crate::modules::acquisition::publisher::ObjectStore;

/// S3-compatible bucket (R2, MinIO, AWS).
#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "static",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(sdk_config);

        info!(bucket = %config.bucket, "✅ Object storage configured");

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    async fn put(&self, key: &str, body: ByteStream, content_type: &str) -> AcquisitionResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| AcquisitionError::publish(key, DisplayErrorContext(&e).to_string()))?;

        debug!(bucket = %self.bucket, key, "PUT complete");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> AcquisitionResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| AcquisitionError::publish(key, e.to_string()))?;
        self.put(key, body, content_type).await
    }

    async fn put_bytes(&self, key: &str, body: Bytes, content_type: &str) -> AcquisitionResult<()> {
        self.put(key, ByteStream::from(body), content_type).await
    }
}
