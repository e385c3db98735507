use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::manifest::{self, MANIFEST_CONTENT_TYPE, MANIFEST_NAME};
use super::model::Artifact;
use crate::common::error::{AcquisitionError, AcquisitionResult, Stage};

/// Durable shared object storage. One PUT per object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> AcquisitionResult<()>;

    async fn put_bytes(&self, key: &str, body: Bytes, content_type: &str) -> AcquisitionResult<()>;
}

/// `{content_type}/{canonical_id}/{target_quality}/{filename}`
pub fn object_key(content_type: &str, canonical_id: &str, target_quality: &str, file_name: &str) -> String {
    format!("{content_type}/{canonical_id}/{target_quality}/{file_name}")
}

#[derive(Clone)]
pub struct Publisher {
    store: Option<Arc<dyn ObjectStore>>,
}

impl Publisher {
    /// `None` runs in degraded mode: uploads are logged and skipped.
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        if store.is_none() {
            warn!("⚠️ Object store not configured, publishing is a no-op");
        }
        Self { store }
    }

    /// Uploads every artifact, then the manifest. Returns the manifest key.
    pub async fn publish(
        &self,
        content_type: &str,
        canonical_id: &str,
        target_quality: &str,
        artifacts: &[Artifact],
        cancel: &CancellationToken,
    ) -> AcquisitionResult<String> {
        let manifest_key = object_key(content_type, canonical_id, target_quality, MANIFEST_NAME);

        let Some(store) = &self.store else {
            warn!(
                canonical_id,
                artifacts = artifacts.len(),
                key = %manifest_key,
                "Object store disabled, skipping upload"
            );
            return Ok(manifest_key);
        };

        for artifact in artifacts {
            let key = object_key(content_type, canonical_id, target_quality, &artifact.file_name);
            let mime = mime_guess::from_path(&artifact.file_name).first_or_octet_stream();
            cancellable(cancel, store.put_file(&key, &artifact.path, mime.essence_str())).await?;
            info!(key = %key, "⬆️ Published artifact");
        }

        // Last, so a visible manifest implies every rendition is in place.
        let body = Bytes::from(manifest::render(artifacts));
        cancellable(cancel, store.put_bytes(&manifest_key, body, MANIFEST_CONTENT_TYPE)).await?;
        info!(key = %manifest_key, "⬆️ Published manifest");

        Ok(manifest_key)
    }
}

async fn cancellable<F>(cancel: &CancellationToken, upload: F) -> AcquisitionResult<()>
where
    F: std::future::Future<Output = AcquisitionResult<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AcquisitionError::Cancelled { stage: Stage::Publish }),
        res = upload => res,
    }
}
