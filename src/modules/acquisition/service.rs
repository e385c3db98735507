use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::downloader::{Downloader, source_extension};
use super::events::AcquisitionJob;
use super::hasher::sha256_file;
use super::lock::LockManager;
use super::model::AcquisitionOutcome;
use super::publisher::Publisher;
use super::repository::Ledger;
use super::strategy::strategy_for;
use super::transformer::Transformer;
use crate::common::error::{AcquisitionError, AcquisitionResult, Stage};

/// Drives one job through early exit, lock, download, hash, transform,
/// publish and completion. Everything it touches is passed in, so tests can
/// run isolated instances side by side.
pub struct AcquisitionService {
    ledger: Arc<dyn Ledger>,
    locks: Arc<dyn LockManager>,
    downloader: Downloader,
    transformer: Transformer,
    publisher: Publisher,
    transcode_permits: Arc<Semaphore>,
    scratch_root: PathBuf,
}

impl AcquisitionService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        locks: Arc<dyn LockManager>,
        downloader: Downloader,
        transformer: Transformer,
        publisher: Publisher,
        transcode_permits: Arc<Semaphore>,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            ledger,
            locks,
            downloader,
            transformer,
            publisher,
            transcode_permits,
            scratch_root,
        }
    }

    #[instrument(
        name = "acquire",
        skip_all,
        fields(job_id = %job.job_id, canonical_id = %job.canonical_id, content_type = %job.content_type)
    )]
    pub async fn acquire(
        &self,
        job: &AcquisitionJob,
        cancel: &CancellationToken,
    ) -> AcquisitionResult<AcquisitionOutcome> {
        if let Some(record) = self.ledger.find(&job.canonical_id).await? {
            if record.is_complete() {
                info!("Already published, nothing to do");
                return Ok(AcquisitionOutcome::AlreadyComplete {
                    r2_path: record.r2_path,
                });
            }
        }

        let Some(lease) = self.locks.try_acquire(&job.canonical_id).await? else {
            info!("Another worker holds this item, deferring");
            return Ok(AcquisitionOutcome::Busy);
        };

        let result = self.run_locked(job, cancel).await;
        lease.release().await;
        result
    }

    async fn run_locked(
        &self,
        job: &AcquisitionJob,
        cancel: &CancellationToken,
    ) -> AcquisitionResult<AcquisitionOutcome> {
        // A previous holder may have finished between the first check and the lock.
        if let Some(record) = self.ledger.find(&job.canonical_id).await? {
            if record.is_complete() {
                info!("Completed by a previous lock holder");
                return Ok(AcquisitionOutcome::AlreadyComplete {
                    r2_path: record.r2_path,
                });
            }
        }
        self.ledger.ensure_queued(&job.canonical_id).await?;

        match self.drive(job, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.record_failure(&job.canonical_id, &err).await;
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        job: &AcquisitionJob,
        cancel: &CancellationToken,
    ) -> AcquisitionResult<AcquisitionOutcome> {
        let id = job.canonical_id.as_str();
        let strategy = strategy_for(&job.content_type);

        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(AcquisitionError::Scratch)?;
        // Removed on drop, whichever way this function exits.
        let scratch = tempfile::Builder::new()
            .prefix("acq-")
            .tempdir_in(&self.scratch_root)
            .map_err(AcquisitionError::Scratch)?;

        self.ledger.mark_downloading(id).await?;
        info!(url = %job.source_url, "⬇️ Downloading source");
        let source = scratch
            .path()
            .join(format!("source.{}", source_extension(&job.source_url)));
        let bytes = self.downloader.fetch(&job.source_url, &source, cancel).await?;

        let content_hash = sha256_file(&source).await?;
        info!(sha256 = %content_hash, bytes, "Source digest computed");

        self.ledger.mark_transcoding(id, &content_hash).await?;
        let out_dir = scratch.path().join("out");
        tokio::fs::create_dir(&out_dir)
            .await
            .map_err(AcquisitionError::Scratch)?;

        let artifacts = {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AcquisitionError::Cancelled { stage: Stage::Transcode });
                }
                permit = self.transcode_permits.acquire() => permit
                    .map_err(|_| AcquisitionError::transform("*", "transcode permits closed"))?,
            };
            info!(?strategy, "🎥 Transforming");
            self.transformer
                .transform(strategy, &source, &out_dir, cancel)
                .await?
        };

        let r2_path = self
            .publisher
            .publish(
                &job.content_type,
                id,
                &job.target_quality,
                &artifacts,
                cancel,
            )
            .await?;

        self.ledger.mark_complete(id, &r2_path).await?;
        info!(r2_path = %r2_path, "✅ Acquisition complete");

        Ok(AcquisitionOutcome::Completed {
            r2_path,
            content_hash,
            artifacts: artifacts.into_iter().map(|a| a.file_name).collect(),
        })
    }

    async fn record_failure(&self, canonical_id: &str, err: &AcquisitionError) {
        match self.ledger.mark_failed(canonical_id, &err.ledger_message()).await {
            Ok(true) => error!(stage = %err.stage(), error = %err, "❌ Acquisition failed"),
            Ok(false) => warn!(error = %err, "Late failure ignored, item already complete"),
            Err(e) => error!(error = %err, ledger_error = %e, "❌ Acquisition failed and could not be recorded"),
        }
    }
}
