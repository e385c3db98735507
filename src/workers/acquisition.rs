use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::infrastructure::queue::JobQueue;
use crate::modules::acquisition::events::AcquisitionJob;
use crate::modules::acquisition::model::AcquisitionOutcome;
use crate::modules::acquisition::service::AcquisitionService;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// One consumer: pull, decode, acquire, settle, repeat.
///
/// `shutdown` stops polling; a job already in flight runs on until it
/// finishes or `abort` fires.
pub async fn run_consumer(
    consumer: usize,
    queue: Arc<dyn JobQueue>,
    service: Arc<AcquisitionService>,
    poll_timeout: Duration,
    shutdown: CancellationToken,
    abort: CancellationToken,
) {
    info!(consumer, "🎧 Acquisition consumer started");
    let mut queue_failures: u32 = 0;

    // A poll already in flight runs out its window so nothing it pops is lost.
    while !shutdown.is_cancelled() {
        let message = match queue.next(poll_timeout).await {
            Ok(Some(message)) => {
                queue_failures = 0;
                message
            }
            Ok(None) => continue,
            Err(e) => {
                queue_failures = queue_failures.saturating_add(1);
                let delay = backoff(queue_failures);
                warn!(consumer, error = %e, retry_in_ms = delay.as_millis() as u64, "Queue unavailable");
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        handle_payload(consumer, &service, &message.payload, &abort).await;

        if let Err(e) = queue.settle(message).await {
            warn!(consumer, error = %e, "Failed to settle message");
        }
    }

    info!(consumer, "🛑 Acquisition consumer stopped");
}

async fn handle_payload(
    consumer: usize,
    service: &AcquisitionService,
    payload: &[u8],
    abort: &CancellationToken,
) {
    let job = match AcquisitionJob::decode(payload) {
        Ok(job) => job,
        Err(e) => {
            error!(consumer, error = %e, bytes = payload.len(), "❌ Rejecting malformed job");
            return;
        }
    };

    info!(consumer, job_id = %job.job_id, canonical_id = %job.canonical_id, priority = job.priority, "📦 Received acquisition job");

    match service.acquire(&job, abort).await {
        Ok(AcquisitionOutcome::Completed {
            r2_path,
            content_hash,
            artifacts,
        }) => {
            info!(
                consumer,
                job_id = %job.job_id,
                r2_path = %r2_path,
                sha256 = %content_hash,
                artifacts = artifacts.len(),
                "✅ Job completed"
            );
        }
        Ok(AcquisitionOutcome::AlreadyComplete { r2_path }) => {
            info!(consumer, job_id = %job.job_id, r2_path = ?r2_path, "Job skipped, item already published");
        }
        Ok(AcquisitionOutcome::Busy) => {
            info!(consumer, job_id = %job.job_id, "Job skipped, item in progress elsewhere");
        }
        // Already recorded in the ledger; the loop carries on.
        Err(e) => {
            error!(consumer, job_id = %job.job_id, error = %e, "❌ Job failed");
        }
    }
}

/// Exponential from `BACKOFF_BASE`, capped, plus up to 250ms of jitter.
fn backoff(failures: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << failures.saturating_sub(1).min(8));
    let jitter = Duration::from_millis(rand::rng().random_range(0..=250));
    exp.min(BACKOFF_CAP) + jitter
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::common::testing::{FakeTool, MemoryLedger, MemoryLocks, MemoryQueue};
    use crate::infrastructure::queue::QueueMessage;
    use crate::modules::acquisition::downloader::Downloader;
    use crate::modules::acquisition::model::AcquisitionStatus;
    use crate::modules::acquisition::publisher::Publisher;
    use crate::modules::acquisition::transformer::Transformer;

    const POLL: Duration = Duration::from_millis(20);

    fn service(ledger: Arc<MemoryLedger>, locks: MemoryLocks, scratch: &std::path::Path) -> Arc<AcquisitionService> {
        Arc::new(AcquisitionService::new(
            ledger,
            Arc::new(locks),
            Downloader::new(Duration::from_secs(5)).unwrap(),
            Transformer::new(Arc::new(FakeTool::default())),
            Publisher::new(None),
            Arc::new(Semaphore::new(1)),
            scratch.to_path_buf(),
        ))
    }

    fn payload(canonical_id: &str, source_url: &str) -> Vec<u8> {
        serde_json::json!({
            "canonical_id": canonical_id,
            "content_type": "movie",
            "source_url": source_url,
        })
        .to_string()
        .into_bytes()
    }

    async fn drain(queue: Arc<MemoryQueue>, service: Arc<AcquisitionService>, expected: usize) {
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn(run_consumer(
            0,
            queue.clone(),
            service,
            POLL,
            shutdown.clone(),
            CancellationToken::new(),
        ));

        tokio::time::timeout(Duration::from_secs(10), async {
            while queue.settled() < expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_messages_are_settled_without_locking() {
        let ledger = Arc::new(MemoryLedger::default());
        ledger.complete("imdb:tt1", "movie/imdb:tt1/original/manifest.m3u8");
        let locks = MemoryLocks::default();
        let scratch = tempfile::tempdir().unwrap();
        let queue = Arc::new(MemoryQueue::with_messages([
            b"{not json".to_vec(),
            br#"{"canonical_id":"a/b","content_type":"movie","source_url":"https://x.test/a.mp4"}"#.to_vec(),
            payload("imdb:tt1", "https://cdn.example.com/a.mp4"),
        ]));

        drain(queue.clone(), service(ledger.clone(), locks.clone(), scratch.path()), 3).await;

        assert_eq!(queue.settled(), 3);
        assert_eq!(queue.remaining(), 0);
        // The completed item exits before the lock, the bad payloads never get that far.
        assert_eq!(locks.attempts(), 0);
        assert!(ledger.get("a/b").is_none());
    }

    #[tokio::test]
    async fn failed_job_does_not_stop_the_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ledger = Arc::new(MemoryLedger::default());
        ledger.complete("imdb:tt2", "movie/imdb:tt2/original/manifest.m3u8");
        let locks = MemoryLocks::default();
        let scratch = tempfile::tempdir().unwrap();
        let queue = Arc::new(MemoryQueue::with_messages([
            payload("imdb:tt9", &format!("{}/gone.mp4", server.uri())),
            payload("imdb:tt2", "https://cdn.example.com/b.mp4"),
        ]));

        drain(queue.clone(), service(ledger.clone(), locks.clone(), scratch.path()), 2).await;

        let failed = ledger.get("imdb:tt9").unwrap();
        assert_eq!(failed.status, AcquisitionStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(locks.held(), 0);
        assert_eq!(queue.settled(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_consumer_after_its_poll_window() {
        let scratch = tempfile::tempdir().unwrap();
        let queue = Arc::new(MemoryQueue::default());
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn(run_consumer(
            0,
            queue,
            service(Arc::new(MemoryLedger::default()), MemoryLocks::default(), scratch.path()),
            Duration::from_millis(200),
            shutdown.clone(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .unwrap()
            .unwrap();
    }

    /// Hands out its single message only at the end of the wait window, the
    /// way a blocking pop does when a job arrives late.
    struct LateQueue {
        inner: MemoryQueue,
    }

    #[async_trait]
    impl JobQueue for LateQueue {
        async fn next(&self, wait: Duration) -> anyhow::Result<Option<QueueMessage>> {
            tokio::time::sleep(wait).await;
            self.inner.next(Duration::ZERO).await
        }

        async fn settle(&self, message: QueueMessage) -> anyhow::Result<()> {
            self.inner.settle(message).await
        }
    }

    #[tokio::test]
    async fn message_popped_during_shutdown_is_still_settled() {
        let scratch = tempfile::tempdir().unwrap();
        let queue = Arc::new(LateQueue {
            inner: MemoryQueue::with_messages([b"{not json".to_vec()]),
        });
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn(run_consumer(
            0,
            queue.clone(),
            service(Arc::new(MemoryLedger::default()), MemoryLocks::default(), scratch.path()),
            Duration::from_millis(200),
            shutdown.clone(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(queue.inner.settled(), 1);
        assert_eq!(queue.inner.remaining(), 0);
    }

    /// Fails a fixed number of polls before yielding its messages.
    struct FlakyQueue {
        inner: MemoryQueue,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl JobQueue for FlakyQueue {
        async fn next(&self, wait: Duration) -> anyhow::Result<Option<QueueMessage>> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("connection refused");
            }
            self.inner.next(wait).await
        }

        async fn settle(&self, message: QueueMessage) -> anyhow::Result<()> {
            self.inner.settle(message).await
        }
    }

    #[tokio::test]
    async fn queue_errors_back_off_and_recover() {
        let scratch = tempfile::tempdir().unwrap();
        let queue = Arc::new(FlakyQueue {
            inner: MemoryQueue::with_messages([b"{}".to_vec()]),
            failures_left: AtomicUsize::new(1),
        });
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn(run_consumer(
            0,
            queue.clone(),
            service(Arc::new(MemoryLedger::default()), MemoryLocks::default(), scratch.path()),
            POLL,
            shutdown.clone(),
            CancellationToken::new(),
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.inner.settled() < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        consumer.await.unwrap();
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        assert!(backoff(1) >= BACKOFF_BASE);
        assert!(backoff(1) <= BACKOFF_BASE + Duration::from_millis(250));
        assert!(backoff(3) >= Duration::from_secs(2));
        assert!(backoff(40) <= BACKOFF_CAP + Duration::from_millis(250));
    }
}
