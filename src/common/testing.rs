//! In-memory stand-ins for the ledger, lock manager, media tool, object
//! store and queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::common::error::{AcquisitionError, AcquisitionResult, Stage};
use crate::infrastructure::queue::{JobQueue, QueueMessage};
use crate::modules::acquisition::lock::{LockLease, LockManager, lock_key};
use crate::modules::acquisition::model::{AcquisitionStatus, LedgerRecord};
use crate::modules::acquisition::publisher::ObjectStore;
use crate::modules::acquisition::repository::Ledger;
use crate::modules::acquisition::transformer::MediaTool;

#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<String, LedgerRecord>>,
    transitions: Mutex<Vec<(String, AcquisitionStatus)>>,
}

impl MemoryLedger {
    pub fn get(&self, canonical_id: &str) -> Option<LedgerRecord> {
        self.rows.lock().unwrap().get(canonical_id).cloned()
    }

    pub fn insert(&self, record: LedgerRecord) {
        self.rows
            .lock()
            .unwrap()
            .insert(record.canonical_id.clone(), record);
    }

    pub fn complete(&self, canonical_id: &str, r2_path: &str) {
        let mut record = LedgerRecord::new(canonical_id);
        record.status = AcquisitionStatus::Complete;
        record.r2_path = Some(r2_path.to_string());
        self.insert(record);
    }

    /// Every applied status change, in order.
    pub fn transitions(&self, canonical_id: &str) -> Vec<AcquisitionStatus> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == canonical_id)
            .map(|(_, status)| *status)
            .collect()
    }

    fn update<F>(&self, canonical_id: &str, status: AcquisitionStatus, apply: F) -> bool
    where
        F: FnOnce(&mut LedgerRecord),
    {
        let mut rows = self.rows.lock().unwrap();
        let Some(record) = rows.get_mut(canonical_id) else {
            return false;
        };
        if record.is_complete() && status != AcquisitionStatus::Complete {
            return false;
        }
        record.status = status;
        record.updated_at = OffsetDateTime::now_utc();
        apply(record);
        self.transitions
            .lock()
            .unwrap()
            .push((canonical_id.to_string(), status));
        true
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn find(&self, canonical_id: &str) -> AcquisitionResult<Option<LedgerRecord>> {
        Ok(self.get(canonical_id))
    }

    async fn ensure_queued(&self, canonical_id: &str) -> AcquisitionResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(canonical_id) {
            rows.insert(canonical_id.to_string(), LedgerRecord::new(canonical_id));
            self.transitions
                .lock()
                .unwrap()
                .push((canonical_id.to_string(), AcquisitionStatus::Queued));
        }
        Ok(())
    }

    async fn mark_downloading(&self, canonical_id: &str) -> AcquisitionResult<()> {
        self.update(canonical_id, AcquisitionStatus::Downloading, |r| {
            r.error_msg = None;
            r.started_at = Some(OffsetDateTime::now_utc());
            r.completed_at = None;
        });
        Ok(())
    }

    async fn mark_transcoding(
        &self,
        canonical_id: &str,
        content_hash: &str,
    ) -> AcquisitionResult<()> {
        self.update(canonical_id, AcquisitionStatus::Transcoding, |r| {
            r.content_hash = Some(content_hash.to_string());
        });
        Ok(())
    }

    async fn mark_complete(&self, canonical_id: &str, r2_path: &str) -> AcquisitionResult<()> {
        self.update(canonical_id, AcquisitionStatus::Complete, |r| {
            r.r2_path = Some(r2_path.to_string());
            r.error_msg = None;
            r.completed_at = Some(OffsetDateTime::now_utc());
        });
        Ok(())
    }

    async fn mark_failed(&self, canonical_id: &str, error_msg: &str) -> AcquisitionResult<bool> {
        self.rows
            .lock()
            .unwrap()
            .entry(canonical_id.to_string())
            .or_insert_with(|| LedgerRecord::new(canonical_id));
        Ok(self.update(canonical_id, AcquisitionStatus::Failed, |r| {
            r.error_msg = Some(error_msg.to_string());
            r.retry_count += 1;
        }))
    }
}

#[derive(Default, Clone)]
pub struct MemoryLocks {
    held: Arc<Mutex<HashSet<i64>>>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryLocks {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

#[async_trait]
impl LockManager for MemoryLocks {
    async fn try_acquire(
        &self,
        canonical_id: &str,
    ) -> AcquisitionResult<Option<Box<dyn LockLease>>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let key = lock_key(canonical_id);
        if !self.held.lock().unwrap().insert(key) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLease {
            key,
            held: self.held.clone(),
        })))
    }
}

struct MemoryLease {
    key: i64,
    held: Arc<Mutex<HashSet<i64>>>,
}

#[async_trait]
impl LockLease for MemoryLease {
    async fn release(self: Box<Self>) {}
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.held.lock().unwrap().remove(&self.key);
    }
}

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// Writes the output file named by its last argument instead of encoding.
#[derive(Default)]
pub struct FakeTool {
    invocations: Mutex<Vec<Vec<String>>>,
    fail_on: Option<usize>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    on_invoke: Option<Hook>,
}

impl FakeTool {
    /// Fails the `n`th invocation (1-based).
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on: Some(n),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Runs `hook` with the 1-based invocation number before doing any work.
    pub fn on_invoke(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_invoke = Some(Box::new(hook));
        self
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTool for FakeTool {
    async fn run(
        &self,
        rendition: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> AcquisitionResult<()> {
        let n = {
            let mut calls = self.invocations.lock().unwrap();
            calls.push(args.to_vec());
            calls.len()
        };
        if let Some(hook) = &self.on_invoke {
            hook(n);
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        if !waited {
            return Err(AcquisitionError::Cancelled {
                stage: Stage::Transcode,
            });
        }
        if self.fail_on == Some(n) {
            return Err(AcquisitionError::Transform {
                rendition: rendition.to_string(),
                message: "fake tool exited with status 1".to_string(),
                output_tail: Some("Conversion failed!".to_string()),
            });
        }
        if let Some(output) = args.last() {
            std::fs::write(output, rendition.as_bytes()).map_err(AcquisitionError::Scratch)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Vec<(String, String, usize)>>,
    reject_suffix: Option<String>,
}

impl MemoryStore {
    pub fn rejecting(suffix: &str) -> Self {
        Self {
            reject_suffix: Some(suffix.to_string()),
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _, _)| key.clone())
            .collect()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _, _)| k == key)
            .map(|(_, content_type, _)| content_type.clone())
    }

    fn record(&self, key: &str, content_type: &str, len: usize) -> AcquisitionResult<()> {
        if let Some(suffix) = &self.reject_suffix {
            if key.ends_with(suffix.as_str()) {
                return Err(AcquisitionError::publish(key, "HTTP 403 AccessDenied"));
            }
        }
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), len));
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> AcquisitionResult<()> {
        let len = std::fs::metadata(path)
            .map_err(|e| AcquisitionError::publish(key, e.to_string()))?
            .len() as usize;
        self.record(key, content_type, len)
    }

    async fn put_bytes(&self, key: &str, body: Bytes, content_type: &str) -> AcquisitionResult<()> {
        self.record(key, content_type, body.len())
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<Vec<u8>>>,
    settled: AtomicUsize,
}

impl MemoryQueue {
    pub fn with_messages<I, T>(messages: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self {
            pending: Mutex::new(messages.into_iter().map(Into::into).collect()),
            settled: AtomicUsize::new(0),
        }
    }

    pub fn settled(&self) -> usize {
        self.settled.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn next(&self, wait: Duration) -> anyhow::Result<Option<QueueMessage>> {
        let popped = self.pending.lock().unwrap().pop_front();
        match popped {
            Some(payload) => Ok(Some(QueueMessage::new(payload))),
            None => {
                tokio::time::sleep(wait).await;
                Ok(None)
            }
        }
    }

    async fn settle(&self, _message: QueueMessage) -> anyhow::Result<()> {
        self.settled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
