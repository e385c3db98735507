use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, warn};

use crate::common::error::{AcquisitionError, AcquisitionResult};

const LOCK_NAMESPACE: &str = "acquisition:";

/// Advisory lock key for a canonical id: the first eight bytes of a SHA-256
/// digest, read as a big-endian `i64` (the width Postgres advisory locks take).
pub fn lock_key(canonical_id: &str) -> i64 {
    let digest = Sha256::new()
        .chain_update(LOCK_NAMESPACE.as_bytes())
        .chain_update(canonical_id.as_bytes())
        .finalize();
    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(key)
}

/// Non-blocking per-item mutual exclusion across every worker process.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// `Ok(None)` means someone else holds the lock. That is not an error.
    async fn try_acquire(&self, canonical_id: &str)
    -> AcquisitionResult<Option<Box<dyn LockLease>>>;
}

#[async_trait]
pub trait LockLease: Send {
    async fn release(self: Box<Self>);
}

#[derive(Clone)]
pub struct PgAdvisoryLocks {
    pool: PgPool,
}

impl PgAdvisoryLocks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockManager for PgAdvisoryLocks {
    async fn try_acquire(
        &self,
        canonical_id: &str,
    ) -> AcquisitionResult<Option<Box<dyn LockLease>>> {
        let key = lock_key(canonical_id);
        // Session-level locks belong to the connection, so the lease keeps it.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AcquisitionError::Lock(e.to_string()))?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| AcquisitionError::Lock(e.to_string()))?;

        if !acquired {
            debug!(canonical_id, key, "advisory lock held elsewhere");
            return Ok(None);
        }

        Ok(Some(Box::new(PgLease {
            key,
            conn: Some(conn),
        })))
    }
}

struct PgLease {
    key: i64,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl LockLease for PgLease {
    async fn release(mut self: Box<Self>) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok(true) => {}
            Ok(false) => {
                warn!(key = self.key, "advisory lock was not held at release");
            }
            Err(e) => {
                warn!(key = self.key, error = %e, "advisory unlock failed, closing connection");
                drop(conn.detach());
            }
        }
    }
}

impl Drop for PgLease {
    fn drop(&mut self) {
        // Never released: closing the session makes the server drop the lock.
        if let Some(conn) = self.conn.take() {
            warn!(key = self.key, "lock lease dropped without release");
            drop(conn.detach());
        }
    }
}
