use async_trait::async_trait;
use sqlx::PgPool;

use super::model::{LedgerRecord, LedgerRow};
use crate::common::error::{AcquisitionError, AcquisitionResult};

/// Status record per canonical id. Written only by the lock holder; read by
/// the early-exit check and by the external delivery layer.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn find(&self, canonical_id: &str) -> AcquisitionResult<Option<LedgerRecord>>;

    /// Creates the record in `queued` if this is the first time the id is seen.
    async fn ensure_queued(&self, canonical_id: &str) -> AcquisitionResult<()>;

    async fn mark_downloading(&self, canonical_id: &str) -> AcquisitionResult<()>;

    async fn mark_transcoding(&self, canonical_id: &str, content_hash: &str)
    -> AcquisitionResult<()>;

    async fn mark_complete(&self, canonical_id: &str, r2_path: &str) -> AcquisitionResult<()>;

    /// Records a failure and bumps `retry_count`. Returns `false` without
    /// touching the row when it is already `complete`.
    async fn mark_failed(&self, canonical_id: &str, error_msg: &str) -> AcquisitionResult<bool>;
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn find(&self, canonical_id: &str) -> AcquisitionResult<Option<LedgerRecord>> {
        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT canonical_id, status, r2_path, error_msg, retry_count, content_hash,
                   started_at, completed_at, updated_at
            FROM acquisitions
            WHERE canonical_id = $1
            "#,
        )
        .bind(canonical_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LedgerRecord::try_from)
            .transpose()
            .map_err(AcquisitionError::Ledger)
    }

    async fn ensure_queued(&self, canonical_id: &str) -> AcquisitionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO acquisitions (canonical_id, status, updated_at)
            VALUES ($1, 'queued', NOW())
            ON CONFLICT (canonical_id) DO NOTHING
            "#,
        )
        .bind(canonical_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_downloading(&self, canonical_id: &str) -> AcquisitionResult<()> {
        sqlx::query(
            r#"
            UPDATE acquisitions
            SET status = 'downloading',
                error_msg = NULL,
                started_at = NOW(),
                completed_at = NULL,
                updated_at = NOW()
            WHERE canonical_id = $1 AND status <> 'complete'
            "#,
        )
        .bind(canonical_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_transcoding(
        &self,
        canonical_id: &str,
        content_hash: &str,
    ) -> AcquisitionResult<()> {
        sqlx::query(
            r#"
            UPDATE acquisitions
            SET status = 'transcoding', content_hash = $2, updated_at = NOW()
            WHERE canonical_id = $1 AND status <> 'complete'
            "#,
        )
        .bind(canonical_id)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_complete(&self, canonical_id: &str, r2_path: &str) -> AcquisitionResult<()> {
        sqlx::query(
            r#"
            UPDATE acquisitions
            SET status = 'complete',
                r2_path = $2,
                error_msg = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE canonical_id = $1
            "#,
        )
        .bind(canonical_id)
        .bind(r2_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, canonical_id: &str, error_msg: &str) -> AcquisitionResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO acquisitions (canonical_id, status, error_msg, retry_count, updated_at)
            VALUES ($1, 'failed', $2, 1, NOW())
            ON CONFLICT (canonical_id) DO UPDATE
            SET status = 'failed',
                error_msg = EXCLUDED.error_msg,
                retry_count = acquisitions.retry_count + 1,
                updated_at = NOW()
            WHERE acquisitions.status <> 'complete'
            "#,
        )
        .bind(canonical_id)
        .bind(error_msg)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
