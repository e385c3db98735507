use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionStatus {
    Queued,
    Downloading,
    Transcoding,
    Complete,
    Failed,
}

impl AcquisitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionStatus::Queued => "queued",
            AcquisitionStatus::Downloading => "downloading",
            AcquisitionStatus::Transcoding => "transcoding",
            AcquisitionStatus::Complete => "complete",
            AcquisitionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(AcquisitionStatus::Queued),
            "downloading" => Ok(AcquisitionStatus::Downloading),
            "transcoding" => Ok(AcquisitionStatus::Transcoding),
            "complete" => Ok(AcquisitionStatus::Complete),
            "failed" => Ok(AcquisitionStatus::Failed),
            other => Err(format!("unknown acquisition status {other:?}")),
        }
    }
}

/// Raw row; status is stored as text.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    pub canonical_id: String,
    pub status: String,
    pub r2_path: Option<String>,
    pub error_msg: Option<String>,
    pub retry_count: i32,
    pub content_hash: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerRecord {
    pub canonical_id: String,
    pub status: AcquisitionStatus,
    pub r2_path: Option<String>,
    pub error_msg: Option<String>,
    pub retry_count: i32,
    pub content_hash: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

impl LedgerRecord {
    pub fn new(canonical_id: &str) -> Self {
        Self {
            canonical_id: canonical_id.to_string(),
            status: AcquisitionStatus::Queued,
            r2_path: None,
            error_msg: None,
            retry_count: 0,
            content_hash: None,
            started_at: None,
            completed_at: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == AcquisitionStatus::Complete
    }
}

impl TryFrom<LedgerRow> for LedgerRecord {
    type Error = String;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            canonical_id: row.canonical_id,
            r2_path: row.r2_path,
            error_msg: row.error_msg,
            retry_count: row.retry_count,
            content_hash: row.content_hash,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

/// One file produced by the transform stage, waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: std::path::PathBuf,
    pub file_name: String,
    /// Playlist label, e.g. `1080p` or `lossless`.
    pub label: String,
}

/// Result of one call into the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    /// The ledger already holds a published copy; nothing was done.
    AlreadyComplete { r2_path: Option<String> },
    /// Another worker holds the per-item lock; nothing was done.
    Busy,
    Completed {
        r2_path: String,
        content_hash: String,
        artifacts: Vec<String>,
    },
}
