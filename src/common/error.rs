use std::fmt;

use thiserror::Error;

/// Longest `error_msg` written to the ledger.
pub const MAX_ERROR_MSG_LEN: usize = 4000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Ledger,
    Lock,
    Download,
    Hash,
    Transcode,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ledger => "ledger",
            Stage::Lock => "lock",
            Stage::Download => "download",
            Stage::Hash => "hash",
            Stage::Transcode => "transcode",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("scratch space error: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("download of {url} exceeded {secs}s")]
    DownloadTimeout { url: String, secs: u64 },

    #[error("source {url} answered HTTP {status}")]
    SourceStatus { url: String, status: u16 },

    #[error("hashing {path} failed: {source}")]
    Hash {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rendition {rendition} failed: {message}")]
    Transform {
        rendition: String,
        message: String,
        output_tail: Option<String>,
    },

    #[error("upload of {key} failed: {message}")]
    Publish { key: String, message: String },

    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },
}

impl AcquisitionError {
    pub fn stage(&self) -> Stage {
        match self {
            AcquisitionError::Ledger(_) => Stage::Ledger,
            AcquisitionError::Lock(_) => Stage::Lock,
            AcquisitionError::Scratch(_)
            | AcquisitionError::Download { .. }
            | AcquisitionError::DownloadTimeout { .. }
            | AcquisitionError::SourceStatus { .. } => Stage::Download,
            AcquisitionError::Hash { .. } => Stage::Hash,
            AcquisitionError::Transform { .. } => Stage::Transcode,
            AcquisitionError::Publish { .. } => Stage::Publish,
            AcquisitionError::Cancelled { stage } => *stage,
        }
    }

    pub fn transform(rendition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transform {
            rendition: rendition.into(),
            message: message.into(),
            output_tail: None,
        }
    }

    pub fn publish(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Text persisted as `error_msg`: stage prefix, the error, and for tool
    /// failures the captured output tail. Bounded to `MAX_ERROR_MSG_LEN`.
    pub fn ledger_message(&self) -> String {
        let mut msg = format!("{}: {}", self.stage(), self);
        if let AcquisitionError::Transform {
            output_tail: Some(tail),
            ..
        } = self
        {
            msg.push('\n');
            msg.push_str(tail);
        }
        truncate_chars(msg, MAX_ERROR_MSG_LEN)
    }
}

impl From<sqlx::Error> for AcquisitionError {
    fn from(err: sqlx::Error) -> Self {
        AcquisitionError::Ledger(err.to_string())
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}
