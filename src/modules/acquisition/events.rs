use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Queue-carried acquisition request. Lives only in the message and in
/// worker memory; the ledger is the only persisted state.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcquisitionJob {
    #[serde(default = "new_job_id")]
    pub job_id: String,
    #[validate(custom(function = "validate_path_segment"))]
    pub canonical_id: String,
    #[validate(custom(function = "validate_path_segment"))]
    pub content_type: String,
    #[validate(custom(function = "validate_source_url"))]
    pub source_url: String,
    #[serde(default = "default_quality")]
    #[validate(custom(function = "validate_path_segment"))]
    pub target_quality: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Error)]
pub enum JobDecodeError {
    #[error("malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid job payload: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl AcquisitionJob {
    pub fn decode(payload: &[u8]) -> Result<Self, JobDecodeError> {
        let mut job: AcquisitionJob = serde_json::from_slice(payload)?;
        job.validate()?;
        // One spelling for strategy selection, object keys and the ledger path.
        job.content_type = job.content_type.to_ascii_lowercase();
        Ok(job)
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_quality() -> String {
    "original".to_string()
}

// Ids end up as object-store path segments.
fn validate_path_segment(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("empty"));
    }
    if trimmed != value || value.contains('/') || value == "." || value == ".." {
        return Err(ValidationError::new("not_a_path_segment"));
    }
    Ok(())
}

fn validate_source_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        Ok(_) => Err(ValidationError::new("unsupported_scheme")),
        Err(_) => Err(ValidationError::new("url")),
    }
}
