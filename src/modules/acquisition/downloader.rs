use std::io;
use std::path::Path;
use std::time::Duration;

use futures_util::TryStreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::error::{AcquisitionError, AcquisitionResult, Stage};

/// Streams a source URL into scratch storage. No retries; a failed attempt
/// leaves nothing behind.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout: Duration,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Returns the number of bytes written to `dest`.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> AcquisitionResult<u64> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquisitionError::Cancelled { stage: Stage::Download }),
            res = self.stream_to_file(url, dest) => res,
        };

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(dest).await {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %dest.display(), error = %e, "could not remove partial download");
                }
            }
        }
        result
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> AcquisitionResult<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquisitionError::SourceStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes_stream().map_err(io::Error::other);
        let mut reader = StreamReader::new(body);
        let mut file = File::create(dest).await.map_err(AcquisitionError::Scratch)?;

        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| match reqwest_cause(&e) {
                Some(inner) => self.request_error(url, inner),
                None => AcquisitionError::Download {
                    url: url.to_string(),
                    message: e.to_string(),
                },
            })?;
        file.flush().await.map_err(AcquisitionError::Scratch)?;

        info!(url, bytes = written, "⬇️ Downloaded source");
        Ok(written)
    }

    fn request_error(&self, url: &str, err: &reqwest::Error) -> AcquisitionError {
        if err.is_timeout() {
            AcquisitionError::DownloadTimeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            AcquisitionError::Download {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

fn reqwest_cause(err: &io::Error) -> Option<&reqwest::Error> {
    err.get_ref()?.downcast_ref::<reqwest::Error>()
}

/// Extension of the last path segment of `url`, used to name direct copies.
pub fn source_extension(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            let name = u.path_segments()?.last()?.to_string();
            let (_, ext) = name.rsplit_once('.')?;
            let valid = !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric());
            valid.then(|| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| "bin".to_string())
}
