use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::common::error::{AcquisitionError, AcquisitionResult};

const CHUNK_SIZE: usize = 64 * 1024;

/// Hex SHA-256 of a file, read in fixed-size chunks. Audit only; nothing
/// compares it against an expected value.
pub async fn sha256_file(path: &Path) -> AcquisitionResult<String> {
    let io_err = |source: std::io::Error| AcquisitionError::Hash {
        path: path.display().to_string(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await.map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
