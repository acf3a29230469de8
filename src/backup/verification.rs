// mysqlbackup/src/backup/verification.rs
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};

use super::job::{BackupArtifact, BackupJob};
use crate::errors::VerificationError;

const HEADER_MARKERS: [&str; 2] = ["-- MySQL dump", "-- MariaDB dump"];
const TRAILER_MARKER: &str = "-- Dump completed";
const MARKER_WINDOW: u64 = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Require mysqldump's header comment and completion trailer.
    pub require_markers: bool,
}

/// Turns a succeeded job into a trusted artifact.
///
/// The dump tool can exit 0 and still leave an empty file (some
/// credential/permission setups do this), so the exit status alone is not
/// enough. Checks, in order: job succeeded, file exists, file is non-empty,
/// and optionally the header/trailer markers. Then hashes the file.
pub async fn verify(
    job: &BackupJob,
    options: VerifyOptions,
) -> Result<BackupArtifact, VerificationError> {
    if !job.is_succeeded() {
        return Err(VerificationError::NotSucceeded);
    }

    let path = job.target_path();
    let metadata = match fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Err(VerificationError::Missing(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(VerificationError::Missing(path.to_path_buf()));
        }
        Err(e) => return Err(VerificationError::Io(e.to_string())),
    };

    if metadata.len() == 0 {
        warn!(path = %path.display(), "⚠️ Dump exited 0 but wrote nothing");
        return Err(VerificationError::Empty(path.to_path_buf()));
    }

    if options.require_markers {
        check_markers(path, metadata.len()).await?;
    }

    let sha256 = sha256_file(path).await?;

    info!(
        path = %path.display(),
        size_bytes = metadata.len(),
        sha256 = %sha256,
        "✅ Backup verified"
    );

    Ok(BackupArtifact {
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        created_at: job.started_at(),
        sha256: Some(sha256),
    })
}

async fn check_markers(path: &Path, len: u64) -> Result<(), VerificationError> {
    let io_err = |e: std::io::Error| VerificationError::Io(e.to_string());
    let mut file = File::open(path).await.map_err(io_err)?;

    let mut head = vec![0u8; MARKER_WINDOW.min(len) as usize];
    file.read_exact(&mut head).await.map_err(io_err)?;
    let head = String::from_utf8_lossy(&head);
    if !HEADER_MARKERS.iter().any(|m| head.contains(m)) {
        return Err(VerificationError::MissingMarker("dump header"));
    }

    let tail_len = MARKER_WINDOW.min(len);
    file.seek(SeekFrom::Start(len - tail_len)).await.map_err(io_err)?;
    let mut tail = vec![0u8; tail_len as usize];
    file.read_exact(&mut tail).await.map_err(io_err)?;
    if !String::from_utf8_lossy(&tail).contains(TRAILER_MARKER) {
        return Err(VerificationError::MissingMarker("dump completed trailer"));
    }
    Ok(())
}

/// Hex SHA-256 of a file, read in chunks.
pub async fn sha256_file(path: &Path) -> Result<String, VerificationError> {
    let io_err = |e: std::io::Error| VerificationError::Io(e.to_string());
    let mut file = File::open(path).await.map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await.map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
