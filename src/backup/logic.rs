use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use super::db_dump;
use super::job::{BackupArtifact, BackupJob};
use super::lock::DatabaseLock;
use super::retention::{self, PruneReport};
use super::verification::{self, VerifyOptions};
use crate::config::BackupConfig;
use crate::errors::{BackupError, ExecutionError, Result, VerificationError};

pub const REJECTED_SUFFIX: &str = ".rejected";

/// Everything a successful run produced.
#[derive(Debug)]
pub struct BackupSummary {
    pub job: BackupJob,
    pub artifact: BackupArtifact,
    /// `None` when no keep count was configured.
    pub prune: Option<PruneReport>,
}

/// Main backup flow for an already resolved configuration.
pub async fn perform_backup_orchestration(config: &BackupConfig) -> Result<BackupSummary> {
    info!(
        database = config.database(),
        output_dir = %config.output_dir.display(),
        "🚀 Starting database backup process"
    );

    fs::create_dir_all(&config.output_dir).await.map_err(|e| {
        ExecutionError::Io(format!(
            "failed to create output directory {}: {}",
            config.output_dir.display(),
            e
        ))
    })?;

    // Held until this function returns: dump, verification and retention
    // all run under it.
    let lock = DatabaseLock::acquire(&config.output_dir, config.database())?;

    let job = db_dump::execute(config, &lock).await;
    if let Some(e) = job.error() {
        return Err(BackupError::Execution(e.clone()));
    }

    let options = VerifyOptions {
        require_markers: config.verify_markers,
    };
    let artifact = match verification::verify(&job, options).await {
        Ok(artifact) => artifact,
        Err(e) => {
            quarantine(job.target_path(), &e).await;
            return Err(e.into());
        }
    };

    // Pruning failures are reported but never fail the job.
    let prune = config.keep.map(|keep| {
        retention::prune(&config.output_dir, config.database(), keep, Some(&artifact.path))
    });

    info!(path = %artifact.path.display(), "🎉 Backup completed successfully");
    Ok(BackupSummary {
        job,
        artifact,
        prune,
    })
}

/// Moves a file that failed verification out of the artifact namespace so
/// listing and retention never count it.
async fn quarantine(path: &Path, reason: &VerificationError) {
    if matches!(reason, VerificationError::Missing(_) | VerificationError::NotSucceeded) {
        return;
    }
    let mut rejected = path.as_os_str().to_os_string();
    rejected.push(REJECTED_SUFFIX);
    match fs::rename(path, &rejected).await {
        Ok(()) => warn!(
            rejected = %Path::new(&rejected).display(),
            "⚠️ Unverified dump moved aside"
        ),
        Err(e) => warn!(
            path = %path.display(),
            "⚠️ Failed to move unverified dump aside: {}",
            e
        ),
    }
}
