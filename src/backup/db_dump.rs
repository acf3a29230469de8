// mysqlbackup/src/backup/db_dump.rs
use chrono::Utc;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::job::{BackupJob, JobStatus};
use super::lock::DatabaseLock;
use super::retention::{artifact_file_name, next_available_path, partial_path};
use crate::config::BackupConfig;
use crate::errors::ExecutionError;
use crate::utils::{find_dump_executable, truncate_detail};

/// stderr kept from the dump process; the rest is drained and discarded.
const MAX_STDERR_BYTES: usize = 64 * 1024;
/// Error detail stored on a failed job.
const MAX_DETAIL_BYTES: usize = 2 * 1024;

/// Runs one dump of `config`'s database into a new timestamped artifact.
///
/// The caller holds `lock` for the database and keeps holding it until the
/// artifact is verified and retention has run.
///
/// Never returns an error: every failure is recorded on the returned job.
/// The dump streams into `{target}.partial`, which is renamed to the target
/// only after the process exits 0, so a failed job never leaves a file that
/// looks like a valid artifact.
pub async fn execute(config: &BackupConfig, lock: &DatabaseLock) -> BackupJob {
    let database = config.database();
    let started_at = Utc::now();
    let mut job = BackupJob::new(
        database,
        started_at,
        config
            .output_dir
            .join(artifact_file_name(database, started_at, 0)),
    );

    job.retarget(next_available_path(&config.output_dir, database, started_at));
    job.start();
    info!(
        job_id = %job.id(),
        database,
        target = %job.target_path().display(),
        lock = %lock.path().display(),
        "🔍 Backing up database"
    );

    let target = job.target_path().to_path_buf();
    match run_dump(config, &target).await {
        Ok(bytes) => job.succeed(0, bytes),
        Err(e) => job.fail(e),
    }
    finish(job)
}

fn finish(job: BackupJob) -> BackupJob {
    match job.status() {
        JobStatus::Failed(e) => error!(
            job_id = %job.id(),
            exit_code = ?job.exit_code(),
            "❌ Dump for {} failed: {}",
            job.database(),
            e
        ),
        _ => info!(
            job_id = %job.id(),
            exit_code = ?job.exit_code(),
            bytes = job.bytes_written(),
            "✓ Dump for {} finished",
            job.database()
        ),
    }
    job
}

/// Command-line arguments for the dump binary. The password is never among
/// them; it travels in the child's `MYSQL_PWD`.
pub fn dump_args(config: &BackupConfig) -> Vec<String> {
    let connection = &config.connection;
    let mut args = vec![
        format!("--host={}", connection.host),
        format!("--port={}", connection.port),
        format!("--user={}", connection.user),
        "--single-transaction".to_string(),
        "--routines".to_string(),
        "--triggers".to_string(),
    ];
    args.extend(config.extra_args.iter().cloned());
    args.push(connection.database.clone());
    args
}

async fn run_dump(config: &BackupConfig, target: &Path) -> Result<u64, ExecutionError> {
    let credential = config.credential();
    let dump_path = find_dump_executable(&config.dump_binary).map_err(|e| {
        ExecutionError::ProcessSpawnFailure(format!(
            "{} not found: {}. Install the MySQL client tools and add them to PATH.",
            config.dump_binary, e
        ))
    })?;

    let partial = partial_path(target);
    let file = File::create(&partial).await.map_err(|e| {
        ExecutionError::Io(format!("failed to create {}: {}", partial.display(), e))
    })?;

    let mut child = match Command::new(&dump_path)
        .args(dump_args(config))
        .env("MYSQL_PWD", credential.expose())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let _ = fs::remove_file(&partial).await;
            return Err(ExecutionError::ProcessSpawnFailure(format!(
                "{}: {}",
                dump_path.display(),
                e
            )));
        }
    };

    let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => (out, err),
        _ => {
            let _ = fs::remove_file(&partial).await;
            return Err(ExecutionError::ProcessSpawnFailure(
                "dump process has no output pipes".to_string(),
            ));
        }
    };
    let mut writer = BufWriter::new(file);

    let streaming = async {
        let copy = async {
            let bytes = tokio::io::copy(&mut stdout, &mut writer).await?;
            writer.flush().await?;
            Ok::<u64, io::Error>(bytes)
        };
        let (bytes, stderr_text) =
            tokio::try_join!(copy, read_bounded(&mut stderr, MAX_STDERR_BYTES))?;
        let status = child.wait().await?;
        Ok::<_, io::Error>((bytes, stderr_text, status))
    };

    let outcome = match config.timeout {
        Some(limit) => timeout(limit, streaming).await,
        None => Ok(streaming.await),
    };

    let (bytes, stderr_text, status) = match outcome {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            let _ = child.kill().await;
            let _ = fs::remove_file(&partial).await;
            return Err(ExecutionError::Io(credential.redact(&e.to_string())));
        }
        Err(_) => {
            let _ = child.kill().await;
            let limit = config.timeout.map(|t| t.as_secs()).unwrap_or_default();
            warn!(
                partial = %partial.display(),
                "⚠️ Dump exceeded {}s and was killed; partial output left for inspection",
                limit
            );
            return Err(ExecutionError::Timeout(limit));
        }
    };

    let stderr_text = credential.redact(&stderr_text);

    if !status.success() {
        let _ = fs::remove_file(&partial).await;
        return Err(ExecutionError::NonZeroExit {
            code: status.code(),
            detail: truncate_detail(&stderr_text, MAX_DETAIL_BYTES),
        });
    }

    if !stderr_text.trim().is_empty() {
        warn!("Dump process reported: {}", truncate_detail(&stderr_text, MAX_DETAIL_BYTES));
    }

    fs::rename(&partial, target).await.map_err(|e| {
        ExecutionError::Io(format!(
            "failed to move {} to {}: {}",
            partial.display(),
            target.display(),
            e
        ))
    })?;

    Ok(bytes)
}

/// Reads `reader` to the end, keeping at most `limit` bytes.
async fn read_bounded<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> io::Result<String> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if kept.len() < limit {
            let take = (limit - kept.len()).min(n);
            kept.extend_from_slice(&buf[..take]);
        }
    }
    Ok(String::from_utf8_lossy(&kept).into_owned())
}
