//! Maps a pipeline result to a process exit code and the single stdout line
//! scripts consume. Diagnostics go through the logger (stderr) only.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use std::borrow::Cow;
use std::io::{self, Write};
use tracing::{error, warn};
use uuid::Uuid;

use crate::backup::BackupSummary;
use crate::errors::BackupError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Artifact path only
    #[default]
    Text,
    /// One JSON object
    Json,
}

// Paths are written lossily: a non-UTF-8 path must not make the output
// unparseable.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    path: Cow<'a, str>,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    sha256: Option<&'a str>,
    job_id: Uuid,
    pruned: Vec<Cow<'a, str>>,
    prune_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: u8,
    /// Written to stdout on success.
    pub stdout: Option<String>,
}

impl ExitOutcome {
    pub fn emit(&self, out: &mut impl Write) -> io::Result<()> {
        if let Some(line) = &self.stdout {
            writeln!(out, "{}", line)?;
            out.flush()?;
        }
        Ok(())
    }
}

pub fn report(result: &Result<BackupSummary, BackupError>, format: OutputFormat) -> ExitOutcome {
    match result {
        Ok(summary) => {
            if let Some(prune) = &summary.prune {
                if !prune.failures.is_empty() {
                    warn!(
                        "⚠️ {} old backup(s) could not be removed; the backup itself succeeded",
                        prune.failures.len()
                    );
                }
            }
            match render_success(summary, format) {
                Ok(line) => ExitOutcome {
                    code: 0,
                    stdout: Some(line),
                },
                Err(e) => {
                    error!(
                        path = %summary.artifact.path.display(),
                        "❌ Backup verified but the result could not be rendered: {}",
                        e
                    );
                    ExitOutcome {
                        code: 2,
                        stdout: None,
                    }
                }
            }
        }
        Err(e) => {
            error!("❌ {}", e);
            ExitOutcome {
                code: e.exit_code(),
                stdout: None,
            }
        }
    }
}

fn render_success(
    summary: &BackupSummary,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    let artifact = &summary.artifact;
    match format {
        OutputFormat::Text => Ok(artifact.path.display().to_string()),
        OutputFormat::Json => {
            let (pruned, prune_failures) = match &summary.prune {
                Some(p) => (
                    p.removed.iter().map(|path| path.to_string_lossy()).collect(),
                    p.failures.len(),
                ),
                None => (Vec::new(), 0),
            };
            let report = RunReport {
                path: artifact.path.to_string_lossy(),
                size_bytes: artifact.size_bytes,
                created_at: artifact.created_at,
                sha256: artifact.sha256.as_deref(),
                job_id: summary.job.id(),
                pruned,
                prune_failures,
            };
            serde_json::to_string(&report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::job::{BackupArtifact, BackupJob};
    use crate::backup::retention::PruneReport;
    use crate::errors::{ConfigError, ExecutionError, VerificationError};
    use std::path::PathBuf;

    fn summary(prune: Option<PruneReport>) -> BackupSummary {
        summary_at(
            PathBuf::from("backups/mydatabase_backup_20261019T143005Z.sql"),
            prune,
        )
    }

    fn summary_at(path: PathBuf, prune: Option<PruneReport>) -> BackupSummary {
        let mut job = BackupJob::new("mydatabase", Utc::now(), path.clone());
        job.start();
        job.succeed(0, 120);
        BackupSummary {
            artifact: BackupArtifact {
                path,
                size_bytes: 120,
                created_at: job.started_at(),
                sha256: Some("ab".repeat(32)),
            },
            job,
            prune,
        }
    }

    #[test]
    fn test_success_prints_path_only() {
        let outcome = report(&Ok(summary(None)), OutputFormat::Text);
        assert_eq!(outcome.code, 0);

        let mut out = Vec::new();
        outcome.emit(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "backups/mydatabase_backup_20261019T143005Z.sql\n"
        );
    }

    #[test]
    fn test_success_json_is_one_parseable_line() {
        let prune = PruneReport {
            removed: vec![PathBuf::from("backups/mydatabase_backup_20200101T000000Z.sql")],
            failures: Vec::new(),
        };
        let outcome = report(&Ok(summary(Some(prune))), OutputFormat::Json);
        let line = outcome.stdout.unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["size_bytes"], 120);
        assert_eq!(value["pruned"].as_array().unwrap().len(), 1);
        assert_eq!(value["prune_failures"], 0);
        assert!(value["path"].as_str().unwrap().ends_with(".sql"));
    }

    #[test]
    fn test_failures_map_to_distinct_codes_and_print_nothing() {
        let cases: Vec<(BackupError, u8)> = vec![
            (ConfigError::MissingField("DB_HOST").into(), 1),
            (ExecutionError::Timeout(10).into(), 2),
            (VerificationError::Empty(PathBuf::from("x.sql")).into(), 3),
        ];
        for (err, code) in cases {
            let outcome = report(&Err(err), OutputFormat::Text);
            assert_eq!(outcome.code, code);
            assert_eq!(outcome.stdout, None);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_json_with_non_utf8_path_is_still_parseable() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = PathBuf::from(OsStr::from_bytes(b"/srv/\xffdumps"));
        let path = dir.join("mydatabase_backup_20261019T143005Z.sql");
        let prune = PruneReport {
            removed: vec![dir.join("mydatabase_backup_20200101T000000Z.sql")],
            failures: Vec::new(),
        };

        let outcome = report(&Ok(summary_at(path, Some(prune))), OutputFormat::Json);

        assert_eq!(outcome.code, 0);
        let line = outcome.stdout.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        let printed = value["path"].as_str().unwrap();
        assert!(printed.starts_with("/srv/"));
        assert!(printed.ends_with("dumps/mydatabase_backup_20261019T143005Z.sql"));
        assert_eq!(value["pruned"].as_array().unwrap().len(), 1);
    }
}
