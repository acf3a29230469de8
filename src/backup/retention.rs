//! Artifact naming, listing and retention.
//!
//! Artifacts are named `{db}_backup_{YYYYMMDDTHHMMSSZ}.sql`. When a name is
//! already taken within the same second a `_{n}` suffix is added, so the
//! sort key is (timestamp, suffix).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::PruneError;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
pub const PARTIAL_SUFFIX: &str = ".partial";

pub fn artifact_file_name(database: &str, timestamp: DateTime<Utc>, sequence: u32) -> String {
    let stamp = timestamp.format(TIMESTAMP_FORMAT);
    if sequence == 0 {
        format!("{}_backup_{}.sql", database, stamp)
    } else {
        format!("{}_backup_{}_{}.sql", database, stamp, sequence)
    }
}

/// In-progress file a dump streams into before it is renamed to `target`.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// First free artifact path for `timestamp`. A name counts as taken when
/// either the artifact or its partial file exists.
pub fn next_available_path(dir: &Path, database: &str, timestamp: DateTime<Utc>) -> PathBuf {
    let mut sequence = 0;
    loop {
        let candidate = dir.join(artifact_file_name(database, timestamp, sequence));
        if !candidate.exists() && !partial_path(&candidate).exists() {
            return candidate;
        }
        sequence += 1;
    }
}

/// An artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub sequence: u32,
}

/// Matches artifact file names of exactly one database.
pub struct ArtifactPattern {
    regex: Regex,
}

impl ArtifactPattern {
    pub fn for_database(database: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!(
            r"^{}_backup_(\d{{8}}T\d{{6}}Z)(?:_(\d+))?\.sql$",
            regex::escape(database)
        ))?;
        Ok(Self { regex })
    }

    /// Returns (timestamp, sequence) for a matching file name.
    pub fn parse(&self, file_name: &str) -> Option<(DateTime<Utc>, u32)> {
        let caps = self.regex.captures(file_name)?;
        let naive = NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), TIMESTAMP_FORMAT).ok()?;
        let sequence = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some((Utc.from_utc_datetime(&naive), sequence))
    }
}

/// Lists `database`'s artifacts in `dir`, newest first. A missing directory
/// has no artifacts.
pub fn list_artifacts(dir: &Path, database: &str) -> Result<Vec<ArtifactEntry>, PruneError> {
    let list_error = |reason: String| PruneError::ListFailed {
        dir: dir.to_path_buf(),
        reason,
    };

    if !dir.exists() {
        return Ok(Vec::new());
    }

    let pattern = ArtifactPattern::for_database(database).map_err(|e| list_error(e.to_string()))?;
    let mut entries = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| list_error(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some((timestamp, sequence)) = pattern.parse(file_name) {
            entries.push(ArtifactEntry {
                path: entry.path().to_path_buf(),
                timestamp,
                sequence,
            });
        }
    }

    entries.sort_by(|a, b| (b.timestamp, b.sequence).cmp(&(a.timestamp, a.sequence)));
    Ok(entries)
}

/// What a prune pass did. Failures are per file and never abort the pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<PruneError>,
}

/// Keeps the newest `keep` artifacts of `database` and deletes the rest,
/// never touching `protect`. Removed paths are returned newest first.
pub fn prune(
    dir: &Path,
    database: &str,
    keep: NonZeroUsize,
    protect: Option<&Path>,
) -> PruneReport {
    let mut report = PruneReport::default();

    let entries = match list_artifacts(dir, database) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("⚠️ Retention skipped: {}", e);
            report.failures.push(e);
            return report;
        }
    };

    let protected_name = protect.and_then(Path::file_name);

    for entry in entries.iter().skip(keep.get()) {
        if protected_name.is_some() && entry.path.file_name() == protected_name {
            continue;
        }
        match std::fs::remove_file(&entry.path) {
            Ok(()) => {
                info!(path = %entry.path.display(), "🗑 Removed old backup");
                report.removed.push(entry.path.clone());
            }
            Err(source) => {
                let failure = PruneError::DeleteFailed {
                    path: entry.path.clone(),
                    source,
                };
                warn!("⚠️ {}", failure);
                report.failures.push(failure);
            }
        }
    }

    info!(
        database,
        kept = entries.len() - report.removed.len(),
        removed = report.removed.len(),
        "Retention pass finished"
    );
    report
}
