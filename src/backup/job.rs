//! Per-invocation job record and the artifact a successful job produces.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::ExecutionError;

/// Lifecycle of a backup job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(ExecutionError),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }
}

/// One backup attempt. State changes go through the transition methods;
/// once the job is terminal they are ignored.
#[derive(Debug, Clone)]
pub struct BackupJob {
    id: Uuid,
    database: String,
    started_at: DateTime<Utc>,
    target_path: PathBuf,
    status: JobStatus,
    exit_code: Option<i32>,
    bytes_written: u64,
}

impl BackupJob {
    pub fn new(database: &str, started_at: DateTime<Utc>, target_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            database: database.to_string(),
            started_at,
            target_path,
            status: JobStatus::Pending,
            exit_code: None,
            bytes_written: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Error detail of a failed job.
    pub fn error(&self) -> Option<&ExecutionError> {
        match &self.status {
            JobStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    pub(crate) fn start(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
        }
    }

    /// The target path may change before the dump starts, when the
    /// timestamped name is already taken.
    pub(crate) fn retarget(&mut self, target_path: PathBuf) {
        if self.status == JobStatus::Pending {
            self.target_path = target_path;
        }
    }

    pub(crate) fn succeed(&mut self, exit_code: i32, bytes_written: u64) {
        if self.status.is_terminal() {
            return;
        }
        self.exit_code = Some(exit_code);
        self.bytes_written = bytes_written;
        self.status = JobStatus::Succeeded;
    }

    pub(crate) fn fail(&mut self, error: ExecutionError) {
        if self.status.is_terminal() {
            return;
        }
        if let ExecutionError::NonZeroExit { code, .. } = &error {
            self.exit_code = *code;
        }
        self.status = JobStatus::Failed(error);
    }
}

/// A verified dump file. Only the verifier creates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub sha256: Option<String>,
}
