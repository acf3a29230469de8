//! Error taxonomy for the backup pipeline.
//!
//! Config, execution and verification errors abort a job and each maps to
//! its own process exit code. Prune errors are collected and logged but never
//! change a job's outcome.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting {0} is missing or empty")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("DATABASE_URL is not a usable MySQL URL: {0}")]
    InvalidUrl(String),

    #[error("settings file {path}: {reason}")]
    SettingsFile { path: PathBuf, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("dump process exited with status {code:?}: {detail}")]
    NonZeroExit { code: Option<i32>, detail: String },

    #[error("dump process did not finish within {0} seconds and was killed")]
    Timeout(u64),

    #[error("failed to start dump process: {0}")]
    ProcessSpawnFailure(String),

    #[error("database is not reachable: {0}")]
    Unreachable(String),

    #[error(
        "another backup of {database} holds {lock} ({}); remove it if that process is gone",
        describe_holder(.holder)
    )]
    Locked {
        database: String,
        lock: PathBuf,
        holder: Option<u32>,
    },

    #[error("interrupted, dump process killed and lock released")]
    Interrupted,

    #[error("I/O error while writing dump: {0}")]
    Io(String),
}

fn describe_holder(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!("pid {}", pid),
        None => "unknown owner".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("job did not succeed, nothing to verify")]
    NotSucceeded,

    #[error("artifact not found at {0}")]
    Missing(PathBuf),

    #[error("artifact at {0} is empty")]
    Empty(PathBuf),

    #[error("artifact is missing the {0} marker")]
    MissingMarker(&'static str),

    #[error("failed to read artifact: {0}")]
    Io(String),
}

#[derive(Error, Debug)]
pub enum PruneError {
    #[error("failed to list {dir}: {reason}")]
    ListFailed { dir: PathBuf, reason: String },

    #[error("failed to delete {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A fatal pipeline failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("backup failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),
}

impl BackupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            BackupError::Config(_) => 1,
            BackupError::Execution(_) => 2,
            BackupError::Verification(_) => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let config: BackupError = ConfigError::MissingField("DB_HOST").into();
        let execution: BackupError = ExecutionError::Timeout(5).into();
        let verification: BackupError = VerificationError::Empty(PathBuf::from("x.sql")).into();

        assert_eq!(config.exit_code(), 1);
        assert_eq!(execution.exit_code(), 2);
        assert_eq!(verification.exit_code(), 3);
    }

    #[test]
    fn test_missing_field_names_the_key() {
        let err = ConfigError::MissingField("DB_PASSWORD");
        assert!(err.to_string().contains("DB_PASSWORD"));
    }
}
