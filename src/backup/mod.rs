mod logic;
pub(crate) mod db_dump;
pub(crate) mod job;
pub(crate) mod lock;
pub(crate) mod retention;
pub(crate) mod verification;

use crate::config::{self, EnvSource, Overrides, RawJsonConfig};
use crate::errors::Result;

pub use logic::BackupSummary;

/// Public entry point for the backup process: resolve, dump, verify, prune.
/// A configuration error returns before any process is started.
pub async fn run_backup_flow(
    env: &impl EnvSource,
    settings: &RawJsonConfig,
    overrides: &Overrides,
) -> Result<BackupSummary> {
    let backup_config = config::resolve(env, settings, overrides)?;
    logic::perform_backup_orchestration(&backup_config).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::db_dump::tests::fake_dump;
    use crate::config::{
        ENV_DATABASE, ENV_DUMP_BIN, ENV_HOST, ENV_OUTPUT_DIR, ENV_PASSWORD, ENV_USER,
    };
    use crate::errors::{BackupError, ConfigError};
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_setting_fails_before_dump_starts() {
        let scratch = tempdir().unwrap();
        let marker = scratch.path().join("spawned");
        let bin = fake_dump(scratch.path(), &format!("touch {}", marker.display()));
        let out = scratch.path().join("backups");

        let env: HashMap<String, String> = [
            (ENV_HOST, "127.0.0.1".to_string()),
            (ENV_USER, "root".to_string()),
            (ENV_DATABASE, "mydatabase".to_string()),
            (ENV_OUTPUT_DIR, out.display().to_string()),
            (ENV_DUMP_BIN, bin.display().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let err = run_backup_flow(&env, &RawJsonConfig::default(), &Overrides::default())
            .await
            .unwrap_err();

        assert_eq!(err, BackupError::Config(ConfigError::MissingField(ENV_PASSWORD)));
        assert_eq!(err.exit_code(), 1);
        assert!(!marker.exists());
        assert!(!out.exists());
    }
}
