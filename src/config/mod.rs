// mysqlbackup/src/config/mod.rs
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;

pub const ENV_HOST: &str = "DB_HOST";
pub const ENV_PORT: &str = "DB_PORT";
pub const ENV_USER: &str = "DB_USER";
pub const ENV_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_DATABASE: &str = "DB_NAME";
pub const ENV_OUTPUT_DIR: &str = "BACKUP_DIR";
pub const ENV_TIMEOUT: &str = "BACKUP_TIMEOUT_SECS";
pub const ENV_KEEP: &str = "BACKUP_KEEP";
pub const ENV_DUMP_BIN: &str = "BACKUP_DUMP_BIN";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_DUMP_BINARY: &str = "mysqldump";
pub const DEFAULT_SETTINGS_FILE: &str = "backup.json";

/// Key-value lookup the resolver reads from. Nothing else in the crate
/// touches the process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Database password. Prints as `****` in every `Debug`/`Display` context.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Replaces every occurrence of the secret in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, "****")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

// Structs for deserializing the optional settings file. Secrets are not
// accepted here; they come from the environment only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub database: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub keep: Option<usize>,
    pub dump_binary: Option<String>,
    pub extra_args: Option<Vec<String>>,
    pub verify_markers: Option<bool>,
    password: Option<serde_json::Value>,
}

impl RawJsonConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self, ConfigError> {
        let settings_error = |reason: String| ConfigError::SettingsFile {
            path: config_path.to_path_buf(),
            reason,
        };

        let content = fs::read_to_string(config_path).map_err(|e| settings_error(e.to_string()))?;
        let raw: RawJsonConfig =
            serde_json::from_str(&content).map_err(|e| settings_error(e.to_string()))?;

        if raw.password.is_some() {
            return Err(settings_error(format!(
                "passwords are not read from settings files, set {} instead",
                ENV_PASSWORD
            )));
        }
        Ok(raw)
    }

    /// Loads `path` if given (it must exist), otherwise the default settings
    /// file if one is present in the working directory.
    pub fn load_optional(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_from_json(p),
            None => {
                let default_path = Path::new(DEFAULT_SETTINGS_FILE);
                if default_path.is_file() {
                    Self::load_from_json(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Values supplied on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub keep: Option<NonZeroUsize>,
    pub dump_binary: Option<String>,
    pub verify_markers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub database: String,
}

/// Where a database's artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub database: String,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub connection: ConnectionConfig,
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub keep: Option<NonZeroUsize>,
    pub dump_binary: String,
    pub extra_args: Vec<String>,
    pub verify_markers: bool,
}

impl BackupConfig {
    pub fn database(&self) -> &str {
        &self.connection.database
    }

    pub fn credential(&self) -> &Credential {
        &self.connection.credential
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct UrlParts {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

/// Resolves everything a `run` needs. Fails on the first absent required
/// field, checked in the order host, user, password, database, output dir.
pub fn resolve(
    env: &impl EnvSource,
    settings: &RawJsonConfig,
    overrides: &Overrides,
) -> Result<BackupConfig, ConfigError> {
    let connection = resolve_connection(env, settings, overrides.database.as_deref())?;
    let output_dir = resolve_output_dir(env, settings, overrides)?;

    let timeout_secs = match overrides.timeout_secs {
        Some(secs) => Some(secs),
        None => match lookup(env, ENV_TIMEOUT) {
            Some(raw) => Some(parse_number::<u64>(ENV_TIMEOUT, &raw)?),
            None => settings.timeout_secs,
        },
    };
    if timeout_secs == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: ENV_TIMEOUT,
            reason: "timeout must be at least one second".to_string(),
        });
    }

    let keep = match overrides.keep {
        Some(k) => Some(k),
        None => match lookup(env, ENV_KEEP) {
            Some(raw) => Some(parse_keep(&raw)?),
            None => settings.keep.map(|k| parse_keep(&k.to_string())).transpose()?,
        },
    };

    let dump_binary = overrides
        .dump_binary
        .clone()
        .or_else(|| lookup(env, ENV_DUMP_BIN))
        .or_else(|| non_empty(settings.dump_binary.clone()))
        .unwrap_or_else(|| DEFAULT_DUMP_BINARY.to_string());

    Ok(BackupConfig {
        connection,
        output_dir,
        timeout: timeout_secs.map(Duration::from_secs),
        keep,
        dump_binary,
        extra_args: settings.extra_args.clone().unwrap_or_default(),
        verify_markers: overrides.verify_markers || settings.verify_markers.unwrap_or(false),
    })
}

/// Resolves connection parameters only (used by `check`).
pub fn resolve_connection(
    env: &impl EnvSource,
    settings: &RawJsonConfig,
    database_override: Option<&str>,
) -> Result<ConnectionConfig, ConfigError> {
    let url_parts = match lookup(env, ENV_DATABASE_URL) {
        Some(raw) => parse_database_url(&raw)?,
        None => UrlParts::default(),
    };

    let host = lookup(env, ENV_HOST)
        .or(url_parts.host)
        .or_else(|| non_empty(settings.host.clone()))
        .ok_or(ConfigError::MissingField(ENV_HOST))?;

    let port = match lookup(env, ENV_PORT) {
        Some(raw) => parse_number::<u16>(ENV_PORT, &raw)?,
        None => url_parts.port.or(settings.port).unwrap_or(DEFAULT_PORT),
    };

    let user = lookup(env, ENV_USER)
        .or(url_parts.user)
        .or_else(|| non_empty(settings.user.clone()))
        .ok_or(ConfigError::MissingField(ENV_USER))?;

    // Passwords are taken verbatim, surrounding whitespace included.
    let password = env
        .get(ENV_PASSWORD)
        .filter(|p| !p.is_empty())
        .or(url_parts.password)
        .ok_or(ConfigError::MissingField(ENV_PASSWORD))?;

    let database = resolve_database(env, settings, database_override, url_parts.database)?;

    Ok(ConnectionConfig {
        host,
        port,
        user,
        credential: Credential::new(password),
        database,
    })
}

/// Resolves database name and output directory only (used by `list` and
/// `prune`, which never connect).
pub fn resolve_location(
    env: &impl EnvSource,
    settings: &RawJsonConfig,
    overrides: &Overrides,
) -> Result<ArtifactLocation, ConfigError> {
    let url_database = match lookup(env, ENV_DATABASE_URL) {
        Some(raw) => parse_database_url(&raw)?.database,
        None => None,
    };
    let database = resolve_database(env, settings, overrides.database.as_deref(), url_database)?;
    let output_dir = resolve_output_dir(env, settings, overrides)?;
    Ok(ArtifactLocation { database, output_dir })
}

fn resolve_database(
    env: &impl EnvSource,
    settings: &RawJsonConfig,
    database_override: Option<&str>,
    url_database: Option<String>,
) -> Result<String, ConfigError> {
    let database = non_empty(database_override.map(str::to_string))
        .or_else(|| lookup(env, ENV_DATABASE))
        .or(url_database)
        .or_else(|| non_empty(settings.database.clone()))
        .ok_or(ConfigError::MissingField(ENV_DATABASE))?;

    // A leading '-' would be read as a mysqldump option.
    if database.starts_with('-') {
        return Err(ConfigError::InvalidValue {
            field: ENV_DATABASE,
            reason: format!("'{}' must not start with '-'", database),
        });
    }
    // The name ends up in file names and a lock path.
    if database.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-' && c != '$') {
        return Err(ConfigError::InvalidValue {
            field: ENV_DATABASE,
            reason: format!("'{}' contains characters not allowed in a database name", database),
        });
    }
    Ok(database)
}

fn resolve_output_dir(
    env: &impl EnvSource,
    settings: &RawJsonConfig,
    overrides: &Overrides,
) -> Result<PathBuf, ConfigError> {
    overrides
        .output_dir
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| lookup(env, ENV_OUTPUT_DIR).map(PathBuf::from))
        .or_else(|| settings.output_dir.clone().filter(|p| !p.as_os_str().is_empty()))
        .ok_or(ConfigError::MissingField(ENV_OUTPUT_DIR))
}

fn parse_database_url(raw: &str) -> Result<UrlParts, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
    if url.scheme() != "mysql" && url.scheme() != "mariadb" {
        return Err(ConfigError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let decode = |s: &str| -> Result<Option<String>, ConfigError> {
        let decoded = percent_decode_str(s)
            .decode_utf8()
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
        Ok(non_empty(Some(decoded.into_owned())))
    };

    Ok(UrlParts {
        host: non_empty(url.host_str().map(str::to_string)),
        port: url.port(),
        user: decode(url.username())?,
        password: match url.password() {
            Some(p) => decode(p)?,
            None => None,
        },
        database: decode(url.path().trim_start_matches('/'))?,
    })
}

fn lookup(env: &impl EnvSource, key: &str) -> Option<String> {
    non_empty(env.get(key))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        field,
        reason: format!("'{}': {}", raw, e),
    })
}

fn parse_keep(raw: &str) -> Result<NonZeroUsize, ConfigError> {
    parse_number::<NonZeroUsize>(ENV_KEEP, raw).map_err(|_| ConfigError::InvalidValue {
        field: ENV_KEEP,
        reason: format!("'{}': keep count must be a positive integer", raw),
    })
}
