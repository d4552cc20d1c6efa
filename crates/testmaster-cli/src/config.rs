//! Configuration file management for testmaster.
//!
//! Provides a TOML-based config file at `~/.config/testmaster/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use testmaster_core::ai::executor::DEFAULT_TIMEOUT;
use testmaster_core::permission::FallbackPolicy;
use testmaster_db::config::{DbConfig, parse_max_connections};

pub const TIMEOUT_ENV: &str = "TESTMASTER_AI_TIMEOUT_SECS";
pub const USER_ENV: &str = "TESTMASTER_USER_ID";

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub user: UserSection,
    pub ai: AiSection,
    pub permissions: PermissionsSection,
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_string(),
            max_connections: DbConfig::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// The identity CLI commands act as. Authentication is handled elsewhere.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSection {
    pub timeout_secs: u64,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    /// Deny everything instead of granting tester defaults when the
    /// permission lookup fails.
    pub fail_closed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the testmaster config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/testmaster` or
/// `~/.config/testmaster`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("testmaster");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("testmaster")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
/// The file is owner read/write only on Unix.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub database_url: Option<String>,
    pub user_id: Option<Uuid>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct TestmasterConfig {
    pub db_config: DbConfig,
    pub user_id: Option<Uuid>,
    pub ai_timeout: Duration,
    pub fallback: FallbackPolicy,
    pub bind: String,
    pub port: u16,
    /// Where the AI registry and credentials live.
    pub dir: PathBuf,
}

impl TestmasterConfig {
    /// Resolve from the real environment and the config file, if any.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file = match config_path() {
            path if path.exists() => Some(load_config_from(&path)?),
            _ => None,
        };
        Self::from_sources(cli, file, config_dir(), |key| std::env::var(key).ok())
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `--database-url` > `TESTMASTER_DATABASE_URL` > `[database].url` > `DbConfig::DEFAULT_URL`
    /// - User: `--user` > `TESTMASTER_USER_ID` > `[user].id` > none
    /// - Pool size: `TESTMASTER_DB_MAX_CONNECTIONS` > `[database].max_connections` > 10
    /// - AI timeout: `TESTMASTER_AI_TIMEOUT_SECS` > `[ai].timeout_secs` > 60
    pub fn from_sources(
        cli: &CliOverrides,
        file: Option<ConfigFile>,
        dir: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = file.unwrap_or_default();

        let db_url = cli
            .database_url
            .clone()
            .or_else(|| env(DbConfig::ENV_VAR))
            .unwrap_or(file.database.url);

        let max_connections = match env(DbConfig::MAX_CONNECTIONS_ENV_VAR) {
            Some(raw) => parse_max_connections(&raw).with_context(|| {
                format!(
                    "{} must be a positive number: {raw:?}",
                    DbConfig::MAX_CONNECTIONS_ENV_VAR
                )
            })?,
            None => file.database.max_connections,
        };

        let user_id = match (cli.user_id, env(USER_ENV)) {
            (Some(id), _) => Some(id),
            (None, Some(raw)) => Some(
                Uuid::parse_str(raw.trim())
                    .with_context(|| format!("{USER_ENV} is not a valid UUID: {raw:?}"))?,
            ),
            (None, None) => file.user.id,
        };

        let timeout_secs = match env(TIMEOUT_ENV) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{TIMEOUT_ENV} is not a number of seconds: {raw:?}"))?,
            None => file.ai.timeout_secs,
        };

        let fallback = if file.permissions.fail_closed {
            FallbackPolicy::Deny
        } else {
            FallbackPolicy::Tester
        };

        Ok(Self {
            db_config: DbConfig::new(db_url).with_max_connections(max_connections),
            user_id,
            ai_timeout: Duration::from_secs(timeout_secs.max(1)),
            fallback,
            bind: file.server.bind,
            port: file.server.port,
            dir,
        })
    }

    /// The acting user, or an error explaining how to set one.
    pub fn require_user(&self) -> Result<Uuid> {
        self.user_id.with_context(|| {
            format!("no user configured; pass --user, set {USER_ENV}, or run `testmaster init`")
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
