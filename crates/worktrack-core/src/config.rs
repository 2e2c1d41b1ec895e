use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding `[database] path`.
pub const DB_PATH_ENV: &str = "WORKTRACK_DB";

const PROJECT_CONFIG: &str = ".worktrack/config.toml";
const USER_CONFIG: &str = "worktrack/config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub paging: PagingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl ApiConfig {
    /// Collection URL for work items, without a trailing slash on the base.
    #[must_use]
    pub fn workitems_url(&self) -> String {
        format!("{}/workitems", self.base_url.trim_end_matches('/'))
    }

    #[must_use]
    pub fn iterations_url(&self) -> String {
        format!("{}/iterations", self.base_url.trim_end_matches('/'))
    }
}

impl ServiceConfig {
    /// Reject settings the paging rules cannot work with.
    ///
    /// # Errors
    ///
    /// Fails when `default_limit` is 0 or exceeds `max_limit`.
    pub fn validate(&self) -> Result<()> {
        let PagingConfig {
            default_limit,
            max_limit,
        } = self.paging;
        if default_limit == 0 {
            bail!("paging.default_limit must be at least 1");
        }
        if default_limit > max_limit {
            bail!("paging.default_limit ({default_limit}) exceeds paging.max_limit ({max_limit})");
        }
        Ok(())
    }

    /// Database path, relative paths resolved against `project_root`.
    #[must_use]
    pub fn database_path(&self, project_root: &Path) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            project_root.join(&self.database.path)
        }
    }
}

/// Load the effective configuration for a project.
///
/// The project file wins over the user file; with neither present the
/// defaults apply. `WORKTRACK_DB` then overrides the database path.
///
/// # Errors
///
/// Fails when a config file exists but cannot be read or parsed, or when
/// the result does not validate.
pub fn load_config(project_root: &Path) -> Result<ServiceConfig> {
    let project = project_root.join(PROJECT_CONFIG);
    let user = dirs::config_dir().map(|dir| dir.join(USER_CONFIG));

    let mut config = match read_config(&project)? {
        Some(cfg) => cfg,
        None => match user.as_deref().map(read_config).transpose()?.flatten() {
            Some(cfg) => cfg,
            None => ServiceConfig::default(),
        },
    };

    apply_db_override(&mut config, env::var(DB_PATH_ENV).ok());
    config.validate()?;
    tracing::debug!(db = %config.database.path.display(), "configuration loaded");
    Ok(config)
}

/// Parse one config file, `None` when it does not exist.
///
/// # Errors
///
/// Fails on read errors or invalid TOML.
pub fn read_config(path: &Path) -> Result<Option<ServiceConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str::<ServiceConfig>(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn apply_db_override(config: &mut ServiceConfig, raw: Option<String>) {
    if let Some(path) = raw.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) {
        config.database.path = PathBuf::from(path);
    }
}

const fn default_limit() -> u64 {
    20
}

const fn default_max_limit() -> u64 {
    100
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".worktrack/worktrack.sqlite3")
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
