//! Configuration file management for qrstudio.
//!
//! Provides a TOML-based config file at `~/.config/qrstudio/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use qrstudio_core::workflow::WorkflowConfig;
use qrstudio_db::config::DbConfig;

/// Env var overriding the data directory.
pub const DATA_DIR_ENV: &str = "QRSTUDIO_DATA_DIR";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub studio: StudioSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Saved codes are unavailable without a database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StudioSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_link_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_tick_ms: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the qrstudio config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/qrstudio` or
/// `~/.config/qrstudio`, never the platform-specific config dir.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("qrstudio");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("qrstudio")
}

/// Return the path to the qrstudio config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default location for the session file and history.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qrstudio")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&config_path())
}

/// Serialize and write a config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // The database URL may carry a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(&config_path(), config)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct StudioConfig {
    pub db_config: Option<DbConfig>,
    pub data_dir: PathBuf,
    pub workflow: WorkflowConfig,
}

impl StudioConfig {
    /// Resolve configuration from the user's config file.
    pub fn resolve(cli_db_url: Option<&str>, cli_data_dir: Option<&Path>) -> Result<Self> {
        let path = config_path();
        let file_config = if path.exists() {
            Some(load_config_from(&path)?)
        } else {
            None
        };
        Self::resolve_with(file_config.as_ref(), cli_db_url, cli_data_dir)
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `QRSTUDIO_DATABASE_URL` > `database.url` > none
    /// - Data dir: `cli_data_dir` > `QRSTUDIO_DATA_DIR` > `studio.data_dir` >
    ///   `<platform data dir>/qrstudio`
    /// - Workflow timings and short link base: config file > default
    pub fn resolve_with(
        file_config: Option<&ConfigFile>,
        cli_db_url: Option<&str>,
        cli_data_dir: Option<&Path>,
    ) -> Result<Self> {
        let db_url = if let Some(url) = cli_db_url {
            Some(url.to_string())
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            Some(url)
        } else {
            file_config.and_then(|c| c.database.url.clone())
        };
        let db_config = db_url.map(DbConfig::new);

        let data_dir = if let Some(dir) = cli_data_dir {
            dir.to_path_buf()
        } else if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(dir)
        } else if let Some(dir) = file_config.and_then(|c| c.studio.data_dir.clone()) {
            dir
        } else {
            default_data_dir()
        };

        let mut workflow = WorkflowConfig::default();
        if let Some(studio) = file_config.map(|c| &c.studio) {
            if let Some(base) = &studio.short_link_base {
                workflow.short_link_base = base.trim_end_matches('/').to_string();
            }
            if let Some(ms) = studio.progress_duration_ms {
                workflow.duration = Duration::from_millis(ms);
            }
            if let Some(ms) = studio.progress_tick_ms {
                if ms == 0 {
                    bail!("studio.progress_tick_ms must be greater than zero");
                }
                workflow.tick = Duration::from_millis(ms);
            }
        }

        Ok(Self {
            db_config,
            data_dir,
            workflow,
        })
    }

    /// The database config, or an error explaining how to set one.
    pub fn require_db(&self) -> Result<&DbConfig> {
        self.db_config.as_ref().with_context(|| {
            format!(
                "no database configured; set {} or run `qrstudio init --db-url <URL>`",
                DbConfig::ENV_VAR
            )
        })
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.toml")
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
