//! Application configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PLANS_DIR: &str = "docs/plans";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PROGRAM: &str = "claude";
pub const DEFAULT_SERVER_PORT: u16 = 7433;
pub const DEFAULT_SERVER_BIND: &str = "0.0.0.0";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which plan store backend the app talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// JSON file under the project's plans directory.
    Local,
    /// Central HTTP+SQLite server.
    Remote { base_url: String },
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Local
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Plans directory, relative to the repository root.
    #[serde(default = "default_plans_dir")]
    pub plans_dir: PathBuf,
    /// Metadata tick interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Default harness program spawned into new panes.
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub store: StoreBackend,
}

fn default_plans_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PLANS_DIR)
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plans_dir: default_plans_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            program: default_program(),
            store: StoreBackend::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config at `path`, falling back to defaults when the file is
    /// absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let rendered =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, rendered).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Per-user config directory (`$HOME/.config/kasmos`), also the home of the
/// permission cache and the default server database.
pub fn config_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config").join("kasmos"),
        None => PathBuf::from(".config").join("kasmos"),
    }
}

/// Default SQLite database path for the plan store server.
pub fn default_db_path() -> PathBuf {
    config_dir().join("plans.db")
}
