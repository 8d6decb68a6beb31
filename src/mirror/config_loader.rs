use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Config file not found, a template was written to {0}; fill it in and run again")]
    NotFound(PathBuf),

    #[error("Config is missing a value for `{0}`")]
    Incomplete(&'static str),

    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Base folder missing from config")]
    MirrorRootUnset,

    #[error("Base folder missing from disk: {0}")]
    MirrorRootMissing(PathBuf),

    #[error("Unable to determine a config directory for this platform")]
    NoConfigDirectory,
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the configuration file inside the config directory.
pub const CONFIG_NAME: &str = "config.toml";

/// How strictly an existing local file is checked before it counts as mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Size must match the catalog.
    #[default]
    Size,
    /// Size must match, and the checksum too whenever the catalog reports one.
    Checksum,
}

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Account {
    pub nickname: String,
    pub api_key: String,
    /// Optional: without it the session is anonymous and checksums are not reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Paths {
    pub mirror_root: PathBuf,
    /// Where `metadata.json`, `localmd5.json` and logs live. Defaults to the
    /// platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Download {
    pub concurrency: usize,
    pub verify: VerifyMode,
    pub retry_attempts: usize,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for Download {
    fn default() -> Self {
        Self {
            concurrency: 4,
            verify: VerifyMode::Size,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    pub log_to_file: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
        }
    }
}

/// Everything the core needs, loaded once and passed down explicitly.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MirrorConfig {
    pub account: Account,
    pub paths: Paths,
    pub download: Download,
    pub logging: Logging,
}

impl MirrorConfig {
    /// Loads `config.toml`. A missing file is replaced by a template and
    /// reported as an error, since nothing useful can run without credentials.
    pub fn load(config_path: &Path) -> ConfigResult<Self> {
        if !config_path.exists() {
            tracing::warn!("Config file not found: {}", config_path.display());
            Self::write_template(config_path)?;
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }

        let content = fs::read_to_string(config_path)?;
        let mut config: MirrorConfig = toml::from_str(&content)?;
        config.paths.mirror_root = expand_home(&config.paths.mirror_root);
        Ok(config)
    }

    /// Checks the precondition for every command: account, API key and mirror root are set.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.account.nickname.trim().is_empty() {
            return Err(ConfigError::Incomplete("account.nickname"));
        }
        if self.account.api_key.trim().is_empty() {
            return Err(ConfigError::Incomplete("account.api_key"));
        }
        if self.paths.mirror_root.as_os_str().is_empty() {
            return Err(ConfigError::MirrorRootUnset);
        }
        if self.download.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "download.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.download.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "download.retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.download.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "download.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn password(&self) -> Option<&str> {
        self.account
            .password
            .as_deref()
            .filter(|password| !password.is_empty())
    }

    /// Cache directory from the config, falling back to the platform default.
    pub fn cache_directory(&self) -> ConfigResult<PathBuf> {
        match &self.paths.cache_directory {
            Some(dir) => Ok(expand_home(dir)),
            None => project_dirs()
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .ok_or(ConfigError::NoConfigDirectory),
        }
    }

    fn write_template(config_path: &Path) -> ConfigResult<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(&MirrorConfig::default())
            .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(config_path, toml_string)?;
        Ok(())
    }
}

/// Default location of `config.toml`.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.config_dir().join(CONFIG_NAME))
        .ok_or(ConfigError::NoConfigDirectory)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "SmugMirror")
}

/// Expands a leading `~` the way a shell would.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(base) => base.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
