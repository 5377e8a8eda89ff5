//! Config loading, environment overrides, and limit defaults.

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub logging: LoggingConfig,
    pub limits: Limits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: Option<NonZeroUsize>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 2001,
            max_connections: None,
        }
    }
}

impl ListenConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            rotation: LogRotation::Daily,
        }
    }
}

/// Framing safety limits. Values are explicit about their units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    /// Command lines past this are transport-fatal.
    pub max_line_bytes: usize,
    /// Declared PUT lengths past this are refused before any body read.
    pub max_payload_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_line_bytes: 16 * 1024,
            max_payload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Default config file location: `VCSD_CONFIG`, else `./vcsd.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os("VCSD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("vcsd.toml"))
}

/// Loads the config. An explicit path must exist and parse; the default
/// path is skipped silently when absent. Environment overrides apply on
/// top in both cases.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => {
            let path = config_path();
            if path.exists() {
                read_config(&path)?
            } else {
                Config::default()
            }
        }
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_from(config, |name| std::env::var(name).ok());
}

/// Override logic with an injectable lookup so tests avoid mutating
/// process-global environment state.
fn apply_env_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup("VCSD_HOST") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.listen.host = trimmed.to_owned();
        }
    }

    if let Some(raw) = lookup("VCSD_PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => config.listen.port = port,
            Err(err) => tracing::warn!("invalid VCSD_PORT, ignoring: {err}"),
        }
    }

    if let Some(raw) = lookup("VCSD_MAX_CONNECTIONS") {
        match raw.trim().parse::<NonZeroUsize>() {
            Ok(max) => config.listen.max_connections = Some(max),
            Err(err) => tracing::warn!("invalid VCSD_MAX_CONNECTIONS, ignoring: {err}"),
        }
    }

    if let Some(raw) = lookup("VCSD_MAX_PAYLOAD_BYTES") {
        match raw.trim().parse::<usize>() {
            Ok(bytes) => config.limits.max_payload_bytes = bytes,
            Err(err) => tracing::warn!("invalid VCSD_MAX_PAYLOAD_BYTES, ignoring: {err}"),
        }
    }
}
