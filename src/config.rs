//! Configuration management for warden.
use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::constants::{DEFAULT_HOST, DEFAULT_PID_DIR, PID_EXTENSION};
use crate::error::ConfigurationError;

/// A user or group given either by name or by numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    /// Numeric uid or gid, used as-is.
    Id(u32),
    /// Account or group name, looked up in the system database.
    Name(String),
}

impl Identity {
    /// Returns the numeric id when no lookup is required.
    pub fn numeric(&self) -> Option<u32> {
        match self {
            Identity::Id(id) => Some(*id),
            Identity::Name(name) => name.trim().parse().ok(),
        }
    }
}

impl FromStr for Identity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("identity cannot be empty".into());
        }
        Ok(match trimmed.parse::<u32>() {
            Ok(id) => Identity::Id(id),
            Err(_) => Identity::Name(trimmed.to_string()),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Id(id) => write!(f, "{id}"),
            Identity::Name(name) => f.write_str(name),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

/// Fully resolved settings for one service invocation.
///
/// Produced by the CLI (or any other front end) and consumed by the
/// lifecycle controller. Every field except `name` has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Service name, used in log lines and to derive the default pid path.
    pub name: String,
    /// Host the service should bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the service should bind to.
    #[serde(default)]
    pub port: Option<u16>,
    /// Explicit pid file location; see [`Configuration::pid_path`].
    #[serde(default)]
    pid_path: Option<PathBuf>,
    /// File receiving stdout and stderr once daemonized.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Detach from the terminal before running the service.
    #[serde(default)]
    pub daemonize: bool,
    /// User to run the service as.
    #[serde(default)]
    pub user: Option<Identity>,
    /// Group to run the service as.
    #[serde(default)]
    pub group: Option<Identity>,
    /// Stop the running instance(s) instead of starting; `*` targets all of them.
    #[serde(default)]
    pub kill: Option<String>,
    /// Stop any running instance, then start a fresh one.
    #[serde(default)]
    pub restart: bool,
    /// Forward lifecycle messages to the log sink.
    #[serde(default)]
    pub debug: bool,
}

impl Configuration {
    /// Creates a configuration with every optional field at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: default_host(),
            port: None,
            pid_path: None,
            log_path: None,
            daemonize: false,
            user: None,
            group: None,
            kill: None,
            restart: false,
            debug: false,
        }
    }

    /// Overrides the pid file location. An empty path restores the default.
    pub fn with_pid_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_pid_path(path);
        self
    }

    /// In-place variant of [`Configuration::with_pid_path`].
    pub fn set_pid_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.pid_path = if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        };
    }

    /// Location of the pid file for this service.
    ///
    /// Falls back to `/var/run/<name>.pid`, or `/var/run/<name>.<port>.pid`
    /// when a port is set, so the result is never empty.
    pub fn pid_path(&self) -> PathBuf {
        match &self.pid_path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => Path::new(DEFAULT_PID_DIR).join(self.default_pid_file_name()),
        }
    }

    /// File name stem shared by every pid file of this service.
    pub(crate) fn pid_stem(&self) -> String {
        match &self.pid_path {
            Some(path) if !path.as_os_str().is_empty() => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.name.clone()),
            _ => self.name.clone(),
        }
    }

    fn default_pid_file_name(&self) -> String {
        match self.port {
            Some(port) => format!("{}.{port}.{PID_EXTENSION}", self.name),
            None => format!("{}.{PID_EXTENSION}", self.name),
        }
    }

    /// Checks the invariants the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::MissingName);
        }
        Ok(())
    }
}

/// Loads a configuration record from a YAML file.
pub fn load_config(path: &Path) -> Result<Configuration, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: Configuration = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
