//! Error handling for warden.
use std::{io, path::PathBuf};

use thiserror::Error;

/// Boxed error returned by a service callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fatal errors surfaced by [`crate::lifecycle::LifecycleController::execute`].
///
/// Expected lifecycle conditions (already running, not running, a failed
/// signal among many, confirmation timeouts) are reported through
/// [`crate::lifecycle::Outcome`] instead.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The configuration could not be resolved into a runnable identity.
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The process could not be detached from its terminal.
    #[error("Failed to daemonize: {0}")]
    Detach(#[from] DaemonizeError),

    /// The pid file could not be written or removed.
    #[error("PID file error: {0}")]
    PidFile(#[from] PidFileError),

    /// Switching to the resolved user or group failed.
    #[error("Failed to switch process identity: {0}")]
    Privilege(#[source] nix::errno::Errno),

    /// The shutdown signal handlers could not be installed.
    #[error("Failed to install signal handlers: {0}")]
    Signal(#[from] ctrlc::Error),

    /// The service callback returned an error.
    #[error("Service '{service}' failed: {source}")]
    Callback {
        /// The service whose callback failed.
        service: String,
        /// The error returned by the callback.
        #[source]
        source: CallbackError,
    },
}

/// Errors raised while resolving a [`crate::config::Configuration`].
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Reading a configuration file failed.
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A configuration file is not valid YAML for the expected record.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// No service name was supplied.
    #[error("Service name must not be empty")]
    MissingName,

    /// The configured user does not exist on this system.
    #[error("user '{0}' not found")]
    UnknownUser(String),

    /// The configured group does not exist on this system.
    #[error("group '{0}' not found")]
    UnknownGroup(String),

    /// The user or group database could not be queried.
    #[error("Failed to look up '{name}': {source}")]
    Lookup {
        /// The user or group name being resolved.
        name: String,
        /// The underlying error that occurred.
        #[source]
        source: nix::errno::Errno,
    },
}

/// Error type for pid file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Error writing a pid file.
    #[error("Failed to write PID file {path:?}: {source}")]
    Write {
        /// The pid file being written.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error removing a pid file.
    #[error("Failed to remove PID file {path:?}: {source}")]
    Remove {
        /// The pid file being removed.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A pid file pattern could not be compiled.
    #[error("Invalid PID file pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Error listing the directory a pid pattern points into.
    #[error("Failed to scan {dir:?} for PID files: {source}")]
    Scan {
        /// The directory being scanned.
        dir: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },
}

/// Error type for detaching the current process.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// A fork, session or wait system call failed.
    #[error("{call} failed: {source}")]
    Sys {
        /// The failing system call.
        call: &'static str,
        /// The errno reported by the kernel.
        #[source]
        source: nix::errno::Errno,
    },

    /// The intermediate child exited before handing over to the daemon.
    #[error("Detaching child exited with status {0}")]
    ChildFailed(i32),

    /// A standard stream could not be redirected.
    #[error("Failed to redirect standard streams to {path:?}: {source}")]
    Redirect {
        /// The file streams were being pointed at.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The daemon could not record its own pid.
    #[error(transparent)]
    PidFile(#[from] PidFileError),
}

impl DaemonizeError {
    pub(crate) fn sys(call: &'static str) -> impl FnOnce(nix::errno::Errno) -> Self {
        move |source| DaemonizeError::Sys { call, source }
    }
}

/// Error type for the shell command service.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The shell could not be started.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        /// The command line being run.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Polling or reaping the child failed.
    #[error("Failed to wait for command: {0}")]
    Wait(#[source] io::Error),

    /// The command exited unsuccessfully on its own.
    #[error("'{command}' exited with {status}")]
    Exited {
        /// The command line being run.
        command: String,
        /// How the child ended.
        status: std::process::ExitStatus,
    },
}
