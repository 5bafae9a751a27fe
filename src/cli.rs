//! Command-line interface for warden.
use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::command::CommandService;
use crate::config::{Configuration, Identity, load_config};
use crate::constants::WILDCARD_TARGET;
use crate::error::ConfigurationError;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for warden.
#[derive(Parser, Debug)]
#[command(name = "warden", version, author)]
#[command(
    about = "Run a command as a PID-file managed service",
    long_about = None
)]
pub struct Cli {
    /// Service name; also names the default PID file.
    #[arg(short, long)]
    pub name: Option<String>,

    /// YAML file supplying defaults; flags given here override it.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host the service should bind to.
    #[arg(long)]
    pub host: Option<String>,

    /// Port the service should bind to.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// PID file location (defaults to /var/run/<name>.pid).
    #[arg(short = 'P', long = "pid", value_name = "FILE")]
    pub pid_path: Option<PathBuf>,

    /// Detach from the terminal and run in the background.
    #[arg(short, long = "daemon")]
    pub daemonize: bool,

    /// Stop running instances instead of starting. TARGET is `*` (all, the
    /// default), an instance tag such as a port, or a PID file path.
    #[arg(
        short,
        long,
        value_name = "TARGET",
        num_args = 0..=1,
        default_missing_value = WILDCARD_TARGET
    )]
    pub kill: Option<String>,

    /// Stop the running instance, then start a new one.
    #[arg(long, conflicts_with = "kill")]
    pub restart: bool,

    /// User to run the service as.
    #[arg(short, long)]
    pub user: Option<Identity>,

    /// Group to run the service as.
    #[arg(short = 'G', long)]
    pub group: Option<Identity>,

    /// File receiving stdout and stderr once daemonized.
    #[arg(short, long = "log", value_name = "FILE")]
    pub log_path: Option<PathBuf>,

    /// Print lifecycle messages.
    #[arg(long)]
    pub debug: bool,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Command to run as the service, run through `sh -c`.
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// The service command, if one was given after `--`.
    pub fn service(&self) -> Option<CommandService> {
        if self.command.is_empty() {
            None
        } else {
            Some(CommandService::from_args(&self.command))
        }
    }

    /// Merges the flags over the optional YAML file into a configuration.
    pub fn into_configuration(self) -> Result<Configuration, ConfigurationError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => Configuration::new(self.name.clone().unwrap_or_default()),
        };

        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(pid_path) = self.pid_path {
            config.set_pid_path(pid_path);
        }
        if let Some(log_path) = self.log_path {
            config.log_path = Some(log_path);
        }
        if let Some(user) = self.user {
            config.user = Some(user);
        }
        if let Some(group) = self.group {
            config.group = Some(group);
        }
        if self.kill.is_some() {
            config.kill = self.kill;
        }
        config.daemonize |= self.daemonize;
        config.restart |= self.restart;
        config.debug |= self.debug;

        config.validate()?;
        Ok(config)
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
