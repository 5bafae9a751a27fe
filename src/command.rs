//! A ready-made service callback that runs a shell command.
//!
//! The command runs in its own process group. When the shutdown token is
//! cancelled the group receives SIGTERM, and SIGKILL if it is still around
//! after [`CHILD_TERM_TIMEOUT`].
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{
    os::unix::process::CommandExt,
    process::{Child, Command, ExitStatus},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::constants::{
    CHILD_POLL_INTERVAL, CHILD_TERM_TIMEOUT, DEFAULT_SHELL, SHELL_COMMAND_FLAG,
};
use crate::error::CommandError;
use crate::signals::ShutdownToken;

/// Environment variable carrying the service name.
pub const ENV_SERVICE: &str = "WARDEN_SERVICE";
/// Environment variable carrying the configured host.
pub const ENV_HOST: &str = "WARDEN_HOST";
/// Environment variable carrying the configured port, when set.
pub const ENV_PORT: &str = "WARDEN_PORT";

/// Runs `sh -c <command>` until it exits or shutdown is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandService {
    command: String,
}

impl CommandService {
    /// Wraps a shell command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Builds a command line from separate arguments, joined by spaces.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        Self::new(parts.join(" "))
    }

    /// The shell command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    fn build(&self, config: &Configuration) -> Command {
        let mut cmd = Command::new(DEFAULT_SHELL);
        cmd.arg(SHELL_COMMAND_FLAG)
            .arg(&self.command)
            .env(ENV_SERVICE, &config.name)
            .env(ENV_HOST, &config.host)
            .process_group(0);
        match config.port {
            Some(port) => cmd.env(ENV_PORT, port.to_string()),
            None => cmd.env_remove(ENV_PORT),
        };
        cmd
    }

    /// Runs the command to completion or until `token` is cancelled.
    ///
    /// A command that exits on its own must succeed. A command stopped on
    /// request counts as a clean shutdown whatever its exit status.
    pub fn run(&self, config: &Configuration, token: &ShutdownToken) -> Result<(), CommandError> {
        let mut child = self
            .build(config)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        let pid = Pid::from_raw(child.id() as i32);
        info!("Started '{}' as PID {pid}", self.command);

        loop {
            if let Some(status) = child.try_wait().map_err(CommandError::Wait)? {
                return self.check_exit(status);
            }
            if token.wait_timeout(CHILD_POLL_INTERVAL) {
                break;
            }
        }

        info!("Shutdown requested; stopping '{}' (PID {pid})", self.command);
        let status = terminate(&mut child, pid)?;
        debug!("'{}' stopped with {status}", self.command);
        Ok(())
    }

    fn check_exit(&self, status: ExitStatus) -> Result<(), CommandError> {
        if status.success() {
            info!("'{}' exited successfully", self.command);
            Ok(())
        } else {
            Err(CommandError::Exited {
                command: self.command.clone(),
                status,
            })
        }
    }
}

/// SIGTERM to the child's group, then SIGKILL after the timeout.
fn terminate(child: &mut Child, pid: Pid) -> Result<ExitStatus, CommandError> {
    match signal::killpg(pid, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!("Failed to signal process group {pid}: {err}; signalling PID directly");
            if let Err(err) = signal::kill(pid, Signal::SIGTERM)
                && err != Errno::ESRCH
            {
                warn!("Failed to send SIGTERM to PID {pid}: {err}");
            }
        }
    }

    if let Some(status) = wait_with_timeout(child, CHILD_TERM_TIMEOUT)? {
        return Ok(status);
    }

    warn!("PID {pid} did not exit after SIGTERM; sending SIGKILL");
    if let Err(err) = signal::killpg(pid, Signal::SIGKILL)
        && err != Errno::ESRCH
    {
        warn!("Failed to kill process group {pid}: {err}");
    }
    child.wait().map_err(CommandError::Wait)
}

/// Waits for `child` for at most `timeout`, returning `Ok(None)` on timeout.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<ExitStatus>, CommandError> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait().map_err(CommandError::Wait)? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(CHILD_POLL_INTERVAL);
            }
        }
    }
}
