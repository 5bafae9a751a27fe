//! Detaching the current process from its terminal and session.
use nix::{
    sys::wait::{WaitStatus, waitpid},
    unistd::{ForkResult, fork, getpid, setsid},
};
use std::{
    fs::{self, File, OpenOptions, Permissions},
    io,
    os::unix::{
        fs::{OpenOptionsExt, PermissionsExt},
        io::{AsRawFd, RawFd},
    },
    path::Path,
    process,
};
use tracing::{debug, error};

use crate::constants::{LOG_FILE_MODE, NULL_DEVICE};
use crate::error::DaemonizeError;
use crate::pidfile::PidFile;

/// Which side of the detachment the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The original process; the daemon now runs independently.
    Origin,
    /// The detached daemon; it should run the service and then exit.
    Daemon,
}

/// Turns the calling process into a daemon with the classic double fork.
#[derive(Debug, Default, Clone, Copy)]
pub struct Daemonizer;

impl Daemonizer {
    /// Creates a daemonizer.
    pub fn new() -> Self {
        Self
    }

    /// Forks off a daemon and returns in both processes.
    ///
    /// The origin gets [`Detached::Origin`] once the short-lived intermediate
    /// child has been reaped. The daemon gets [`Detached::Daemon`] after it
    /// has left the session, recorded its pid in `pid_file`, cleared its
    /// umask and pointed its standard streams at `/dev/null` or `log_path`.
    ///
    /// Setup failures inside the daemon cannot be reported back; they are
    /// logged and the daemon exits with status 1.
    pub fn detach(
        &self,
        pid_file: &PidFile,
        log_path: Option<&Path>,
    ) -> Result<Detached, DaemonizeError> {
        match unsafe { fork() }.map_err(DaemonizeError::sys("fork"))? {
            ForkResult::Parent { child } => {
                match waitpid(child, None).map_err(DaemonizeError::sys("waitpid"))? {
                    WaitStatus::Exited(_, 0) => {
                        debug!("Intermediate child {child} handed over to the daemon");
                        Ok(Detached::Origin)
                    }
                    WaitStatus::Exited(_, code) => Err(DaemonizeError::ChildFailed(code)),
                    other => {
                        debug!("Intermediate child {child} ended with {other:?}");
                        Err(DaemonizeError::ChildFailed(-1))
                    }
                }
            }
            ForkResult::Child => match become_daemon(pid_file, log_path) {
                Ok(()) => Ok(Detached::Daemon),
                Err(err) => {
                    error!("Failed to daemonize: {err}");
                    process::exit(1);
                }
            },
        }
    }
}

fn become_daemon(pid_file: &PidFile, log_path: Option<&Path>) -> Result<(), DaemonizeError> {
    setsid().map_err(DaemonizeError::sys("setsid"))?;

    // The session leader forks once more so the survivor can never acquire a
    // controlling terminal.
    match unsafe { fork() }.map_err(DaemonizeError::sys("fork"))? {
        ForkResult::Parent { .. } => unsafe { libc::_exit(0) },
        ForkResult::Child => {}
    }

    pid_file.write(getpid())?;

    unsafe {
        libc::umask(0);
    }

    redirect_streams(log_path)
}

fn redirect_streams(log_path: Option<&Path>) -> Result<(), DaemonizeError> {
    let redirect_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DaemonizeError::Redirect { path, source }
    };

    let null = Path::new(NULL_DEVICE);
    let stdin = File::open(null).map_err(redirect_err(null))?;
    dup_onto(&stdin, libc::STDIN_FILENO).map_err(redirect_err(null))?;

    let (target, output) = match log_path {
        Some(path) => (path, open_log(path).map_err(redirect_err(path))?),
        None => (
            null,
            OpenOptions::new()
                .write(true)
                .open(null)
                .map_err(redirect_err(null))?,
        ),
    };
    dup_onto(&output, libc::STDOUT_FILENO).map_err(redirect_err(target))?;
    dup_onto(&output, libc::STDERR_FILENO).map_err(redirect_err(target))?;

    Ok(())
}

/// Opens the daemon log for appending, creating it (and its directory) if
/// needed and forcing mode 0644.
fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(LOG_FILE_MODE)
        .open(path)?;
    file.set_permissions(Permissions::from_mode(LOG_FILE_MODE))?;
    Ok(file)
}

fn dup_onto(file: &File, target: RawFd) -> io::Result<()> {
    if unsafe { libc::dup2(file.as_raw_fd(), target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
