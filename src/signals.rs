//! Signal plumbing: graceful-shutdown handlers inside a running service and
//! stop signals sent to other instances.
//!
//! Interrupt and terminate are both routed through `ctrlc` into one hook, so
//! an operator's Ctrl-C and an orchestrator's SIGTERM take the same path. The
//! hook only requests cancellation; the callback observes it through a
//! [`ShutdownToken`].
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{
    path::PathBuf,
    process,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::constants::SHUTDOWN_GRACE;
use crate::logs::Logger;
use crate::pidfile::PidFile;

/// A one-shot flag that threads can block on.
#[derive(Debug, Default)]
struct Latch {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Latch {
    fn set(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        *set = true;
        self.changed.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            set = self
                .changed
                .wait_timeout(set, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn wait(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            set = self
                .changed
                .wait(set)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Cancellation request handed to a running service callback.
///
/// Cheap to clone; every clone observes the same request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    latch: Arc<Latch>,
}

impl ShutdownToken {
    /// Creates a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent.
    pub fn cancel(&self) {
        self.latch.set();
    }

    /// Returns whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.latch.is_set()
    }

    /// Blocks for at most `timeout`, returning early with `true` once
    /// shutdown is requested. Doubles as an interruptible sleep.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.latch.wait_timeout(timeout)
    }

    /// Blocks until shutdown is requested.
    pub fn wait(&self) {
        self.latch.wait();
    }
}

struct Registration {
    on_shutdown: Box<dyn Fn() + Send + Sync>,
    fired: AtomicBool,
    finished: Latch,
    grace: Duration,
}

static ACTIVE: Mutex<Option<Arc<Registration>>> = Mutex::new(None);
static HANDLER_INSTALLED: Mutex<bool> = Mutex::new(false);

fn active_registration() -> Option<Arc<Registration>> {
    ACTIVE.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Entry point run by the `ctrlc` thread for SIGINT and SIGTERM.
fn dispatch_shutdown() {
    let Some(registration) = active_registration() else {
        debug!("Shutdown signal received with no running service; exiting");
        process::exit(0);
    };

    if registration.fired.swap(true, Ordering::SeqCst) {
        debug!("Shutdown already in progress; ignoring repeated signal");
        return;
    }

    info!("Shutdown signal received; requesting service stop");
    (registration.on_shutdown)();

    if !registration.finished.wait_timeout(registration.grace) {
        warn!(
            "Service did not return within {:?} of the shutdown request; exiting",
            registration.grace
        );
        process::exit(0);
    }
}

fn ensure_handler() -> Result<(), ctrlc::Error> {
    let mut installed = HANDLER_INSTALLED
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if !*installed {
        ctrlc::set_handler(dispatch_shutdown)?;
        *installed = true;
    }
    Ok(())
}

/// Installs graceful-shutdown handling for the current process.
#[derive(Debug, Clone, Copy)]
pub struct SignalBridge {
    grace: Duration,
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new(SHUTDOWN_GRACE)
    }
}

impl SignalBridge {
    /// Bridge whose handler terminates the process if the service has not
    /// returned `grace` after the shutdown hook ran.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Routes SIGINT and SIGTERM to `on_shutdown`.
    ///
    /// The hook runs at most once per installation, on the signal thread.
    /// Installing again replaces the previous hook. Dropping the returned
    /// guard tells a pending handler that the service has returned and
    /// unregisters the hook.
    pub fn install<F>(&self, on_shutdown: F) -> Result<ShutdownGuard, ctrlc::Error>
    where
        F: Fn() + Send + Sync + 'static,
    {
        ensure_handler()?;

        let registration = Arc::new(Registration {
            on_shutdown: Box::new(on_shutdown),
            fired: AtomicBool::new(false),
            finished: Latch::default(),
            grace: self.grace,
        });
        *ACTIVE.lock().unwrap_or_else(PoisonError::into_inner) = Some(registration.clone());
        debug!("Installed shutdown handler for SIGINT and SIGTERM");

        Ok(ShutdownGuard { registration })
    }
}

/// Keeps a shutdown hook registered for as long as it lives.
pub struct ShutdownGuard {
    registration: Arc<Registration>,
}

#[cfg(test)]
impl ShutdownGuard {
    pub(crate) fn fired(&self) -> bool {
        self.registration.fired.load(Ordering::SeqCst)
    }

    /// Runs the hook as if a signal had arrived, without the exit fallback.
    pub(crate) fn trigger(&self) {
        if !self.registration.fired.swap(true, Ordering::SeqCst) {
            (self.registration.on_shutdown)();
        }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.registration.finished.set();
        let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        if active
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &self.registration))
        {
            *active = None;
        }
    }
}

/// What happened when a stop signal was sent to one pid file's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The signal was delivered.
    Sent(Pid),
    /// The pid file did not contain a usable pid.
    InvalidPid,
    /// The kernel refused the signal (stale pid, foreign process, ...).
    Failed {
        /// The pid read from the file.
        pid: Pid,
        /// Why delivery failed.
        errno: Errno,
    },
}

/// Per-target record of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopEntry {
    /// The pid file that was processed.
    pub path: PathBuf,
    /// Outcome of signalling the recorded process.
    pub delivery: Delivery,
    /// Whether the pid file is gone afterwards.
    pub removed: bool,
}

/// Result of a best-effort stop over a set of pid files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// One entry per pid file, in resolution order.
    pub entries: Vec<StopEntry>,
}

impl StopReport {
    /// Number of targets whose pid file was cleared.
    pub fn stopped(&self) -> usize {
        self.entries.iter().filter(|entry| entry.removed).count()
    }

    /// Number of targets the signal could not be delivered to.
    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !matches!(entry.delivery, Delivery::Sent(_)))
            .count()
    }

    /// Pids that were successfully signalled.
    pub fn signalled(&self) -> Vec<Pid> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.delivery {
                Delivery::Sent(pid) => Some(pid),
                _ => None,
            })
            .collect()
    }
}

/// Signals the process behind each pid file and removes the file.
///
/// A failure on one target is logged and the loop moves on; the pid file is
/// removed whether or not the signal got through.
pub fn request_stop(targets: &[PidFile], sig: Signal, logger: &Logger<'_>) -> StopReport {
    let mut report = StopReport::default();

    for target in targets {
        let path = target.path().to_path_buf();
        let delivery = match target.read() {
            Some(pid) => match signal::kill(pid, sig) {
                Ok(()) => Delivery::Sent(pid),
                Err(errno) => Delivery::Failed { pid, errno },
            },
            None => Delivery::InvalidPid,
        };

        let removed = match target.remove() {
            Ok(()) => true,
            Err(err) => {
                warn!("{err}");
                false
            }
        };

        match delivery {
            Delivery::Sent(pid) => {
                logger.log(&format!("Sent {sig} to PID {pid} at {}", path.display()))
            }
            Delivery::InvalidPid => {
                warn!("PID file {:?} holds no valid pid", path);
                logger.log(&format!("Failed to stop {}: no valid pid", path.display()));
            }
            Delivery::Failed { pid, errno } => {
                warn!("Failed to send {sig} to PID {pid} from {:?}: {errno}", path);
                logger.log(&format!(
                    "Failed to stop PID {pid} at {}: {errno}",
                    path.display()
                ));
            }
        }

        report.entries.push(StopEntry {
            path,
            delivery,
            removed,
        });
    }

    report
}
