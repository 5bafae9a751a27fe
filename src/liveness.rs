//! Liveness probing and bounded confirmation polling.
use nix::{errno::Errno, sys::signal, unistd::Pid};
use std::{
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::constants::{CONFIRMATION_INTERVAL, CONFIRMATION_TIMEOUT};

/// Result of a signal-zero probe against a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists. It may belong to another user.
    Alive,
    /// The kernel reports no such process.
    Gone,
    /// The probe failed for another reason.
    Unknown(Errno),
}

impl Liveness {
    /// Collapses the probe result into "is it running?".
    ///
    /// `Unknown` counts as not running.
    pub fn is_alive(self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Sends signal zero to `pid` to test whether it exists.
///
/// On Linux an exited but unreaped (zombie) process counts as gone.
pub fn probe(pid: Pid) -> Liveness {
    match signal::kill(pid, None) {
        Ok(()) if is_zombie(pid) => Liveness::Gone,
        Ok(()) => Liveness::Alive,
        Err(Errno::ESRCH) => Liveness::Gone,
        // The process exists; we are just not allowed to signal it.
        Err(Errno::EPERM) => Liveness::Alive,
        Err(err) => {
            warn!("Failed to probe PID {pid}: {err}");
            Liveness::Unknown(err)
        }
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: Pid) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state is the first field after the parenthesised command name.
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].trim_start().chars().next())
        .is_some_and(|state| matches!(state, 'Z' | 'X'))
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: Pid) -> bool {
    false
}

/// Polls a predicate until it holds or a deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPoller {
    timeout: Duration,
    interval: Duration,
}

impl Default for LivenessPoller {
    fn default() -> Self {
        Self::new(CONFIRMATION_TIMEOUT, CONFIRMATION_INTERVAL)
    }
}

impl LivenessPoller {
    /// Creates a poller. A zero interval is bumped to one millisecond so the
    /// loop always sleeps between evaluations.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Total time budget for one confirmation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay between evaluations.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Evaluates `predicate` immediately and then once per interval until it
    /// returns `true` or the timeout elapses.
    ///
    /// Returns whether the predicate held in time. The predicate is evaluated
    /// one last time at the deadline.
    pub fn wait_until<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;

        loop {
            if predicate() {
                debug!("Condition confirmed after {:?}", started.elapsed());
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Condition not confirmed within {:?}", self.timeout);
                return false;
            }

            thread::sleep(self.interval.min(deadline - now));
        }
    }
}
