//! The service lifecycle: start (foreground or daemonized), stop, restart.
//!
//! [`LifecycleController::execute`] is the single entry point. It reads the
//! intent from a [`Configuration`] and drives the pid file, identity switch,
//! daemonizer, signal handling and liveness polling until the service is
//! confirmed running or stopped.
use nix::{sys::signal::Signal, unistd::Pid};
use std::{process, sync::Arc};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, error};

use crate::{
    config::Configuration,
    daemonize::{Daemonizer, Detached},
    error::{CallbackError, LifecycleError},
    liveness::{LivenessPoller, probe},
    logs::{LogSink, Logger, TracingSink},
    pidfile::{PidFile, StopTarget},
    privilege::{PrivilegeManager, ProcessIdentity},
    signals::{ShutdownToken, SignalBridge, StopReport, request_stop},
};

/// Where the controller is in the lifecycle of the service it manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing is running on behalf of this controller.
    Stopped,
    /// A start is in progress but not yet confirmed.
    Starting,
    /// The service is confirmed running (or running in the foreground).
    Running,
    /// Stop signals have been sent; exit not yet confirmed.
    Stopping,
}

/// How an [`LifecycleController::execute`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A daemon was launched and answered the liveness probe.
    Started {
        /// The daemon's pid as recorded in its pid file.
        pid: Pid,
    },
    /// The foreground callback ran and returned.
    Completed,
    /// A live process already owns the pid file; nothing was done.
    AlreadyRunning {
        /// The pid found in the pid file.
        pid: Pid,
    },
    /// Stop signals were sent.
    Stopped {
        /// Per-target details.
        report: StopReport,
        /// Whether every signalled process exited within the poll window.
        confirmed: bool,
    },
    /// No live process matched the stop request; nothing was done.
    NotRunning,
    /// The daemon did not answer the liveness probe within the poll window.
    /// It may still be starting.
    TimedOut,
}

impl Outcome {
    /// Returns whether the requested transition was confirmed.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Started { .. }
                | Outcome::Completed
                | Outcome::Stopped {
                    confirmed: true,
                    ..
                }
        )
    }
}

/// Returns the recorded pid when the pid file exists and that process is
/// alive.
pub fn daemon_running(pid_file: &PidFile) -> Option<Pid> {
    let pid = pid_file.read()?;
    probe(pid).is_alive().then_some(pid)
}

/// Drives a service through its lifecycle.
pub struct LifecycleController {
    sink: Arc<dyn LogSink>,
    poller: LivenessPoller,
    signals: SignalBridge,
    daemonizer: Daemonizer,
    state: LifecycleState,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }
}

impl LifecycleController {
    /// Controller logging through `tracing` with default timings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller logging through `sink`.
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            poller: LivenessPoller::default(),
            signals: SignalBridge::default(),
            daemonizer: Daemonizer::new(),
            state: LifecycleState::Stopped,
        }
    }

    /// Replaces the poller used for start and stop confirmations.
    pub fn with_poller(mut self, poller: LivenessPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Replaces the signal bridge installed around the callback.
    pub fn with_signal_bridge(mut self, signals: SignalBridge) -> Self {
        self.signals = signals;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            debug!("Lifecycle {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Carries out the intent expressed by `config`.
    ///
    /// * `kill` set: stop the matching instances, never start.
    /// * `restart` set: stop this instance, then start.
    /// * otherwise: start, unless a live process already owns the pid file.
    ///
    /// When daemonizing, this call returns in the original process only; the
    /// daemon runs `callback` and exits without returning.
    pub fn execute<F>(
        &mut self,
        config: &Configuration,
        callback: F,
    ) -> Result<Outcome, LifecycleError>
    where
        F: FnOnce(&Configuration, ShutdownToken) -> Result<(), CallbackError>,
    {
        config.validate()?;
        let sink = Arc::clone(&self.sink);
        let logger = Logger::new(sink.as_ref(), config.debug);

        if let Some(raw) = &config.kill {
            return self.stop(config, &StopTarget::parse(raw), &logger);
        }

        if config.restart {
            let own_instance = StopTarget::Path(config.pid_path());
            match self.stop(config, &own_instance, &logger)? {
                Outcome::Stopped {
                    confirmed: false, ..
                } => logger.log(&format!(
                    "Previous {} instance has not exited yet; starting anyway",
                    config.name
                )),
                Outcome::NotRunning => {
                    logger.log(&format!("No running {} instance to restart", config.name))
                }
                _ => {}
            }
        }

        self.start(config, callback, &logger)
    }

    fn stop(
        &mut self,
        config: &Configuration,
        target: &StopTarget,
        logger: &Logger<'_>,
    ) -> Result<Outcome, LifecycleError> {
        let pattern = target.pattern(config);
        let targets = target.resolve(config)?;

        if !targets.iter().any(|pid_file| daemon_running(pid_file).is_some()) {
            logger.log(&format!(
                "{} is not running (no live PID at {})",
                config.name,
                pattern.display()
            ));
            self.transition(LifecycleState::Stopped);
            return Ok(Outcome::NotRunning);
        }

        self.transition(LifecycleState::Stopping);
        let report = request_stop(&targets, Signal::SIGINT, logger);
        let signalled = report.signalled();
        let confirmed = self
            .poller
            .wait_until(|| signalled.iter().all(|pid| !probe(*pid).is_alive()));
        self.transition(LifecycleState::Stopped);

        if confirmed {
            logger.log(&format!(
                "Stopped {} {} target(s)",
                report.stopped(),
                config.name
            ));
        } else {
            logger.log(&format!(
                "{} target(s) of {} still alive after {:?}",
                signalled.len(),
                config.name,
                self.poller.timeout()
            ));
        }

        Ok(Outcome::Stopped { report, confirmed })
    }

    fn start<F>(
        &mut self,
        config: &Configuration,
        callback: F,
        logger: &Logger<'_>,
    ) -> Result<Outcome, LifecycleError>
    where
        F: FnOnce(&Configuration, ShutdownToken) -> Result<(), CallbackError>,
    {
        let pid_file = PidFile::new(config.pid_path());
        if let Some(pid) = daemon_running(&pid_file) {
            logger.log(&format!("{} already started (PID {pid})", config.name));
            return Ok(Outcome::AlreadyRunning { pid });
        }

        // Unknown users and groups must abort before anything is forked.
        let identity = ProcessIdentity::resolve(config)?;
        self.transition(LifecycleState::Starting);

        if !config.daemonize {
            let result = PrivilegeManager::new()
                .apply(&identity)
                .map_err(LifecycleError::Privilege)
                .and_then(|()| {
                    self.transition(LifecycleState::Running);
                    self.run_service(config, callback, logger)
                });
            if result.is_err() {
                self.transition(LifecycleState::Stopped);
            }
            return result.map(|()| Outcome::Completed);
        }

        let detached = self
            .daemonizer
            .detach(&pid_file, config.log_path.as_deref())
            .inspect_err(|_| self.transition(LifecycleState::Stopped))?;

        match detached {
            Detached::Daemon => self.run_detached(config, &identity, callback, logger),
            Detached::Origin => {
                let mut running = None;
                let confirmed = self.poller.wait_until(|| {
                    running = daemon_running(&pid_file);
                    running.is_some()
                });

                match running {
                    Some(pid) if confirmed => {
                        self.transition(LifecycleState::Running);
                        logger.log(&format!("{} running as PID {pid}", config.name));
                        Ok(Outcome::Started { pid })
                    }
                    _ => {
                        self.transition(LifecycleState::Stopped);
                        logger.log(&format!(
                            "{} did not come up within {:?}",
                            config.name,
                            self.poller.timeout()
                        ));
                        Ok(Outcome::TimedOut)
                    }
                }
            }
        }
    }

    /// Daemon side of a detached start: drop privileges, run, exit.
    fn run_detached<F>(
        &mut self,
        config: &Configuration,
        identity: &ProcessIdentity,
        callback: F,
        logger: &Logger<'_>,
    ) -> !
    where
        F: FnOnce(&Configuration, ShutdownToken) -> Result<(), CallbackError>,
    {
        let result = PrivilegeManager::new()
            .apply(identity)
            .map_err(LifecycleError::Privilege)
            .and_then(|()| {
                self.transition(LifecycleState::Running);
                self.run_service(config, callback, logger)
            });

        let code = match result {
            Ok(()) => 0,
            Err(err) => {
                error!("{err}");
                1
            }
        };
        process::exit(code);
    }

    /// Runs the callback with shutdown signals routed to its token.
    fn run_service<F>(
        &self,
        config: &Configuration,
        callback: F,
        logger: &Logger<'_>,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce(&Configuration, ShutdownToken) -> Result<(), CallbackError>,
    {
        logger.log(&format!("Starting {} service...", config.name));

        let token = ShutdownToken::new();
        let hook_token = token.clone();
        let guard = self.signals.install(move || hook_token.cancel())?;

        let result = callback(config, token);
        drop(guard);

        result.map_err(|source| LifecycleError::Callback {
            service: config.name.clone(),
            source,
        })
    }
}
