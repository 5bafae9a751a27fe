//! Warden runs any long-lived callback as a classic Unix service: it can
//! detach it from the terminal, record its pid, switch to an unprivileged
//! identity, route shutdown signals to it, and later find and stop it again
//! through its pid file.

/// CLI interface.
pub mod cli;

/// Shell command service callback.
pub mod command;

/// Configuration management.
pub mod config;

/// Constants and default values.
pub mod constants;

/// Detaching into a daemon.
pub mod daemonize;

/// Error handling.
pub mod error;

/// Service lifecycle state machine.
pub mod lifecycle;

/// Liveness probing and confirmation polling.
pub mod liveness;

/// Log sinks and subscriber setup.
pub mod logs;

/// PID file records and target resolution.
pub mod pidfile;

/// User and group switching.
pub mod privilege;

/// Shutdown signal handling and stop requests.
pub mod signals;

pub use config::Configuration;
pub use lifecycle::{LifecycleController, Outcome};
pub use signals::ShutdownToken;
