//! Constants and default values shared by the lifecycle controller.
//!
//! Timings, default paths and file modes live here so the rest of the crate
//! never hard-codes them.

use std::time::Duration;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Host handed to the service callback when none is configured.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Directory holding pid files when no explicit `pid_path` is configured.
pub const DEFAULT_PID_DIR: &str = "/var/run";

/// Extension used for every pid file.
pub const PID_EXTENSION: &str = "pid";

/// Kill target meaning "every instance of this service".
pub const WILDCARD_TARGET: &str = "*";

// ============================================================================
// Confirmation Polling
// ============================================================================

/// Upper bound on how long the controller waits for a daemon to come up or go away.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between two liveness evaluations while waiting for a confirmation.
pub const CONFIRMATION_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Shutdown Handling
// ============================================================================

/// How long a signal handler waits for the callback to return before it
/// terminates the process itself.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Delay between child status checks in the command service.
pub const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time a command child gets to exit after SIGTERM before it is killed.
pub const CHILD_TERM_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Daemon Streams
// ============================================================================

/// Device standard streams are pointed at when detached without a log file.
pub const NULL_DEVICE: &str = "/dev/null";

/// Permission bits enforced on the daemon log file.
pub const LOG_FILE_MODE: u32 = 0o644;

// ============================================================================
// Shell Execution
// ============================================================================

/// Shell used by the command service.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";
