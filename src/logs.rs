//! Log sinks for lifecycle messages and subscriber setup for the binary.
use std::sync::{Mutex, PoisonError};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Destination for lifecycle narrative ("Starting demo service...").
pub trait LogSink: Send + Sync {
    /// Records one message.
    fn log(&self, message: &str);
}

/// Forwards messages as `tracing` info events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        info!(target: "warden", "{message}");
    }
}

/// Keeps messages in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message recorded so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns whether any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

/// A sink paired with the debug switch that gates it.
///
/// Threaded through every lifecycle operation in place of a global logger.
#[derive(Clone, Copy)]
pub struct Logger<'a> {
    sink: &'a dyn LogSink,
    enabled: bool,
}

impl<'a> Logger<'a> {
    /// Wraps `sink`; messages are dropped unless `enabled`.
    pub fn new(sink: &'a dyn LogSink, enabled: bool) -> Self {
        Self { sink, enabled }
    }

    /// Forwards `message` when enabled.
    pub fn log(&self, message: &str) {
        if self.enabled {
            self.sink.log(message);
        }
    }
}

/// Installs the global `tracing` subscriber used by the binary.
///
/// An explicit `level` wins over `RUST_LOG`; the fallback is `info`.
pub fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .try_init();
}
