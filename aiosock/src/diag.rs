//! Diagnostic hook.
//!
//! Components never reach for a global logger on their own; each one holds a
//! [`Recorder`] handed in through its configuration. The default
//! [`LogRecorder`] forwards to the `log` facade under a per-component target,
//! so the caller decides which backend (if any) renders the messages.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

pub use log::Level;

/// Sink for diagnostic messages.
pub trait Recorder: Send + Sync {
    fn record(&self, level: Level, message: fmt::Arguments<'_>);
}

impl fmt::Debug for dyn Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Recorder")
    }
}

/// Forwards every message to the `log` crate.
#[derive(Debug, Clone, Copy)]
pub struct LogRecorder {
    target: &'static str,
}

impl LogRecorder {
    pub const fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogRecorder {
    fn default() -> Self {
        Self::new("aiosock")
    }
}

impl Recorder for LogRecorder {
    fn record(&self, level: Level, message: fmt::Arguments<'_>) {
        log::log!(target: self.target, level, "{}", message);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn record(&self, _level: Level, _message: fmt::Arguments<'_>) {}
}

pub(crate) fn default_recorder() -> Arc<dyn Recorder> {
    Arc::new(LogRecorder::default())
}

/// `record!(recorder, Level::Info, "fmt", args..)`
macro_rules! record {
    ($recorder:expr, $level:expr, $($arg:tt)+) => {
        $recorder.record($level, format_args!($($arg)+))
    };
}

pub(crate) use record;

/// Keeps every recorded line in memory. Handy in tests.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryRecorder {
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Recorder for MemoryRecorder {
    fn record(&self, level: Level, message: fmt::Arguments<'_>) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}
