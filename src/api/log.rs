//! Purpose: Process-wide registry for the engine's log message callback.
//! Exports: `LogRegistry`, `LogCallback`, `LogMessage`, `log_channel`, `tracing_callback`.
//! Role: Owns the single active sink and the `extern "C"` trampoline handed to the engine.
//! Invariants: At most one sink per process; installing replaces, `None` disables.
//! Invariants: The engine may call from any thread; panics never unwind into native code.
//! Invariants: The slot lock is never held while user code runs.
use super::lock;
use crate::core::symbols::NativeModule;
use libc::{c_char, c_int};
use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;

pub type LogCallback = Box<dyn Fn(i32, &str) + Send + Sync + 'static>;

struct LogSink {
    max_verbosity_level: i32,
    callback: Arc<dyn Fn(i32, &str) + Send + Sync + 'static>,
}

fn sink_slot() -> &'static Mutex<Option<LogSink>> {
    static SLOT: OnceLock<Mutex<Option<LogSink>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

#[derive(Clone, Debug)]
pub struct LogRegistry {
    module: Arc<NativeModule>,
}

impl LogRegistry {
    pub(crate) fn new(module: Arc<NativeModule>) -> Self {
        Self { module }
    }

    /// Routes engine log lines with `level <= max_verbosity_level` to `callback`,
    /// replacing any previous sink. `None` stops delivery entirely.
    pub fn set_log_message_callback(
        &self,
        max_verbosity_level: i32,
        callback: Option<LogCallback>,
    ) {
        match callback {
            Some(callback) => {
                *lock(sink_slot()) = Some(LogSink {
                    max_verbosity_level,
                    callback: Arc::from(callback),
                });
                self.module
                    .set_log_message_callback(max_verbosity_level, Some(dispatch_log_message));
                tracing::debug!(max_verbosity_level, "installed log message callback");
            }
            None => {
                self.module.set_log_message_callback(0, None);
                *lock(sink_slot()) = None;
                tracing::debug!("removed log message callback");
            }
        }
    }
}

extern "C" fn dispatch_log_message(verbosity_level: c_int, message: *const c_char) {
    if message.is_null() {
        return;
    }
    let callback = match lock(sink_slot()).as_ref() {
        Some(sink) if verbosity_level <= sink.max_verbosity_level => Arc::clone(&sink.callback),
        _ => return,
    };
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(verbosity_level, &message)));
    if outcome.is_err() {
        tracing::error!(verbosity_level, "log message callback panicked");
    }
}

/// One engine log line, detached from the engine thread that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogMessage {
    pub verbosity_level: i32,
    pub message: String,
}

/// Callback that forwards log lines into a channel so the host consumes them
/// on its own task instead of the engine's thread.
pub fn log_channel() -> (LogCallback, mpsc::UnboundedReceiver<LogMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: LogCallback = Box::new(move |verbosity_level, message| {
        let _ = tx.send(LogMessage {
            verbosity_level,
            message: message.to_string(),
        });
    });
    (callback, rx)
}

/// Callback that re-emits engine log lines as `tracing` events.
pub fn tracing_callback() -> LogCallback {
    Box::new(|verbosity_level, message| match verbosity_level {
        i32::MIN..=1 => tracing::error!(target: "tdjson", verbosity_level, "{message}"),
        2 => tracing::warn!(target: "tdjson", verbosity_level, "{message}"),
        3 => tracing::info!(target: "tdjson", verbosity_level, "{message}"),
        4 => tracing::debug!(target: "tdjson", verbosity_level, "{message}"),
        _ => tracing::trace!(target: "tdjson", verbosity_level, "{message}"),
    })
}
