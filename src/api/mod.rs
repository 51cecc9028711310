//! Purpose: Define the public Rust API for driving a loaded tdjson library.
//! Exports: Facade, both client generations, log registry, and error types.
//! Role: Public, additive-only surface used by the `tdjson` CLI and embedders.
//! Invariants: Raw symbol calls stay in `core::symbols`; nothing here is `unsafe`.
//! Invariants: Payloads cross this boundary as opaque strings.

mod adapter;
mod legacy;
mod log;
mod multiplexer;
mod receive;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::library::{DylibLoader, LibraryLoader, default_library_file};
pub use crate::core::symbols::{LogMessageCallbackFn, NativeModule, TdjsonSymbols};
pub use adapter::{Adapter, Tdjson, load};
pub use legacy::{LegacyClients, LegacyHandle};
pub use log::{LogCallback, LogMessage, log_channel, tracing_callback};
pub use multiplexer::{ClientId, Multiplexer};
pub use receive::PendingReceive;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, ignoring poison.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
