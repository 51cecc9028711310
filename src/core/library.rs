//! Purpose: Open a tdjson shared object and bind its symbol table.
//! Exports: `LibraryLoader`, `DylibLoader`, `default_library_file`.
//! Role: Seam between the adapter and whatever produces a `NativeModule`.
//! Invariants: Every required symbol resolves or the whole load fails with `LoadFailure`.
//! Invariants: Loading never touches adapter state; the "already loaded" guard lives above.
use crate::core::error::{Error, ErrorKind};
use crate::core::symbols::{NativeModule, TdjsonSymbols};
use libloading::{Library, Symbol};
use std::ffi::OsString;
use std::path::Path;

pub trait LibraryLoader {
    fn open(&self, path: &Path) -> Result<NativeModule, Error>;
}

/// Loads tdjson with `libloading` (dlopen / LoadLibrary).
#[derive(Clone, Copy, Debug, Default)]
pub struct DylibLoader;

impl LibraryLoader for DylibLoader {
    fn open(&self, path: &Path) -> Result<NativeModule, Error> {
        let library = unsafe { Library::new(path) }.map_err(|err| {
            Error::new(ErrorKind::LoadFailure)
                .with_message("failed to load tdjson")
                .with_path(path)
                .with_hint("Check that the file exists and matches this platform and architecture.")
                .with_source(err)
        })?;
        let symbols = bind_symbols(&library, path)?;
        tracing::debug!(path = %path.display(), "bound tdjson symbols");
        Ok(NativeModule::from_library(library, symbols))
    }
}

/// Platform file name of the tdjson shared library, e.g. `libtdjson.so`.
pub fn default_library_file() -> OsString {
    libloading::library_filename("tdjson")
}

fn bind_symbols(library: &Library, path: &Path) -> Result<TdjsonSymbols, Error> {
    Ok(TdjsonSymbols {
        json_client_create: lookup(library, path, "td_json_client_create")?,
        json_client_send: lookup(library, path, "td_json_client_send")?,
        json_client_receive: lookup(library, path, "td_json_client_receive")?,
        json_client_execute: lookup(library, path, "td_json_client_execute")?,
        json_client_destroy: lookup(library, path, "td_json_client_destroy")?,
        create_client_id: lookup(library, path, "td_create_client_id")?,
        send: lookup(library, path, "td_send")?,
        receive: lookup(library, path, "td_receive")?,
        execute: lookup(library, path, "td_execute")?,
        set_log_message_callback: lookup(library, path, "td_set_log_message_callback")?,
    })
}

/// Copies a function pointer out of `library`. The caller keeps `library` alive
/// alongside the returned pointer.
fn lookup<T: Copy>(library: &Library, path: &Path, name: &str) -> Result<T, Error> {
    let symbol: Symbol<T> = unsafe { library.get(name.as_bytes()) }.map_err(|err| {
        Error::new(ErrorKind::LoadFailure)
            .with_message(format!("missing symbol {name}"))
            .with_path(path)
            .with_hint("The library does not look like a tdjson build.")
            .with_source(err)
    })?;
    Ok(*symbol)
}
