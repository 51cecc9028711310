//! Purpose: Load tdjson once per process and hand out the bound interfaces.
//! Exports: `Adapter`, `Tdjson`, `load`.
//! Role: Facade composing the legacy registry, the multiplexer, and the log registry.
//! Invariants: At most one successful load per `Adapter`; `Adapter::global` is per process.
//! Invariants: Reusing an existing load shares its native state and receive stream.
//! Invariants: A failed load leaves the adapter unloaded.
#![allow(clippy::result_large_err)]

use super::legacy::LegacyClients;
use super::lock;
use super::log::{LogCallback, LogRegistry};
use super::multiplexer::{Multiplexer, MultiplexerState};
use crate::core::error::{Error, ErrorKind};
use crate::core::library::{DylibLoader, LibraryLoader};
use crate::core::symbols::NativeModule;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A loaded tdjson library.
#[derive(Clone, Debug)]
pub struct Tdjson {
    legacy: LegacyClients,
    multiplexer: Multiplexer,
    log: LogRegistry,
}

impl Tdjson {
    fn bind(module: NativeModule) -> Self {
        let module = Arc::new(module);
        Self {
            legacy: LegacyClients::new(Arc::clone(&module)),
            multiplexer: Multiplexer::new(Arc::clone(&module), Arc::new(MultiplexerState::new())),
            log: LogRegistry::new(module),
        }
    }

    /// `td_json_client_*` interface.
    pub fn legacy(&self) -> &LegacyClients {
        &self.legacy
    }

    /// `td_create_client_id` / `td_send` / `td_receive` interface.
    pub fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    pub fn set_log_message_callback(
        &self,
        max_verbosity_level: i32,
        callback: Option<LogCallback>,
    ) {
        self.log.set_log_message_callback(max_verbosity_level, callback);
    }
}

#[derive(Debug, Default)]
pub struct Adapter {
    loaded: Mutex<Option<Tdjson>>,
}

impl Adapter {
    pub const fn new() -> Self {
        Self {
            loaded: Mutex::new(None),
        }
    }

    /// The adapter backing [`load`].
    pub fn global() -> &'static Adapter {
        static GLOBAL: Adapter = Adapter::new();
        &GLOBAL
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.loaded).is_some()
    }

    /// Loads `path` through `loader`. When a library is already loaded this
    /// fails with `AlreadyLoaded`, unless `ignore_already_loaded` is set, in
    /// which case the existing library is returned and `path` is not opened.
    pub fn load_with<L>(
        &self,
        loader: &L,
        path: impl AsRef<Path>,
        ignore_already_loaded: bool,
    ) -> Result<Tdjson, Error>
    where
        L: LibraryLoader + ?Sized,
    {
        let path = path.as_ref();
        let mut loaded = lock(&self.loaded);
        if let Some(existing) = loaded.as_ref() {
            if !ignore_already_loaded {
                tracing::warn!(path = %path.display(), "refusing to load tdjson twice");
                return Err(Error::new(ErrorKind::AlreadyLoaded)
                    .with_message("tdjson is already loaded")
                    .with_path(path)
                    .with_hint("Pass ignore_already_loaded to reuse the loaded library."));
            }
            tracing::debug!(path = %path.display(), "reusing loaded tdjson");
            return Ok(existing.clone());
        }
        let tdjson = Tdjson::bind(loader.open(path)?);
        *loaded = Some(tdjson.clone());
        tracing::debug!(path = %path.display(), "loaded tdjson");
        Ok(tdjson)
    }
}

/// Loads the tdjson shared library at `path` into this process.
pub fn load(path: impl AsRef<Path>, ignore_already_loaded: bool) -> Result<Tdjson, Error> {
    Adapter::global().load_with(&DylibLoader, path, ignore_already_loaded)
}

#[cfg(test)]
mod tests {
    use super::Adapter;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::library::LibraryLoader;
    use crate::core::symbols::{NativeModule, stub};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLoader {
        opens: AtomicUsize,
    }

    impl LibraryLoader for CountingLoader {
        fn open(&self, _path: &Path) -> Result<NativeModule, Error> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(NativeModule::from_symbols(stub::symbols()))
        }
    }

    struct FailingLoader;

    impl LibraryLoader for FailingLoader {
        fn open(&self, path: &Path) -> Result<NativeModule, Error> {
            Err(Error::new(ErrorKind::LoadFailure).with_path(path))
        }
    }

    #[test]
    fn second_load_is_refused_without_opening() {
        let adapter = Adapter::new();
        let loader = CountingLoader::default();
        adapter.load_with(&loader, "libtdjson.so", false).expect("first");
        let err = adapter
            .load_with(&loader, "libtdjson.so", false)
            .expect_err("second");
        assert_eq!(err.kind(), ErrorKind::AlreadyLoaded);
        assert_eq!(loader.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ignore_already_loaded_reuses_module() {
        let adapter = Adapter::new();
        let loader = CountingLoader::default();
        adapter.load_with(&loader, "libtdjson.so", false).expect("first");
        let again = adapter
            .load_with(&loader, "/elsewhere/libtdjson.so", true)
            .expect("second");
        assert_eq!(loader.opens.load(Ordering::SeqCst), 1);
        let response = again.legacy().execute(None, "{}").expect("execute");
        assert!(response.is_some());
    }

    #[test]
    fn failed_load_leaves_adapter_unloaded() {
        let adapter = Adapter::new();
        let err = adapter
            .load_with(&FailingLoader, "missing.so", false)
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::LoadFailure);
        assert!(!adapter.is_loaded());
        adapter
            .load_with(&CountingLoader::default(), "libtdjson.so", false)
            .expect("retry");
        assert!(adapter.is_loaded());
    }
}
