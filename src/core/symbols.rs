//! Purpose: Hold the bound tdjson symbol table and the thin unsafe call layer over it.
//! Exports: `TdjsonSymbols`, `NativeModule`, `LogMessageCallbackFn`.
//! Role: The only place that dereferences native function pointers or native strings.
//! Invariants: Read-only after construction; shared across threads behind `Arc`.
//! Invariants: Native strings are copied before returning; NULL maps to `None`.
//! Invariants: The owning library stays mapped for as long as the module lives.
use crate::core::error::{Error, ErrorKind};
use libc::{c_char, c_int, c_void};
use libloading::Library;
use std::ffi::{CStr, CString};
use std::fmt;

pub type LogMessageCallbackFn = extern "C" fn(verbosity_level: c_int, message: *const c_char);

/// Entry points of the tdjson interface, both generations plus the log hook.
#[derive(Clone, Copy)]
pub struct TdjsonSymbols {
    pub json_client_create: unsafe extern "C" fn() -> *mut c_void,
    pub json_client_send: unsafe extern "C" fn(client: *mut c_void, request: *const c_char),
    pub json_client_receive:
        unsafe extern "C" fn(client: *mut c_void, timeout: f64) -> *const c_char,
    pub json_client_execute:
        unsafe extern "C" fn(client: *mut c_void, request: *const c_char) -> *const c_char,
    pub json_client_destroy: unsafe extern "C" fn(client: *mut c_void),
    pub create_client_id: unsafe extern "C" fn() -> c_int,
    pub send: unsafe extern "C" fn(client_id: c_int, request: *const c_char),
    pub receive: unsafe extern "C" fn(timeout: f64) -> *const c_char,
    pub execute: unsafe extern "C" fn(request: *const c_char) -> *const c_char,
    pub set_log_message_callback:
        unsafe extern "C" fn(max_verbosity_level: c_int, callback: Option<LogMessageCallbackFn>),
}

/// Opaque engine client pointer. The engine allows use from any thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RawClient(*mut c_void);

unsafe impl Send for RawClient {}
unsafe impl Sync for RawClient {}

impl fmt::Display for RawClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0 as usize)
    }
}

pub struct NativeModule {
    symbols: TdjsonSymbols,
    _library: Option<Library>,
}

impl NativeModule {
    /// Builds a module over symbols that live in the current process image.
    pub fn from_symbols(symbols: TdjsonSymbols) -> Self {
        Self {
            symbols,
            _library: None,
        }
    }

    pub(crate) fn from_library(library: Library, symbols: TdjsonSymbols) -> Self {
        Self {
            symbols,
            _library: Some(library),
        }
    }

    pub fn symbols(&self) -> &TdjsonSymbols {
        &self.symbols
    }

    pub(crate) fn client_create(&self) -> RawClient {
        RawClient(unsafe { (self.symbols.json_client_create)() })
    }

    pub(crate) fn client_send(&self, client: RawClient, request: &CStr) {
        unsafe { (self.symbols.json_client_send)(client.0, request.as_ptr()) }
    }

    pub(crate) fn client_receive(&self, client: RawClient, timeout: f64) -> Option<String> {
        unsafe { copy_response((self.symbols.json_client_receive)(client.0, timeout)) }
    }

    pub(crate) fn client_execute(
        &self,
        client: Option<RawClient>,
        request: &CStr,
    ) -> Option<String> {
        let client = client.map_or(std::ptr::null_mut(), |client| client.0);
        unsafe { copy_response((self.symbols.json_client_execute)(client, request.as_ptr())) }
    }

    pub(crate) fn client_destroy(&self, client: RawClient) {
        unsafe { (self.symbols.json_client_destroy)(client.0) }
    }

    pub(crate) fn create_client_id(&self) -> i32 {
        unsafe { (self.symbols.create_client_id)() }
    }

    pub(crate) fn send(&self, client_id: i32, request: &CStr) {
        unsafe { (self.symbols.send)(client_id, request.as_ptr()) }
    }

    pub(crate) fn receive(&self, timeout: f64) -> Option<String> {
        unsafe { copy_response((self.symbols.receive)(timeout)) }
    }

    pub(crate) fn execute(&self, request: &CStr) -> Option<String> {
        unsafe { copy_response((self.symbols.execute)(request.as_ptr())) }
    }

    pub(crate) fn set_log_message_callback(
        &self,
        max_verbosity_level: i32,
        callback: Option<LogMessageCallbackFn>,
    ) {
        unsafe { (self.symbols.set_log_message_callback)(max_verbosity_level, callback) }
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("dynamic", &self._library.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) fn request_cstring(request: &str) -> Result<CString, Error> {
    CString::new(request).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("request contains an interior NUL byte")
            .with_source(err)
    })
}

/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string valid for the duration of the call.
unsafe fn copy_response(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}
