// In-process stand-in for tdjson, wired through `NativeModule::from_symbols`.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use libc::{c_char, c_int, c_void};
use serde_json::{Value, json};
use tdjson_adapter::api::{
    Adapter, Error, LibraryLoader, LogMessageCallbackFn, NativeModule, Tdjson, TdjsonSymbols,
};

struct Queue {
    items: Mutex<VecDeque<String>>,
    ready: Condvar,
}

impl Queue {
    const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn push(&self, item: String) {
        self.items.lock().expect("queue").push_back(item);
        self.ready.notify_all();
    }

    fn pop(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock().expect("queue");
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            items = self.ready.wait_timeout(items, deadline - now).expect("queue").0;
        }
    }

    fn clear(&self) {
        self.items.lock().expect("queue").clear();
    }
}

struct FakeClient {
    id: usize,
    queue: Queue,
}

static NEXT_CLIENT: AtomicUsize = AtomicUsize::new(1);
static NEXT_CLIENT_ID: AtomicI32 = AtomicI32::new(1);
static SHARED: Queue = Queue::new();
static DESTROYED: Mutex<Option<HashSet<usize>>> = Mutex::new(None);
static LOG_HOOK: Mutex<Option<(c_int, LogMessageCallbackFn)>> = Mutex::new(None);

thread_local! {
    static LAST_RESPONSE: RefCell<CString> = RefCell::new(CString::default());
}

/// Mirrors tdjson: the returned string stays valid until the next call on this thread.
fn hand_out(response: String) -> *const c_char {
    LAST_RESPONSE.with(|slot| {
        *slot.borrow_mut() = CString::new(response).expect("response without NUL");
        slot.borrow().as_ptr()
    })
}

fn request_text(request: *const c_char) -> String {
    unsafe { CStr::from_ptr(request) }.to_string_lossy().into_owned()
}

fn execute_request(scope: Value, request: &str) -> String {
    let parsed: Value = serde_json::from_str(request).unwrap_or(Value::Null);
    match parsed.get("@type").and_then(Value::as_str) {
        Some("addLogMessage") => {
            let level = parsed
                .get("verbosity_level")
                .and_then(Value::as_i64)
                .unwrap_or(0) as c_int;
            let text = parsed.get("text").and_then(Value::as_str).unwrap_or("");
            emit_log(level, text);
            json!({ "@type": "ok" }).to_string()
        }
        Some("whoami") => json!({ "@type": "scope", "scope": scope }).to_string(),
        _ => json!({ "@type": "error", "code": 400, "message": "unsupported", "scope": scope })
            .to_string(),
    }
}

extern "C" fn json_client_create() -> *mut c_void {
    let client = Box::new(FakeClient {
        id: NEXT_CLIENT.fetch_add(1, Ordering::SeqCst),
        queue: Queue::new(),
    });
    Box::into_raw(client) as *mut c_void
}

extern "C" fn json_client_send(client: *mut c_void, request: *const c_char) {
    let client = unsafe { &*(client as *const FakeClient) };
    let request = request_text(request);
    client
        .queue
        .push(format!("{{\"@type\":\"echo\",\"client\":{},\"request\":{request}}}", client.id));
}

extern "C" fn json_client_receive(client: *mut c_void, timeout: f64) -> *const c_char {
    let client = unsafe { &*(client as *const FakeClient) };
    match client.queue.pop(Duration::from_secs_f64(timeout)) {
        Some(response) => hand_out(response),
        None => std::ptr::null(),
    }
}

extern "C" fn json_client_execute(client: *mut c_void, request: *const c_char) -> *const c_char {
    let scope = if client.is_null() {
        json!("global")
    } else {
        json!(unsafe { &*(client as *const FakeClient) }.id)
    };
    hand_out(execute_request(scope, &request_text(request)))
}

extern "C" fn json_client_destroy(client: *mut c_void) {
    let client = unsafe { Box::from_raw(client as *mut FakeClient) };
    DESTROYED
        .lock()
        .expect("destroyed")
        .get_or_insert_with(HashSet::new)
        .insert(client.id);
}

extern "C" fn create_client_id() -> c_int {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst)
}

extern "C" fn send(client_id: c_int, request: *const c_char) {
    let request = request_text(request);
    SHARED.push(format!(
        "{{\"@type\":\"echo\",\"@client_id\":{client_id},\"request\":{request}}}"
    ));
}

extern "C" fn receive(timeout: f64) -> *const c_char {
    match SHARED.pop(Duration::from_secs_f64(timeout)) {
        Some(response) => hand_out(response),
        None => std::ptr::null(),
    }
}

extern "C" fn execute(request: *const c_char) -> *const c_char {
    hand_out(execute_request(json!("global"), &request_text(request)))
}

extern "C" fn set_log_message_callback(
    max_verbosity_level: c_int,
    callback: Option<LogMessageCallbackFn>,
) {
    *LOG_HOOK.lock().expect("log hook") = callback.map(|callback| (max_verbosity_level, callback));
}

/// Delivers a log line to the registered hook. Every line is forwarded
/// regardless of level so that filtering is observed on the adapter side.
pub fn emit_log(level: c_int, text: &str) {
    let hook = *LOG_HOOK.lock().expect("log hook");
    if let Some((_, callback)) = hook {
        let text = CString::new(text).expect("log text");
        callback(level, text.as_ptr());
    }
}

pub fn emit_log_from_engine_thread(level: c_int, text: &str) {
    let text = text.to_string();
    std::thread::spawn(move || emit_log(level, &text))
        .join()
        .expect("engine thread");
}

pub fn log_hook_installed() -> bool {
    LOG_HOOK.lock().expect("log hook").is_some()
}

pub fn is_destroyed(client: u64) -> bool {
    DESTROYED
        .lock()
        .expect("destroyed")
        .as_ref()
        .is_some_and(|ids| ids.contains(&(client as usize)))
}

pub fn clear_shared_stream() {
    SHARED.clear();
}

pub fn symbols() -> TdjsonSymbols {
    TdjsonSymbols {
        json_client_create,
        json_client_send,
        json_client_receive,
        json_client_execute,
        json_client_destroy,
        create_client_id,
        send,
        receive,
        execute,
        set_log_message_callback,
    }
}

#[derive(Default)]
pub struct FakeLoader {
    pub opens: AtomicUsize,
}

impl LibraryLoader for FakeLoader {
    fn open(&self, _path: &Path) -> Result<NativeModule, Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(NativeModule::from_symbols(symbols()))
    }
}

pub fn load() -> Tdjson {
    Adapter::new()
        .load_with(&FakeLoader::default(), "libtdjson.so", false)
        .expect("load fake tdjson")
}

/// Serializes tests that touch process-wide engine state.
pub fn serial() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn parse(payload: &str) -> Value {
    serde_json::from_str(payload).expect("valid json")
}
