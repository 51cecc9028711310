//! Purpose: Multiplex many client ids over the engine's single `td_receive` stream.
//! Exports: `Multiplexer`, `ClientId`.
//! Role: New-generation interface of the adapter; one shared state per loaded module.
//! Invariants: `init` precedes `create_client_id`, `send`, and `receive`.
//! Invariants: At most one receive in flight for the whole multiplexer.
//! Invariants: Unreferenced multiplexers never hold the host open on a pending receive.
//! Invariants: Payloads of abandoned receives are returned, in order, by later receives.
#![allow(clippy::result_large_err)]

use super::lock;
use super::receive::{PendingReceive, spawn_receive};
use crate::core::error::{Error, ErrorKind};
use crate::core::symbols::{NativeModule, request_cstring};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Engine-assigned identity of one multiplexed client. Never destroyed by the adapter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ClientId(i32);

impl ClientId {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<ClientId> for i32 {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug)]
struct Activity {
    referenced: bool,
    receiving: bool,
}

impl Activity {
    fn keeps_host_alive(self) -> bool {
        self.referenced && self.receiving
    }
}

#[derive(Debug)]
pub(crate) struct MultiplexerState {
    receive_timeout: Mutex<Option<Duration>>,
    undelivered: Mutex<VecDeque<String>>,
    activity: watch::Sender<Activity>,
}

impl MultiplexerState {
    pub(crate) fn new() -> Self {
        let (activity, _) = watch::channel(Activity {
            referenced: true,
            receiving: false,
        });
        Self {
            receive_timeout: Mutex::new(None),
            undelivered: Mutex::new(VecDeque::new()),
            activity,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Multiplexer {
    module: Arc<NativeModule>,
    state: Arc<MultiplexerState>,
}

impl Multiplexer {
    pub(crate) fn new(module: Arc<NativeModule>, state: Arc<MultiplexerState>) -> Self {
        Self { module, state }
    }

    /// Sets the receive timeout shared by every client id. Calling it again
    /// replaces the timeout for subsequent receives.
    pub fn init(&self, receive_timeout: Duration) {
        *lock(&self.state.receive_timeout) = Some(receive_timeout);
        tracing::debug!(?receive_timeout, "initialized tdjson multiplexer");
    }

    /// Lets a pending receive hold the host open (the default).
    pub fn reference(&self) {
        self.state.activity.send_modify(|activity| activity.referenced = true);
    }

    /// Lets the host exit even while a receive is pending.
    pub fn unreference(&self) {
        self.state.activity.send_modify(|activity| activity.referenced = false);
    }

    pub fn is_referenced(&self) -> bool {
        self.state.activity.borrow().referenced
    }

    pub fn is_receiving(&self) -> bool {
        self.state.activity.borrow().receiving
    }

    pub fn create_client_id(&self) -> Result<ClientId, Error> {
        self.receive_timeout()?;
        let id = ClientId(self.module.create_client_id());
        tracing::debug!(client_id = id.0, "created client id");
        Ok(id)
    }

    pub fn send(&self, client_id: ClientId, request: &str) -> Result<(), Error> {
        self.receive_timeout()?;
        let request = request_cstring(request)?;
        self.module.send(client_id.0, &request);
        Ok(())
    }

    /// Starts the next receive on the stream shared by all client ids. The
    /// payload itself names the client it belongs to. A payload left behind by
    /// a dropped receive is returned first, without calling the engine.
    pub fn receive(&self) -> Result<PendingReceive, Error> {
        let timeout = self.receive_timeout()?.as_secs_f64();
        let guard = ReceiveGuard::acquire(&self.state)?;
        let kept = lock(&self.state.undelivered).pop_front();
        if let Some(payload) = kept {
            drop(guard);
            return Ok(PendingReceive::ready(payload));
        }
        let module = Arc::clone(&self.module);
        let state = Arc::clone(&self.state);
        spawn_receive(
            "tdjson-receive",
            guard,
            move || module.receive(timeout),
            move |payload| {
                tracing::debug!("kept payload of a dropped receive");
                lock(&state.undelivered).push_back(payload);
            },
        )
    }

    /// Synchronous global request/response; blocks the calling thread.
    pub fn execute(&self, request: &str) -> Result<Option<String>, Error> {
        let request = request_cstring(request)?;
        Ok(self.module.execute(&request))
    }

    /// Host exit check. Resolves once no referenced receive is outstanding.
    pub async fn wait_idle(&self) {
        let mut activity = self.state.activity.subscribe();
        let _ = activity
            .wait_for(|activity| !activity.keeps_host_alive())
            .await;
    }

    fn receive_timeout(&self) -> Result<Duration, Error> {
        lock(&self.state.receive_timeout).ok_or_else(|| {
            Error::new(ErrorKind::NotInitialized)
                .with_message("multiplexer is not initialized")
                .with_hint("Call init with a receive timeout first.")
        })
    }
}

struct ReceiveGuard {
    state: Arc<MultiplexerState>,
}

impl ReceiveGuard {
    fn acquire(state: &Arc<MultiplexerState>) -> Result<Self, Error> {
        let acquired = state.activity.send_if_modified(|activity| {
            if activity.receiving {
                return false;
            }
            activity.receiving = true;
            true
        });
        if !acquired {
            return Err(Error::new(ErrorKind::ConcurrentReceive)
                .with_message("a receive is already pending on the shared stream")
                .with_hint("Await the previous receive before calling receive again."));
        }
        Ok(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ReceiveGuard {
    fn drop(&mut self) {
        self.state
            .activity
            .send_modify(|activity| activity.receiving = false);
    }
}
