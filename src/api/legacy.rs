//! Purpose: Drive independent tdjson clients through the legacy `td_json_client_*` interface.
//! Exports: `LegacyClients`, `LegacyHandle`.
//! Role: Legacy generation of the adapter; one receive stream per handle.
//! Invariants: At most one receive in flight per handle; a second one is `ConcurrentReceive`.
//! Invariants: Handles are destroyed only by `destroy`, never on drop.
//! Invariants: A destroy issued during a pending receive runs after that receive returns.
//! Invariants: Payloads of abandoned receives are returned, in order, by later receives.
#![allow(clippy::result_large_err)]

use super::lock;
use super::receive::{PendingReceive, spawn_receive};
use crate::core::error::{Error, ErrorKind};
use crate::core::symbols::{NativeModule, RawClient, request_cstring};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct LegacyClients {
    module: Arc<NativeModule>,
}

/// Opaque engine client. Consumed by [`LegacyClients::destroy`].
pub struct LegacyHandle {
    cell: Arc<ClientCell>,
}

struct ClientCell {
    raw: RawClient,
    receive_timeout: Duration,
    state: Mutex<StreamState>,
}

#[derive(Default)]
struct StreamState {
    receiving: bool,
    destroy_requested: bool,
    undelivered: VecDeque<String>,
}

impl LegacyHandle {
    pub fn receive_timeout(&self) -> Duration {
        self.cell.receive_timeout
    }

    /// True while a receive issued on this handle has not returned from the engine.
    pub fn is_receiving(&self) -> bool {
        lock(&self.cell.state).receiving
    }
}

impl fmt::Debug for LegacyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyHandle")
            .field("client", &format_args!("{}", self.cell.raw))
            .field("receive_timeout", &self.cell.receive_timeout)
            .finish()
    }
}

impl LegacyClients {
    pub(crate) fn new(module: Arc<NativeModule>) -> Self {
        Self { module }
    }

    pub fn create(&self, receive_timeout: Duration) -> LegacyHandle {
        let raw = self.module.client_create();
        tracing::debug!(client = %raw, ?receive_timeout, "created legacy client");
        LegacyHandle {
            cell: Arc::new(ClientCell {
                raw,
                receive_timeout,
                state: Mutex::new(StreamState::default()),
            }),
        }
    }

    /// Enqueues `request` without waiting for an answer. Engine-side failures
    /// surface later as receive payloads.
    pub fn send(&self, handle: &LegacyHandle, request: &str) -> Result<(), Error> {
        let request = request_cstring(request)?;
        self.module.client_send(handle.cell.raw, &request);
        Ok(())
    }

    /// Starts the next receive on `handle`. The native call blocks a worker
    /// thread for at most the handle's receive timeout. A payload left behind
    /// by a dropped receive is returned first, without calling the engine.
    pub fn receive(&self, handle: &LegacyHandle) -> Result<PendingReceive, Error> {
        let guard = ReceiveGuard::acquire(&self.module, &handle.cell)?;
        let kept = lock(&handle.cell.state).undelivered.pop_front();
        if let Some(payload) = kept {
            drop(guard);
            return Ok(PendingReceive::ready(payload));
        }
        let module = Arc::clone(&self.module);
        let cell = Arc::clone(&handle.cell);
        let raw = handle.cell.raw;
        let timeout = handle.cell.receive_timeout.as_secs_f64();
        spawn_receive(
            "tdjson-client-receive",
            guard,
            move || module.client_receive(raw, timeout),
            move |payload| {
                tracing::debug!(client = %cell.raw, "kept payload of a dropped receive");
                lock(&cell.state).undelivered.push_back(payload);
            },
        )
    }

    /// Synchronous request/response. Blocks the calling thread for the whole
    /// native call. Without a handle the request runs against engine-global state.
    pub fn execute(
        &self,
        handle: Option<&LegacyHandle>,
        request: &str,
    ) -> Result<Option<String>, Error> {
        let request = request_cstring(request)?;
        let raw = handle.map(|handle| handle.cell.raw);
        Ok(self.module.client_execute(raw, &request))
    }

    pub fn destroy(&self, handle: LegacyHandle) {
        let mut state = lock(&handle.cell.state);
        if state.receiving {
            state.destroy_requested = true;
            tracing::warn!(
                client = %handle.cell.raw,
                "destroy deferred until the pending receive returns"
            );
            return;
        }
        drop(state);
        self.module.client_destroy(handle.cell.raw);
        tracing::debug!(client = %handle.cell.raw, "destroyed legacy client");
    }
}

struct ReceiveGuard {
    module: Arc<NativeModule>,
    cell: Arc<ClientCell>,
}

impl ReceiveGuard {
    fn acquire(module: &Arc<NativeModule>, cell: &Arc<ClientCell>) -> Result<Self, Error> {
        let mut state = lock(&cell.state);
        if state.receiving {
            return Err(Error::new(ErrorKind::ConcurrentReceive)
                .with_message("a receive is already pending for this client")
                .with_hint("Await the previous receive before calling receive again."));
        }
        state.receiving = true;
        Ok(Self {
            module: Arc::clone(module),
            cell: Arc::clone(cell),
        })
    }
}

impl Drop for ReceiveGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.cell.state);
        state.receiving = false;
        if state.destroy_requested {
            state.destroy_requested = false;
            drop(state);
            self.module.client_destroy(self.cell.raw);
            tracing::debug!(client = %self.cell.raw, "destroyed legacy client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LegacyClients;
    use crate::core::error::ErrorKind;
    use crate::core::symbols::{NativeModule, stub};
    use std::sync::Arc;
    use std::time::Duration;

    fn clients() -> LegacyClients {
        LegacyClients::new(Arc::new(NativeModule::from_symbols(stub::symbols())))
    }

    #[test]
    fn handle_keeps_receive_timeout() {
        let clients = clients();
        let handle = clients.create(Duration::from_millis(1500));
        assert_eq!(handle.receive_timeout(), Duration::from_millis(1500));
        assert!(!handle.is_receiving());
        clients.destroy(handle);
    }

    #[test]
    fn send_rejects_interior_nul() {
        let clients = clients();
        let handle = clients.create(Duration::from_secs(1));
        let err = clients.send(&handle, "a\0b").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        clients.destroy(handle);
    }

    #[test]
    fn execute_without_handle_reaches_engine() {
        let clients = clients();
        let response = clients.execute(None, "{}").expect("execute");
        assert_eq!(response.as_deref(), Some("{\"@type\":\"ok\"}"));
    }
}
