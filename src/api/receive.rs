//! Purpose: Run one blocking native receive on a worker thread and expose it as a future.
//! Exports: `PendingReceive`.
//! Role: Shared by the legacy and multiplexed receive streams.
//! Invariants: The stream's in-flight guard is released before the result is delivered.
//! Invariants: Workers are detached; an abandoned receive never blocks shutdown.
//! Invariants: A payload whose future was dropped is handed to `keep`, never discarded.
use crate::core::error::{Error, ErrorKind};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves to the next payload on a receive stream, or `None` when the
/// engine's receive timeout elapsed with nothing available.
#[must_use = "the stream stays busy until the native receive returns"]
#[derive(Debug)]
pub struct PendingReceive {
    rx: oneshot::Receiver<Option<String>>,
}

impl Future for PendingReceive {
    type Output = Result<Option<String>, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("receive worker exited without a result")
                    .with_source(err)
            })
        })
    }
}

impl PendingReceive {
    /// Already resolved with a payload kept from an abandoned receive.
    pub(crate) fn ready(payload: String) -> Self {
        let (tx, rx) = oneshot::channel();
        tx.send(Some(payload)).ok();
        Self { rx }
    }
}

/// Runs `receive` on a worker thread. If the caller dropped its
/// `PendingReceive` by the time a payload arrives, the payload goes to `keep`
/// so the stream's next receive can return it.
pub(crate) fn spawn_receive<G, F, K>(
    thread_name: &str,
    guard: G,
    receive: F,
    keep: K,
) -> Result<PendingReceive, Error>
where
    G: Send + 'static,
    F: FnOnce() -> Option<String> + Send + 'static,
    K: FnOnce(String) + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let response = receive();
            if tx.is_closed() {
                // Kept before release so the next receive sees it.
                if let Some(payload) = response {
                    keep(payload);
                }
                drop(guard);
                return;
            }
            drop(guard);
            if let Err(Some(payload)) = tx.send(response) {
                keep(payload);
            }
        })
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to spawn receive worker")
                .with_source(err)
        })?;
    Ok(PendingReceive { rx })
}
