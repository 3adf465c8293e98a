//! One-shot listeners over socket events.
//!
//! A listener is a predicate plus a oneshot channel. The first event the
//! predicate accepts resolves it and removes it. When the socket fails or
//! closes, every remaining listener resolves with that error, so no waiter
//! outlives its socket.

use tokio::sync::oneshot;

use super::transport::SocketEvent;
use crate::error::FeedError;

type Predicate = Box<dyn FnMut(&SocketEvent) -> bool + Send>;
/// Callback run by the dispatching task when a listener matches.
pub type OnMatch = Box<dyn FnOnce() + Send>;

struct Listener {
    predicate: Predicate,
    on_match: Option<OnMatch>,
    tx: oneshot::Sender<Result<SocketEvent, FeedError>>,
}

/// Pending listeners of one connection.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<Listener>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("pending", &self.entries.len()).finish()
    }
}

impl Listeners {
    /// Register a listener.
    ///
    /// `on_match` runs on the dispatching task, before any later event is
    /// looked at. It never runs if the returned [`Listen`] was dropped first.
    pub fn register<P>(&mut self, predicate: P, on_match: Option<OnMatch>) -> Listen
    where
        P: FnMut(&SocketEvent) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.entries.push(Listener {
            predicate: Box::new(predicate),
            on_match,
            tx,
        });
        Listen { rx }
    }

    /// Offer `event` to every listener in registration order. Returns how
    /// many resolved.
    pub fn dispatch(&mut self, event: &SocketEvent) -> usize {
        let mut fired = 0;
        let mut i = 0;
        while i < self.entries.len() {
            let entry = &mut self.entries[i];
            if entry.tx.is_closed() {
                self.entries.remove(i);
                continue;
            }
            if !(entry.predicate)(event) {
                i += 1;
                continue;
            }

            let listener = self.entries.remove(i);
            if let Some(on_match) = listener.on_match {
                on_match();
            }
            let _ = listener.tx.send(Ok(event.clone()));
            fired += 1;
        }
        fired
    }

    /// Resolve every remaining listener with `error`.
    pub fn fail_all(&mut self, error: &FeedError) {
        for listener in self.entries.drain(..) {
            let _ = listener.tx.send(Err(error.clone()));
        }
    }

    /// Number of listeners still pending.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receiving side of a registered listener.
#[derive(Debug)]
pub struct Listen {
    rx: oneshot::Receiver<Result<SocketEvent, FeedError>>,
}

impl Listen {
    /// Wait for the matching event or the socket's failure.
    pub async fn wait(self) -> Result<SocketEvent, FeedError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(FeedError::Connection("listener dropped".to_string())))
    }
}
