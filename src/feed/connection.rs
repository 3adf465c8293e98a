//! Single socket connection to the book feed.
//!
//! Owns the socket lifecycle and the per-connection subscription identity:
//! which product is active and the router delivering its frames. A dispatch
//! task per socket offers every event to the pending listeners first and
//! then to the active router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::codec::Command;
use super::listeners::{Listen, Listeners, OnMatch};
use super::router::MessageRouter;
use super::transport::{Connector, Outgoing, SocketEvent, TungsteniteConnector};
use crate::error::FeedError;
use crate::metrics;
use crate::orderbook::ProductId;

/// Default wait for the close handshake.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// Never opened, or dropped after an error.
    Disconnected,
    /// Opening.
    Connecting,
    /// Open.
    Connected,
    /// Close handshake in progress.
    Closing,
    /// Closed.
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the dispatch task.
struct Shared {
    state: Mutex<ConnectionState>,
    epoch: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    listeners: Mutex<Listeners>,
    product_id: Mutex<Option<ProductId>>,
    router: Mutex<Option<MessageRouter>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            epoch: AtomicU64::new(0),
            task: Mutex::new(None),
            outgoing: Mutex::new(None),
            listeners: Mutex::new(Listeners::default()),
            product_id: Mutex::new(None),
            router: Mutex::new(None),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!(from = %*current, to = %state, "Connection state changed");
            *current = state;
        }
    }

    fn clear_subscription(&self) {
        *lock(&self.router) = None;
        *lock(&self.product_id) = None;
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Drop the socket of `epoch` and land in `state`. A no-op once the
    /// epoch is retired.
    ///
    /// Retires the epoch and stops its dispatch task, so nothing the old
    /// socket still delivers reaches the listeners or router of a later one.
    fn teardown(&self, epoch: u64, state: ConnectionState) {
        if self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        *lock(&self.outgoing) = None;
        self.clear_subscription();
        self.set_state(state);
    }
}

async fn dispatch(shared: Arc<Shared>, epoch: u64, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            SocketEvent::Message(text) => {
                metrics::inc_frames_received();
                {
                    let mut listeners = lock(&shared.listeners);
                    if !shared.is_current(epoch) {
                        return;
                    }
                    listeners.dispatch(&event);
                }
                let mut router = lock(&shared.router);
                if !shared.is_current(epoch) {
                    return;
                }
                if let Some(router) = router.as_mut() {
                    router.route(text);
                }
            }
            SocketEvent::Error(reason) => {
                error!(error = %reason, "Feed socket error");
                {
                    let mut listeners = lock(&shared.listeners);
                    if !shared.is_current(epoch) {
                        return;
                    }
                    listeners.dispatch(&event);
                    listeners.fail_all(&FeedError::Connection(reason.clone()));
                }
                shared.teardown(epoch, ConnectionState::Disconnected);
                return;
            }
            SocketEvent::Closed { code, reason } => {
                info!(code = ?code, reason = %reason, "Feed socket closed");
                {
                    let mut listeners = lock(&shared.listeners);
                    if !shared.is_current(epoch) {
                        return;
                    }
                    listeners.dispatch(&event);
                    listeners.fail_all(&FeedError::ConnectionClosed {
                        code: *code,
                        reason: reason.clone(),
                    });
                }
                shared.teardown(epoch, ConnectionState::Closed);
                return;
            }
        }
    }

    let mut listeners = lock(&shared.listeners);
    if !shared.is_current(epoch) {
        return;
    }
    warn!("Feed event stream ended without a close");
    listeners.fail_all(&FeedError::ConnectionClosed {
        code: None,
        reason: "event stream ended".to_string(),
    });
    drop(listeners);
    shared.teardown(epoch, ConnectionState::Disconnected);
}

/// One socket to the feed, plus the subscription identity bound to it.
pub struct FeedConnection {
    url: String,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<()>,
    close_timeout: Duration,
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("product_id", &self.product_id())
            .finish()
    }
}

impl FeedConnection {
    /// Connection to `url` over tokio-tungstenite.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_connector(url, Arc::new(TungsteniteConnector))
    }

    /// Connection using a custom transport.
    pub fn with_connector(url: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            url: url.into(),
            connector,
            shared: Arc::new(Shared::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Override the close handshake timeout.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Feed URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether there is no socket (never opened, failed, or closed).
    pub fn is_closed(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Closed
        )
    }

    /// Product whose subscription is confirmed on this socket.
    pub fn product_id(&self) -> Option<ProductId> {
        lock(&self.shared.product_id).clone()
    }

    /// Open the socket. Resolves immediately when already open; concurrent
    /// callers share one attempt.
    pub async fn connect(&self) -> Result<(), FeedError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Connecting);
        match self.connector.open(&self.url).await {
            Ok(handle) => {
                let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(stale) = lock(&self.shared.task).take() {
                    stale.abort();
                }
                *lock(&self.shared.outgoing) = Some(handle.outgoing);
                self.shared.clear_subscription();
                self.shared.set_state(ConnectionState::Connected);
                let task = tokio::spawn(dispatch(Arc::clone(&self.shared), epoch, handle.events));
                *lock(&self.shared.task) = Some(task);
                metrics::inc_connections_opened();
                info!(url = %self.url, "Feed connected");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                error!(url = %self.url, error = %e, "Feed connection failed");
                Err(e)
            }
        }
    }

    /// Send one command.
    pub fn send(&self, command: &Command) -> Result<(), FeedError> {
        if !self.is_connected() {
            return Err(FeedError::NotConnected);
        }
        let text = command.encode()?;
        debug!(frame = %text, "Sending command");

        let outgoing = lock(&self.shared.outgoing);
        let sender = outgoing.as_ref().ok_or(FeedError::NotConnected)?;
        sender
            .send(Outgoing::Text(text))
            .map_err(|_| FeedError::NotConnected)
    }

    /// Wait for the first event `predicate` accepts.
    ///
    /// Register before sending the command whose answer is awaited. Resolves
    /// with an error if the socket fails or closes first.
    pub fn listen<P>(&self, predicate: P) -> Listen
    where
        P: FnMut(&SocketEvent) -> bool + Send + 'static,
    {
        lock(&self.shared.listeners).register(predicate, None)
    }

    /// Like [`listen`](Self::listen), and run `then` on the dispatch task
    /// the moment the predicate matches, before the next frame is handled.
    ///
    /// `then` never runs if the returned [`Listen`] is dropped first.
    pub fn listen_then<P>(&self, predicate: P, then: OnMatch) -> Listen
    where
        P: FnMut(&SocketEvent) -> bool + Send + 'static,
    {
        lock(&self.shared.listeners).register(predicate, Some(then))
    }

    /// [`listen_then`](Self::listen_then) that makes `router` the active
    /// route and its product the identity.
    pub fn listen_then_activate<P>(&self, predicate: P, router: MessageRouter) -> Listen
    where
        P: FnMut(&SocketEvent) -> bool + Send + 'static,
    {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        self.listen_then(
            predicate,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    *lock(&shared.product_id) = Some(router.product_id().clone());
                    *lock(&shared.router) = Some(router);
                }
            }),
        )
    }

    /// Stop routing `product_id` and hand back its router. Identity is kept
    /// until [`clear_subscription`](Self::clear_subscription).
    pub fn suspend_route(&self, product_id: &ProductId) -> Option<MessageRouter> {
        let mut router = lock(&self.shared.router);
        match router.as_ref() {
            Some(active) if active.product_id() == product_id => router.take(),
            _ => None,
        }
    }

    /// Install `router` if its product is still the identity. Used to put
    /// a suspended router back or to swap the throttle of the active product.
    pub fn restore_route(&self, router: MessageRouter) -> bool {
        let matches = self.product_id().as_ref() == Some(router.product_id());
        if matches {
            *lock(&self.shared.router) = Some(router);
        }
        matches
    }

    /// Clear the identity and route if `product_id` is the active one.
    ///
    /// Serialized with dispatch, so an activation racing a timed-out wait
    /// is either fully undone here or never happens.
    pub fn deactivate(&self, product_id: &ProductId) {
        let _listeners = lock(&self.shared.listeners);
        if self.product_id().as_ref() == Some(product_id) {
            self.shared.clear_subscription();
        }
    }

    /// Clear the identity and route unconditionally.
    pub fn clear_subscription(&self) {
        self.shared.clear_subscription();
    }

    /// Close the socket and wait for the close event.
    ///
    /// Pending listeners resolve with `ConnectionClosed`. Resolves
    /// immediately when there is no socket.
    pub async fn close(&self) -> Result<(), FeedError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_closed() {
            self.shared.clear_subscription();
            return Ok(());
        }

        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Closing);
        info!(url = %self.url, "Closing feed connection");

        let closed = self.listen(|event| matches!(event, SocketEvent::Closed { .. }));
        let sent = lock(&self.shared.outgoing)
            .as_ref()
            .map(|sender| sender.send(Outgoing::Close).is_ok())
            .unwrap_or(false);
        if !sent {
            self.shared.teardown(epoch, ConnectionState::Closed);
            return Ok(());
        }

        let result = match tokio::time::timeout(self.close_timeout, closed.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(timeout_ms = self.close_timeout.as_millis() as u64, "Close handshake timed out");
                Err(FeedError::CloseTimeout {
                    timeout_ms: self.close_timeout.as_millis() as u64,
                })
            }
        };
        self.shared.teardown(epoch, ConnectionState::Closed);
        result
    }
}
