//! Product subscription lifecycle over a single [`FeedConnection`].
//!
//! At most one product is active. Switching products unsubscribes the old
//! one and waits for its confirmation before subscribing the new one, and
//! the new product only becomes active once its own confirmation arrives.
//! Operations are serialized: a second `subscribe` waits for the first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::codec::{is_confirmation, Command, Confirmation, FeedData, FeedTags};
use super::connection::{ConnectionState, FeedConnection};
use super::router::{HandlerSlot, MessageRouter};
use super::transport::SocketEvent;
use crate::error::FeedError;
use crate::metrics;
use crate::orderbook::ProductId;

/// Called with the product whose book has to be discarded.
pub type TeardownHook = Arc<dyn Fn(&ProductId) + Send + Sync>;

/// Default wait for a subscribe/unsubscribe confirmation.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the subscription lifecycle is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "product", rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Nothing subscribed.
    Idle,
    /// Opening the socket.
    Connecting,
    /// Subscribe sent, waiting for `subscribed`.
    AwaitingSubscribeConfirm(ProductId),
    /// Confirmed and routing.
    Subscribed(ProductId),
    /// Unsubscribe sent, waiting for `unsubscribed`; the second product is
    /// the one to subscribe next, if any.
    AwaitingUnsubscribeConfirm(ProductId, Option<ProductId>),
    /// Socket closed by the owner.
    Closed,
}

impl SubscriptionState {
    /// Whether a product is confirmed and routing.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscriptionState::Subscribed(_))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Subscribes one product at a time on a shared connection.
pub struct SubscriptionManager {
    connection: Arc<FeedConnection>,
    tags: FeedTags,
    confirm_timeout: Duration,
    handler: HandlerSlot,
    on_teardown: Mutex<Option<TeardownHook>>,
    /// Product whose frames the consumer may hold.
    book_product: Mutex<Option<ProductId>>,
    state: Mutex<SubscriptionState>,
    in_flight: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("connection", &self.connection)
            .field("tags", &self.tags)
            .field("state", &self.state())
            .finish()
    }
}

impl SubscriptionManager {
    /// Manager over `connection`.
    pub fn new(connection: Arc<FeedConnection>, tags: FeedTags, confirm_timeout: Duration) -> Self {
        Self {
            connection,
            tags,
            confirm_timeout,
            handler: HandlerSlot::default(),
            on_teardown: Mutex::new(None),
            book_product: Mutex::new(None),
            state: Mutex::new(SubscriptionState::Idle),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Arc<FeedConnection> {
        &self.connection
    }

    /// Feed names in use.
    pub fn tags(&self) -> &FeedTags {
        &self.tags
    }

    /// Register the consumer of routed data frames. Replaces any earlier
    /// handler, including for an already active subscription.
    pub fn on_feed<F>(&self, handler: F)
    where
        F: Fn(FeedData) + Send + Sync + 'static,
    {
        self.handler.set(Arc::new(handler));
    }

    /// Register the callback that discards consumer state for a product.
    ///
    /// Runs once a product is unsubscribed (including when switching), on
    /// `close`, and before a different product is subscribed after the
    /// socket dropped. A bare socket loss keeps the last good book.
    pub fn on_teardown<F>(&self, hook: F)
    where
        F: Fn(&ProductId) + Send + Sync + 'static,
    {
        *lock(&self.on_teardown) = Some(Arc::new(hook));
    }

    /// Run the teardown hook for the consumer's product if `stale` says so.
    fn discard_book(&self, stale: impl Fn(&ProductId) -> bool) {
        let stale = {
            let mut book_product = lock(&self.book_product);
            match book_product.as_ref() {
                Some(product_id) if stale(product_id) => book_product.take(),
                _ => None,
            }
        };
        let Some(product_id) = stale else {
            return;
        };
        debug!(product_id = %product_id, "Discarding book");
        let hook = lock(&self.on_teardown).clone();
        if let Some(hook) = hook {
            hook(&product_id);
        }
    }

    /// Open the socket.
    pub async fn connect(&self) -> Result<(), FeedError> {
        self.connection.connect().await
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Whether there is no socket.
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Confirmed active product.
    pub fn product_id(&self) -> Option<ProductId> {
        self.connection.product_id()
    }

    /// Current lifecycle state, reconciled with the socket: after a close
    /// it reads `Closed`, and a subscription whose socket dropped reads `Idle`.
    pub fn state(&self) -> SubscriptionState {
        let stored = lock(&self.state).clone();
        if self.connection.state() == ConnectionState::Closed
            && stored != SubscriptionState::Connecting
        {
            return SubscriptionState::Closed;
        }
        match &stored {
            SubscriptionState::Subscribed(product_id)
                if self.connection.product_id().as_ref() != Some(product_id) =>
            {
                SubscriptionState::Idle
            }
            _ => stored,
        }
    }

    fn set_state(&self, state: SubscriptionState) {
        debug!(state = ?state, "Subscription state changed");
        *lock(&self.state) = state;
    }

    /// Make `product_id` the active product, delivering at most one frame
    /// per `throttle` to the registered handler.
    ///
    /// Connects if needed. Subscribing the already active product only
    /// replaces its throttle window.
    #[instrument(skip_all, fields(product_id = %product_id))]
    pub async fn subscribe(&self, product_id: ProductId, throttle: Duration) -> Result<(), FeedError> {
        let _in_flight = self.in_flight.lock().await;
        let started = Instant::now();

        if !self.connection.is_connected() {
            let previous = self.state();
            self.set_state(SubscriptionState::Connecting);
            if let Err(e) = self.connection.connect().await {
                self.set_state(previous);
                return Err(e);
            }
        }

        let router = MessageRouter::new(
            product_id.clone(),
            self.tags.clone(),
            throttle,
            self.handler.clone(),
        );

        if let Some(current) = self.connection.product_id() {
            if current == product_id {
                self.connection.restore_route(router);
                debug!("Already subscribed, throttle updated");
                return Ok(());
            }
            self.unsubscribe_locked(&current, Some(&product_id)).await?;
        }

        self.discard_book(|held| *held != product_id);
        *lock(&self.book_product) = Some(product_id.clone());

        self.set_state(SubscriptionState::AwaitingSubscribeConfirm(product_id.clone()));
        let feed = self.tags.feed.clone();
        let expected = product_id.clone();
        let confirmed = self.connection.listen_then_activate(
            move |event| {
                matches!(event, SocketEvent::Message(text)
                    if is_confirmation(text, Confirmation::Subscribed, &feed, &expected))
            },
            router,
        );

        if let Err(e) = self.connection.send(&Command::subscribe(&self.tags.feed, &product_id)) {
            self.set_state(SubscriptionState::Idle);
            return Err(e);
        }

        match tokio::time::timeout(self.confirm_timeout, confirmed.wait()).await {
            Ok(Ok(_)) => {
                self.set_state(SubscriptionState::Subscribed(product_id.clone()));
                metrics::inc_subscriptions_confirmed();
                metrics::record_confirm_latency(started);
                info!(feed = %self.tags.feed, "Subscribed");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Subscribe failed");
                self.set_state(SubscriptionState::Idle);
                Err(e)
            }
            Err(_) => {
                self.connection.deactivate(&product_id);
                self.set_state(SubscriptionState::Idle);
                let err = self.timeout_error(Confirmation::Subscribed, &product_id);
                warn!(error = %err, "Subscribe not confirmed");
                Err(err)
            }
        }
    }

    /// Unsubscribe `product_id`. Resolves immediately when not connected.
    #[instrument(skip_all, fields(product_id = %product_id))]
    pub async fn unsubscribe(&self, product_id: &ProductId) -> Result<(), FeedError> {
        let _in_flight = self.in_flight.lock().await;
        if !self.connection.is_connected() {
            return Ok(());
        }
        self.unsubscribe_locked(product_id, None).await
    }

    async fn unsubscribe_locked(
        &self,
        product_id: &ProductId,
        next: Option<&ProductId>,
    ) -> Result<(), FeedError> {
        let previous = self.state();
        self.set_state(SubscriptionState::AwaitingUnsubscribeConfirm(
            product_id.clone(),
            next.cloned(),
        ));

        // Frames of the old product stop flowing as soon as the switch starts.
        let suspended = self.connection.suspend_route(product_id);

        let feed = self.tags.feed.clone();
        let expected = product_id.clone();
        let confirmed = self.connection.listen(move |event| {
            matches!(event, SocketEvent::Message(text)
                if is_confirmation(text, Confirmation::Unsubscribed, &feed, &expected))
        });

        let result = match self.connection.send(&Command::unsubscribe(&self.tags.feed, product_id)) {
            Err(e) => Err(e),
            Ok(()) => match tokio::time::timeout(self.confirm_timeout, confirmed.wait()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(self.timeout_error(Confirmation::Unsubscribed, product_id)),
            },
        };

        match result {
            Ok(()) => {
                self.connection.deactivate(product_id);
                self.discard_book(|held| held == product_id);
                self.set_state(SubscriptionState::Idle);
                info!("Unsubscribed");
                Ok(())
            }
            Err(e) => {
                if let Some(router) = suspended {
                    self.connection.restore_route(router);
                }
                self.set_state(previous);
                warn!(error = %e, "Unsubscribe failed");
                Err(e)
            }
        }
    }

    /// Close the socket. Pending waits fail with `ConnectionClosed`; the
    /// identity is cleared whatever the outcome.
    ///
    /// Does not queue behind an in-flight `subscribe`, so it can abort one.
    pub async fn close(&self) -> Result<(), FeedError> {
        let result = self.connection.close().await;
        self.connection.clear_subscription();
        self.discard_book(|_| true);
        self.set_state(SubscriptionState::Closed);
        result
    }

    fn timeout_error(&self, confirmation: Confirmation, product_id: &ProductId) -> FeedError {
        FeedError::ConfirmationTimeout {
            confirmation,
            product_id: product_id.clone(),
            timeout_ms: self.confirm_timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::codec::{CommandEvent, DEFAULT_FEED};
    use crate::feed::transport::{ChannelConnector, Outgoing, PeerSocket};
    use tokio::sync::mpsc;

    fn xbt() -> ProductId {
        ProductId::new(ProductId::XBT_USD)
    }

    fn eth() -> ProductId {
        ProductId::new(ProductId::ETH_USD)
    }

    fn delta(product: &ProductId, price: u32) -> String {
        format!(r#"{{"feed":"book_ui_1","product_id":"{product}","bids":[[{price},1]],"asks":[]}}"#)
    }

    struct Harness {
        manager: Arc<SubscriptionManager>,
        peers: mpsc::UnboundedReceiver<PeerSocket>,
        frames: mpsc::UnboundedReceiver<FeedData>,
    }

    fn harness(confirm_timeout: Duration) -> Harness {
        let (connector, peers) = ChannelConnector::new();
        let connection = Arc::new(FeedConnection::with_connector("ws://test", Arc::new(connector)));
        let manager = Arc::new(SubscriptionManager::new(connection, FeedTags::default(), confirm_timeout));

        let (tx, frames) = mpsc::unbounded_channel();
        manager.on_feed(move |data| {
            let _ = tx.send(data);
        });
        Harness { manager, peers, frames }
    }

    /// Answer every command with its confirmation, recording the order.
    fn auto_confirm(mut peer: PeerSocket) -> tokio::task::JoinHandle<Vec<(CommandEvent, ProductId)>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(out) = peer.recv().await {
                let Some(command) = out.command() else {
                    peer.close(1000, "normal");
                    break;
                };
                let product = command.product_ids[0].clone();
                let confirmation = match command.event {
                    CommandEvent::Subscribe => Confirmation::Subscribed,
                    CommandEvent::Unsubscribe => Confirmation::Unsubscribed,
                };
                seen.push((command.event, product.clone()));
                peer.confirm(confirmation, &command.feed, &product);
            }
            seen
        })
    }

    #[tokio::test]
    async fn subscribe_connects_and_routes() {
        let mut h = harness(DEFAULT_CONFIRM_TIMEOUT);
        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move { manager.subscribe(xbt(), Duration::ZERO).await });

        let mut peer = h.peers.recv().await.unwrap();
        let command = peer.next_command().await.unwrap();
        assert_eq!(command, Command::subscribe(DEFAULT_FEED, &xbt()));

        // Data before the confirmation is not routed.
        peer.send_text(delta(&xbt(), 1));
        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &xbt());
        peer.send_text(delta(&xbt(), 2));

        task.await.unwrap().unwrap();
        assert_eq!(h.manager.state(), SubscriptionState::Subscribed(xbt()));
        assert_eq!(h.manager.product_id(), Some(xbt()));

        let frame = h.frames.recv().await.unwrap();
        assert_eq!(frame.bids[0].price, rust_decimal::Decimal::from(2));
        assert!(h.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn switching_products_unsubscribes_first() {
        let mut h = harness(DEFAULT_CONFIRM_TIMEOUT);
        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move {
            manager.subscribe(xbt(), Duration::ZERO).await?;
            manager.subscribe(eth(), Duration::ZERO).await
        });

        let mut peer = h.peers.recv().await.unwrap();

        let first = peer.next_command().await.unwrap();
        assert_eq!(first, Command::subscribe(DEFAULT_FEED, &xbt()));
        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &xbt());

        let second = peer.next_command().await.unwrap();
        assert_eq!(second, Command::unsubscribe(DEFAULT_FEED, &xbt()));
        // Late frame of the old product while the unsubscribe is pending.
        peer.send_text(delta(&xbt(), 7));
        peer.confirm(Confirmation::Unsubscribed, DEFAULT_FEED, &xbt());

        let third = peer.next_command().await.unwrap();
        assert_eq!(third, Command::subscribe(DEFAULT_FEED, &eth()));
        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &eth());

        task.await.unwrap().unwrap();
        peer.send_text(delta(&xbt(), 8));
        peer.send_text(delta(&eth(), 9));

        let frame = h.frames.recv().await.unwrap();
        assert_eq!(frame.product_id, eth());
        assert!(h.frames.try_recv().is_err());
        assert_eq!(h.manager.state(), SubscriptionState::Subscribed(eth()));
    }

    #[tokio::test]
    async fn resubscribing_active_product_sends_nothing() {
        let mut h = harness(DEFAULT_CONFIRM_TIMEOUT);
        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move {
            manager.subscribe(xbt(), Duration::ZERO).await?;
            manager.subscribe(xbt(), Duration::from_secs(1)).await
        });

        let peer = h.peers.recv().await.unwrap();
        let server = auto_confirm(peer);
        task.await.unwrap().unwrap();

        h.manager.close().await.unwrap();
        let seen = server.await.unwrap();
        assert_eq!(seen, vec![(CommandEvent::Subscribe, xbt())]);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_times_out_without_confirmation() {
        let mut h = harness(Duration::from_millis(250));
        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move { manager.subscribe(xbt(), Duration::ZERO).await });

        let mut peer = h.peers.recv().await.unwrap();
        assert!(peer.next_command().await.is_some());

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            FeedError::ConfirmationTimeout {
                confirmation: Confirmation::Subscribed,
                product_id: xbt(),
                timeout_ms: 250,
            }
        );
        assert!(err.is_connection_error());
        assert_eq!(h.manager.product_id(), None);

        // A confirmation arriving after the timeout activates nothing.
        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &xbt());
        peer.send_text(delta(&xbt(), 1));
        tokio::task::yield_now().await;
        assert_eq!(h.manager.product_id(), None);
        assert!(h.frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_unsubscribe_keeps_old_product() {
        let mut h = harness(Duration::from_millis(250));
        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move {
            manager.subscribe(xbt(), Duration::ZERO).await?;
            manager.subscribe(eth(), Duration::ZERO).await
        });

        let mut peer = h.peers.recv().await.unwrap();
        peer.next_command().await.unwrap();
        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &xbt());
        assert_eq!(
            peer.next_command().await.unwrap(),
            Command::unsubscribe(DEFAULT_FEED, &xbt())
        );

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            FeedError::ConfirmationTimeout { confirmation: Confirmation::Unsubscribed, .. }
        ));
        assert_eq!(h.manager.state(), SubscriptionState::Subscribed(xbt()));

        peer.send_text(delta(&xbt(), 3));
        let frame = h.frames.recv().await.unwrap();
        assert_eq!(frame.product_id, xbt());
    }

    #[tokio::test]
    async fn close_aborts_pending_subscribe() {
        let mut h = harness(DEFAULT_CONFIRM_TIMEOUT);
        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move { manager.subscribe(xbt(), Duration::ZERO).await });

        let mut peer = h.peers.recv().await.unwrap();
        assert!(peer.next_command().await.is_some());

        let server = tokio::spawn(async move {
            while let Some(out) = peer.recv().await {
                if out == Outgoing::Close {
                    peer.close(1000, "normal");
                    break;
                }
            }
        });

        h.manager.close().await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, FeedError::ConnectionClosed { code: Some(1000), .. }));
        assert_eq!(h.manager.state(), SubscriptionState::Closed);
        assert!(h.manager.is_closed());
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_subscribes_run_one_at_a_time() {
        let mut h = harness(DEFAULT_CONFIRM_TIMEOUT);
        h.manager.connect().await.unwrap();
        let mut peer = h.peers.recv().await.unwrap();

        let first = {
            let manager = Arc::clone(&h.manager);
            tokio::spawn(async move { manager.subscribe(xbt(), Duration::ZERO).await })
        };
        assert_eq!(peer.next_command().await.unwrap(), Command::subscribe(DEFAULT_FEED, &xbt()));

        let second = {
            let manager = Arc::clone(&h.manager);
            tokio::spawn(async move { manager.subscribe(eth(), Duration::ZERO).await })
        };
        // Nothing for ETH goes out while XBT awaits its confirmation.
        assert!(tokio::time::timeout(Duration::from_millis(100), peer.next_command())
            .await
            .is_err());

        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &xbt());
        first.await.unwrap().unwrap();

        assert_eq!(peer.next_command().await.unwrap(), Command::unsubscribe(DEFAULT_FEED, &xbt()));
        peer.confirm(Confirmation::Unsubscribed, DEFAULT_FEED, &xbt());
        assert_eq!(peer.next_command().await.unwrap(), Command::subscribe(DEFAULT_FEED, &eth()));
        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &eth());

        second.await.unwrap().unwrap();
        assert_eq!(h.manager.state(), SubscriptionState::Subscribed(eth()));
    }

    #[tokio::test(start_paused = true)]
    async fn late_close_from_old_socket_is_ignored() {
        let (connector, mut peers) = ChannelConnector::new();
        let connection = Arc::new(
            FeedConnection::with_connector("ws://test", Arc::new(connector))
                .with_close_timeout(Duration::from_millis(50)),
        );
        let manager = Arc::new(SubscriptionManager::new(
            connection,
            FeedTags::default(),
            DEFAULT_CONFIRM_TIMEOUT,
        ));
        let (tx, mut frames) = mpsc::unbounded_channel();
        manager.on_feed(move |data| {
            let _ = tx.send(data);
        });

        manager.connect().await.unwrap();
        let old_peer = peers.recv().await.unwrap();
        assert_eq!(manager.close().await, Err(FeedError::CloseTimeout { timeout_ms: 50 }));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.subscribe(xbt(), Duration::ZERO).await })
        };
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.next_command().await.unwrap(), Command::subscribe(DEFAULT_FEED, &xbt()));

        old_peer.close(1000, "late echo");
        old_peer.send_text(delta(&xbt(), 1));
        peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &xbt());
        task.await.unwrap().unwrap();
        assert!(manager.is_connected());

        peer.send_text(delta(&xbt(), 2));
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.bids[0].price, rust_decimal::Decimal::from(2));
    }

    #[tokio::test]
    async fn teardown_hook_follows_book_product() {
        let mut h = harness(DEFAULT_CONFIRM_TIMEOUT);
        let discarded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&discarded);
        h.manager.on_teardown(move |product| sink.lock().unwrap().push(product.clone()));

        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move {
            manager.subscribe(xbt(), Duration::ZERO).await?;
            manager.subscribe(eth(), Duration::ZERO).await
        });
        let server = auto_confirm(h.peers.recv().await.unwrap());
        task.await.unwrap().unwrap();
        assert_eq!(*discarded.lock().unwrap(), vec![xbt()]);

        // Losing the socket keeps the last good book.
        server.abort();
        let _ = server.await;
        while !h.manager.is_closed() {
            tokio::task::yield_now().await;
        }
        assert_eq!(*discarded.lock().unwrap(), vec![xbt()]);

        // A different product afterwards discards it.
        let manager = Arc::clone(&h.manager);
        let task = tokio::spawn(async move { manager.subscribe(xbt(), Duration::ZERO).await });
        let server = auto_confirm(h.peers.recv().await.unwrap());
        task.await.unwrap().unwrap();
        assert_eq!(*discarded.lock().unwrap(), vec![xbt(), eth()]);

        h.manager.close().await.unwrap();
        server.await.unwrap();
        assert_eq!(*discarded.lock().unwrap(), vec![xbt(), eth(), xbt()]);
    }

    #[tokio::test]
    async fn unsubscribe_without_socket_is_ok() {
        let h = harness(DEFAULT_CONFIRM_TIMEOUT);
        assert!(h.manager.unsubscribe(&xbt()).await.is_ok());
        assert_eq!(h.manager.state(), SubscriptionState::Idle);
    }

    #[tokio::test]
    async fn connect_failure_restores_state() {
        let (connector, _peers) = ChannelConnector::new();
        connector.fail_next(FeedError::Connection("refused".into()));
        let connection = Arc::new(FeedConnection::with_connector("ws://test", Arc::new(connector)));
        let manager = SubscriptionManager::new(connection, FeedTags::default(), DEFAULT_CONFIRM_TIMEOUT);

        let err = manager.subscribe(xbt(), Duration::ZERO).await.unwrap_err();
        assert_eq!(err, FeedError::Connection("refused".into()));
        assert_eq!(manager.state(), SubscriptionState::Idle);
    }

    #[test]
    fn state_serializes_for_status() {
        let json = serde_json::to_value(SubscriptionState::Subscribed(xbt())).unwrap();
        assert_eq!(json, serde_json::json!({"state": "subscribed", "product": "PI_XBTUSD"}));
    }
}
