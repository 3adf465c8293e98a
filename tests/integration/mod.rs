//! Integration tests for the book feed client.
//!
//! Most tests drive the full pipeline (connection, subscription manager,
//! router, store, HTTP API) over an in-memory socket.
//!
//! The live test needs network access to the feed endpoint.
//! Run with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tower::ServiceExt;

use book_feed::api::{create_router, AppState};
use book_feed::config::Config;
use book_feed::feed::codec::{CommandEvent, DEFAULT_FEED};
use book_feed::feed::{
    ChannelConnector, Confirmation, FeedConnection, FeedTags, PeerSocket, SubscriptionManager,
    SubscriptionState,
};
use book_feed::orderbook::{BookStore, BookView, DeltaMode, OrderBookState, PriceLevelWithTotal, ProductId};

struct Pipeline {
    manager: Arc<SubscriptionManager>,
    store: Arc<BookStore>,
    peers: mpsc::UnboundedReceiver<PeerSocket>,
}

fn pipeline(mode: DeltaMode) -> Pipeline {
    let (connector, peers) = ChannelConnector::new();
    let connection = Arc::new(FeedConnection::with_connector("ws://test", Arc::new(connector)));
    let manager = Arc::new(SubscriptionManager::new(
        connection,
        FeedTags::default(),
        Duration::from_secs(5),
    ));
    let store = Arc::new(BookStore::new(mode));

    let sink = Arc::clone(&store);
    let tags = FeedTags::default();
    manager.on_feed(move |data| {
        sink.apply_feed(&data, &tags);
    });
    let book = Arc::clone(&store);
    manager.on_teardown(move |_| book.reset());

    Pipeline { manager, store, peers }
}

fn xbt() -> ProductId {
    ProductId::new(ProductId::XBT_USD)
}

fn eth() -> ProductId {
    ProductId::new(ProductId::ETH_USD)
}

/// Subscribe `product` in the background and confirm it from the peer.
async fn subscribe(manager: &Arc<SubscriptionManager>, peer: &mut PeerSocket, product: ProductId) {
    let task = {
        let manager = Arc::clone(manager);
        let product = product.clone();
        tokio::spawn(async move { manager.subscribe(product, Duration::ZERO).await })
    };
    let command = peer.next_command().await.expect("subscribe command");
    assert_eq!(command.event, CommandEvent::Subscribe);
    assert_eq!(command.product_ids, vec![product.clone()]);
    peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &product);
    task.await.unwrap().unwrap();
}

/// Poll the store until `predicate` holds.
async fn wait_for(store: &BookStore, predicate: impl Fn(&OrderBookState) -> bool) -> Arc<OrderBookState> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let state = store.current_state();
            if predicate(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("book did not reach the expected state")
}

fn level(price: rust_decimal::Decimal, size: rust_decimal::Decimal, total: rust_decimal::Decimal) -> PriceLevelWithTotal {
    PriceLevelWithTotal::new(price, size, total)
}

#[tokio::test]
async fn snapshot_then_deltas_build_the_book() {
    let mut p = pipeline(DeltaMode::Replace);
    let manager = Arc::clone(&p.manager);
    let connect = tokio::spawn(async move { manager.connect().await });
    let mut peer = p.peers.recv().await.unwrap();
    connect.await.unwrap().unwrap();

    subscribe(&p.manager, &mut peer, xbt()).await;

    peer.send_text(
        r#"{"numLevels":25,"feed":"book_ui_1_snapshot","product_id":"PI_XBTUSD","bids":[[10,10]],"asks":[[11,1],[12,2]]}"#,
    );
    peer.send_text(r#"{"feed":"book_ui_1","product_id":"PI_XBTUSD","bids":[[10,0],[9.5,11]],"asks":[]}"#);

    let state = wait_for(&p.store, |s| s.bids.first().map(|l| l.price) == Some(dec!(9.5))).await;
    assert_eq!(state.bids, vec![level(dec!(9.5), dec!(11), dec!(11))]);
    assert_eq!(
        state.asks,
        vec![level(dec!(11), dec!(1), dec!(1)), level(dec!(12), dec!(2), dec!(3))]
    );
    assert_eq!(state.highest_total, dec!(11));

    let view = BookView::from_state(&state, 1);
    assert_eq!(view.asks.len(), 1);
    assert_eq!(view.spread.map(|s| s.amount), Some(dec!(1.5)));
}

#[tokio::test]
async fn switching_products_never_mixes_books() {
    let mut p = pipeline(DeltaMode::Replace);
    let manager = Arc::clone(&p.manager);
    let connect = tokio::spawn(async move { manager.connect().await });
    let mut peer = p.peers.recv().await.unwrap();
    connect.await.unwrap().unwrap();

    subscribe(&p.manager, &mut peer, xbt()).await;
    peer.send_text(r#"{"feed":"book_ui_1_snapshot","product_id":"PI_XBTUSD","bids":[[30000,1]],"asks":[[30001,1]]}"#);
    wait_for(&p.store, |s| !s.bids.is_empty()).await;

    let switch = {
        let manager = Arc::clone(&p.manager);
        tokio::spawn(async move { manager.subscribe(eth(), Duration::ZERO).await })
    };

    let unsubscribe = peer.next_command().await.unwrap();
    assert_eq!(unsubscribe.event, CommandEvent::Unsubscribe);
    assert_eq!(unsubscribe.product_ids, vec![xbt()]);

    // In flight when the switch started; must not reach the book.
    peer.send_text(r#"{"feed":"book_ui_1","product_id":"PI_XBTUSD","bids":[[29999,5]],"asks":[]}"#);
    peer.confirm(Confirmation::Unsubscribed, DEFAULT_FEED, &xbt());

    let subscribe_eth = peer.next_command().await.unwrap();
    assert_eq!(subscribe_eth.event, CommandEvent::Subscribe);
    assert_eq!(subscribe_eth.product_ids, vec![eth()]);
    peer.confirm(Confirmation::Subscribed, DEFAULT_FEED, &eth());
    switch.await.unwrap().unwrap();

    // The XBT book is gone before any ETH frame arrives.
    assert_eq!(p.manager.product_id(), Some(eth()));
    assert_eq!(*p.store.current_state(), OrderBookState::default());
    assert!(p.store.updated_at().is_none());

    peer.send_text(r#"{"feed":"book_ui_1_snapshot","product_id":"PI_ETHUSD","bids":[[2000,4]],"asks":[[2001,2]]}"#);
    let state = wait_for(&p.store, |s| s.bids.first().map(|l| l.price) == Some(dec!(2000))).await;

    assert_eq!(state.bids, vec![level(dec!(2000), dec!(4), dec!(4))]);
    assert!(state.bids.iter().all(|l| l.price != dec!(29999)));
    assert_eq!(p.manager.state(), SubscriptionState::Subscribed(eth()));
}

#[tokio::test]
async fn close_discards_the_book() {
    let mut p = pipeline(DeltaMode::Replace);
    let manager = Arc::clone(&p.manager);
    let connect = tokio::spawn(async move { manager.connect().await });
    let mut peer = p.peers.recv().await.unwrap();
    connect.await.unwrap().unwrap();

    subscribe(&p.manager, &mut peer, xbt()).await;
    peer.send_text(r#"{"feed":"book_ui_1_snapshot","product_id":"PI_XBTUSD","bids":[[30000,1]],"asks":[[30001,1]]}"#);
    wait_for(&p.store, |s| !s.bids.is_empty()).await;

    let server = tokio::spawn(async move {
        while let Some(out) = peer.recv().await {
            if out.command().is_none() {
                peer.close(1000, "normal");
                break;
            }
        }
    });
    p.manager.close().await.unwrap();
    server.await.unwrap();

    assert!(p.store.current_state().is_empty());
}

#[tokio::test]
async fn additive_mode_accumulates_sizes() {
    let mut p = pipeline(DeltaMode::Additive);
    let manager = Arc::clone(&p.manager);
    let connect = tokio::spawn(async move { manager.connect().await });
    let mut peer = p.peers.recv().await.unwrap();
    connect.await.unwrap().unwrap();

    subscribe(&p.manager, &mut peer, xbt()).await;
    peer.send_text(r#"{"feed":"book_ui_1_snapshot","product_id":"PI_XBTUSD","bids":[[10,10]],"asks":[]}"#);
    peer.send_text(r#"{"feed":"book_ui_1","product_id":"PI_XBTUSD","bids":[[10,5]]}"#);

    let state = wait_for(&p.store, |s| s.bid_total() == dec!(15)).await;
    assert_eq!(state.bids, vec![level(dec!(10), dec!(15), dec!(15))]);
}

#[tokio::test]
async fn http_surface_tracks_subscription() {
    let mut p = pipeline(DeltaMode::Replace);
    let state = AppState::new(Arc::clone(&p.store), Arc::clone(&p.manager), 20);

    let response = create_router(state.clone())
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let manager = Arc::clone(&p.manager);
    let connect = tokio::spawn(async move { manager.connect().await });
    let mut peer = p.peers.recv().await.unwrap();
    connect.await.unwrap().unwrap();
    subscribe(&p.manager, &mut peer, xbt()).await;

    let response = create_router(state.clone())
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = create_router(state)
        .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["product_id"], "PI_XBTUSD");
    assert_eq!(body["subscription"]["state"], "subscribed");
}

/// Subscribe to the live feed and check the first snapshot.
#[tokio::test]
#[ignore = "requires network access"]
async fn live_feed_delivers_sorted_snapshot() {
    dotenvy::dotenv().ok();
    let config = Config::load().unwrap_or_default();

    let connection = Arc::new(FeedConnection::new(config.book_ws_url.clone()));
    let manager = Arc::new(SubscriptionManager::new(connection, config.tags(), config.confirm_timeout()));
    let store = Arc::new(BookStore::new(config.delta_mode));

    let sink = Arc::clone(&store);
    let tags = config.tags();
    manager.on_feed(move |data| {
        sink.apply_feed(&data, &tags);
    });
    let book = Arc::clone(&store);
    manager.on_teardown(move |_| book.reset());

    manager
        .subscribe(config.product_id.clone(), Duration::ZERO)
        .await
        .expect("subscribe to live feed");

    let state = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let state = store.current_state();
            if !state.bids.is_empty() && !state.asks.is_empty() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("no snapshot within 15s");

    assert!(state.bids.windows(2).all(|w| w[0].price > w[1].price));
    assert!(state.asks.windows(2).all(|w| w[0].price < w[1].price));
    assert!(state.best_bid() < state.best_ask());
    println!("Live book: {} bids, {} asks", state.bids.len(), state.asks.len());

    manager.close().await.expect("close");
}
