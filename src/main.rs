//! Live order book client entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use book_feed::api::{create_router, AppState};
use book_feed::config::Config;
use book_feed::feed::{maintain_subscription, FeedConnection, ReconnectConfig, SubscriptionManager};
use book_feed::metrics;
use book_feed::orderbook::{BookStore, BookView, ProductId};
use book_feed::utils::shutdown_signal;

/// Live order book client.
#[derive(Parser, Debug)]
#[command(name = "book-feed")]
#[command(about = "Streams a WebSocket order book feed into a sorted, depth-aggregated book")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe, maintain the book and serve it over HTTP (default).
    Run {
        /// Product to subscribe (overrides PRODUCT_ID).
        #[arg(long)]
        product: Option<String>,

        /// Throttle window in milliseconds (overrides THROTTLE_MS).
        #[arg(long)]
        throttle_ms: Option<u64>,

        /// HTTP server port for health/metrics (overrides PORT).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Test the feed connection (diagnostic).
    WsTest {
        /// How long to print book updates.
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Product to subscribe (overrides PRODUCT_ID).
        #[arg(long)]
        product: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging (RUST_LOG / VERBOSE may come from .env)
    let log_config = Config::load().unwrap_or_default();
    let filter = EnvFilter::try_new(log_config.log_directive(args.verbose))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::Run { product, throttle_ms, port }) => cmd_run(product, throttle_ms, port).await,
        Some(Command::WsTest { seconds, product }) => cmd_ws_test(seconds, product).await,
        None => cmd_run(None, None, None).await,
    }
}

/// Load and validate configuration, applying CLI overrides.
fn load_config(
    product: Option<String>,
    throttle_ms: Option<u64>,
    port: Option<u16>,
) -> anyhow::Result<Config> {
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(product) = product {
        config.product_id = ProductId::new(product);
    }
    if let Some(throttle_ms) = throttle_ms {
        config.throttle_ms = throttle_ms;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let config = config.validated().map_err(|e| {
        error!("{}", e);
        e
    })?;
    Ok(config)
}

/// Build the feed stack described by `config`, with the store as consumer.
fn build_feed(config: &Config) -> (Arc<SubscriptionManager>, Arc<BookStore>) {
    let connection = Arc::new(
        FeedConnection::new(config.book_ws_url.clone()).with_close_timeout(config.confirm_timeout()),
    );
    let manager = Arc::new(SubscriptionManager::new(
        connection,
        config.tags(),
        config.confirm_timeout(),
    ));
    let store = Arc::new(BookStore::new(config.delta_mode));

    let sink = Arc::clone(&store);
    let tags = config.tags();
    manager.on_feed(move |data| {
        sink.apply_feed(&data, &tags);
    });
    let book = Arc::clone(&store);
    manager.on_teardown(move |_| book.reset());

    (manager, store)
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BOOK FEED - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    // Show configuration summary
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Feed URL: {}", config.book_ws_url);
    println!("  Feed: {} (snapshot: {}, delta: {})",
        config.feed_name, config.feed_type_snapshot, config.feed_type_delta);
    println!("  Product: {}", config.product_id);
    println!("  Throttle: {}ms", config.throttle_ms);
    println!("  Confirm Timeout: {}ms", config.confirm_timeout_ms);
    println!("  Delta Mode: {}", config.delta_mode);
    println!("  Book Depth: {} rows", config.book_depth);
    println!("  HTTP Port: {}", config.port);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Subscribe, keep the book current and serve it until shutdown.
async fn cmd_run(product: Option<String>, throttle_ms: Option<u64>, port: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = load_config(product, throttle_ms, port)?;
    info!(
        url = %config.book_ws_url,
        product_id = %config.product_id,
        throttle_ms = config.throttle_ms,
        delta_mode = %config.delta_mode,
        "Configuration loaded successfully"
    );

    // Initialize metrics
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    metrics::init_metrics();

    let (manager, store) = build_feed(&config);
    let app_state = AppState::new(Arc::clone(&store), Arc::clone(&manager), config.book_depth)
        .with_prometheus(prometheus);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut server_stop = stop_rx.clone();
    let router = create_router(app_state);
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_stop.changed().await;
            })
            .await
    });

    // Keep the product subscribed until shutdown
    let supervisor = tokio::spawn(maintain_subscription(
        Arc::clone(&manager),
        config.product_id.clone(),
        config.throttle(),
        ReconnectConfig::default(),
        stop_rx,
    ));

    shutdown_signal().await;
    info!("Shutting down...");
    let _ = stop_tx.send(true);

    if let Err(e) = supervisor.await {
        warn!(error = %e, "Subscription supervisor panicked");
    }
    if let Err(e) = manager.close().await {
        warn!(error = %e, "Feed did not close cleanly");
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Connect, subscribe and print book summaries for a while.
async fn cmd_ws_test(seconds: u64, product: Option<String>) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BOOK FEED - WEBSOCKET TEST");
    println!("======================================================================");

    let config = load_config(product, None, None)?;
    let (manager, store) = build_feed(&config);

    println!("\n1. Connecting to {}...", config.book_ws_url);
    manager.connect().await?;
    println!("   Connected!");

    println!("\n2. Subscribing to {}...", config.product_id);
    let start = Instant::now();
    manager.subscribe(config.product_id.clone(), config.throttle()).await?;
    println!("   Subscribed in {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    println!("\n3. Watching book updates ({} seconds)...", seconds);
    let start = Instant::now();
    let mut last_update = None;
    while start.elapsed() < Duration::from_secs(seconds) {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let updated_at = store.updated_at();
        if updated_at == last_update {
            continue;
        }
        last_update = updated_at;

        let state = store.current_state();
        let view = BookView::from_state(&state, 1);
        let best_bid = view.bids.first().map(|r| format!("{} x {}", r.price, r.size));
        let best_ask = view.asks.first().map(|r| format!("{} x {}", r.price, r.size));
        println!(
            "   [{:.1}s] Bids: {}, Asks: {}, Best Bid: {}, Best Ask: {}, Spread: {}",
            start.elapsed().as_secs_f64(),
            state.bids.len(),
            state.asks.len(),
            best_bid.as_deref().unwrap_or("-"),
            best_ask.as_deref().unwrap_or("-"),
            view.spread
                .map(|s| format!("{} ({}%)", s.amount, s.percentage.round_dp(2)))
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    manager.close().await?;

    println!("\n======================================================================");
    println!("WEBSOCKET TEST COMPLETE");
    println!("  Levels: {} bids, {} asks", store.current_state().bids.len(), store.current_state().asks.len());
    println!("  Connection status: {}", if manager.is_connected() { "Connected" } else { "Closed" });
    println!("======================================================================");

    Ok(())
}
