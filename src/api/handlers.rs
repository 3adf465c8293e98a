//! HTTP API handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::feed::{ConnectionState, SubscriptionManager, SubscriptionState};
use crate::metrics;
use crate::orderbook::{BookStore, BookView, DeltaMode, ProductId};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live book.
    pub book: Arc<BookStore>,
    /// Feed subscription.
    pub feed: Arc<SubscriptionManager>,
    /// Rows per side in `/api/v1/book`.
    pub depth: usize,
    /// Prometheus renderer, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("feed", &self.feed)
            .field("depth", &self.depth)
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}

impl AppState {
    /// Create new app state.
    pub fn new(book: Arc<BookStore>, feed: Arc<SubscriptionManager>, depth: usize) -> Self {
        Self {
            book,
            feed,
            depth,
            prometheus: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Ready once a product is confirmed and routing.
    pub fn is_ready(&self) -> bool {
        self.feed.state().is_subscribed()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether a subscription is active.
    pub ready: bool,
    /// Active product if any.
    pub product_id: Option<ProductId>,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Socket lifecycle.
    pub connection: ConnectionState,
    /// Subscription lifecycle.
    pub subscription: SubscriptionState,
    /// Active product if any.
    pub product_id: Option<ProductId>,
    /// Delta merge mode.
    pub delta_mode: DeltaMode,
    /// Levels held per side.
    pub levels: LevelCounts,
}

/// Level counts in status response.
#[derive(Debug, Serialize)]
pub struct LevelCounts {
    /// Bid levels.
    pub bids: usize,
    /// Ask levels.
    pub asks: usize,
}

/// Book response.
#[derive(Debug, Serialize)]
pub struct BookResponse {
    /// Active product if any.
    pub product_id: Option<ProductId>,
    /// Top rows and spread.
    #[serde(flatten)]
    pub view: BookView,
    /// Largest cumulative total over the whole book.
    pub book_highest_total: Decimal,
    /// When the book last changed.
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if subscribed, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let response = ReadyResponse {
        ready: is_ready,
        product_id: state.feed.product_id(),
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns connection and subscription state.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let book = state.book.current_state();

    let status = match state.feed.connection().state() {
        ConnectionState::Connected if state.is_ready() => "running",
        ConnectionState::Connected | ConnectionState::Connecting => "starting",
        ConnectionState::Closing | ConnectionState::Closed => "stopped",
        ConnectionState::Disconnected => "disconnected",
    };

    let response = Json(StatusResponse {
        status,
        connection: state.feed.connection().state(),
        subscription: state.feed.state(),
        product_id: state.feed.product_id(),
        delta_mode: state.book.mode(),
        levels: LevelCounts {
            bids: book.bids.len(),
            asks: book.asks.len(),
        },
    });
    metrics::record_http_latency(start, "/api/v1/status");
    response
}

/// Book handler - returns the top rows of each side.
pub async fn book(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let book = state.book.current_state();

    let response = Json(BookResponse {
        product_id: state.feed.product_id(),
        view: BookView::from_state(&book, state.depth),
        book_highest_total: book.highest_total,
        updated_at: state.book.updated_at(),
    });
    metrics::record_http_latency(start, "/api/v1/book");
    response
}

/// Prometheus scrape handler.
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}
