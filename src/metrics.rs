//! Prometheus metrics for the feed pipeline.
//!
//! This module provides metrics for:
//! - Socket connections and received frames
//! - Router outcomes (delivered, throttled, filtered, malformed)
//! - Subscription confirmation latency and resubscribe attempts
//! - Reducer latency and applied snapshots/deltas
//! - HTTP request latency

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

use crate::feed::RouteOutcome;

// === Metric Name Constants ===

/// Frame routing latency metric name.
pub const METRIC_ROUTE_LATENCY: &str = "feed_route_latency_ms";
/// Subscription confirmation latency metric name.
pub const METRIC_CONFIRM_LATENCY: &str = "feed_confirm_latency_ms";
/// Reducer latency metric name.
pub const METRIC_REDUCE_LATENCY: &str = "book_reduce_latency_ms";
/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// Connections opened counter metric name.
pub const METRIC_CONNECTIONS_OPENED: &str = "feed_connections_opened_total";
/// Frames received counter metric name.
pub const METRIC_FRAMES_RECEIVED: &str = "feed_frames_received_total";
/// Frames routed counter metric name, labelled by outcome.
pub const METRIC_FRAMES_ROUTED: &str = "feed_frames_routed_total";
/// Confirmed subscriptions counter metric name.
pub const METRIC_SUBSCRIPTIONS_CONFIRMED: &str = "feed_subscriptions_confirmed_total";
/// Resubscribe attempts counter metric name.
pub const METRIC_RESUBSCRIBES: &str = "feed_resubscribes_total";
/// Applied snapshots counter metric name.
pub const METRIC_SNAPSHOTS_APPLIED: &str = "book_snapshots_applied_total";
/// Applied deltas counter metric name.
pub const METRIC_DELTAS_APPLIED: &str = "book_deltas_applied_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(
        METRIC_ROUTE_LATENCY,
        "Time to decode, filter and deliver one frame in milliseconds"
    );
    describe_histogram!(
        METRIC_CONFIRM_LATENCY,
        "Time from subscribe call to confirmation in milliseconds"
    );
    describe_histogram!(
        METRIC_REDUCE_LATENCY,
        "Time to reduce one action into the book in milliseconds"
    );
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "HTTP request latency in milliseconds"
    );

    // Counters
    describe_counter!(
        METRIC_CONNECTIONS_OPENED,
        "Total number of feed sockets opened"
    );
    describe_counter!(
        METRIC_FRAMES_RECEIVED,
        "Total number of text frames received"
    );
    describe_counter!(
        METRIC_FRAMES_ROUTED,
        "Total number of frames seen by the router, by outcome"
    );
    describe_counter!(
        METRIC_SUBSCRIPTIONS_CONFIRMED,
        "Total number of confirmed subscriptions"
    );
    describe_counter!(
        METRIC_RESUBSCRIBES,
        "Total number of resubscribe attempts after a failure or drop"
    );
    describe_counter!(
        METRIC_SNAPSHOTS_APPLIED,
        "Total number of snapshots applied to the book"
    );
    describe_counter!(
        METRIC_DELTAS_APPLIED,
        "Total number of deltas applied to the book"
    );

    debug!("Metrics initialized");
}

/// Record subscription confirmation latency.
pub fn record_confirm_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_CONFIRM_LATENCY).record(latency_ms);
}

/// Record reducer latency.
pub fn record_reduce_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_REDUCE_LATENCY).record(latency_ms);
}

/// Record HTTP request latency.
pub fn record_http_latency(start: Instant, endpoint: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "endpoint" => endpoint.to_string()).record(latency_ms);
}

/// Increment connections opened counter.
pub fn inc_connections_opened() {
    counter!(METRIC_CONNECTIONS_OPENED).increment(1);
}

/// Increment frames received counter.
pub fn inc_frames_received() {
    counter!(METRIC_FRAMES_RECEIVED).increment(1);
}

/// Increment frames routed counter for `outcome`.
pub fn inc_frames_routed(outcome: RouteOutcome) {
    counter!(METRIC_FRAMES_ROUTED, "outcome" => outcome.to_string()).increment(1);
}

/// Increment confirmed subscriptions counter.
pub fn inc_subscriptions_confirmed() {
    counter!(METRIC_SUBSCRIPTIONS_CONFIRMED).increment(1);
}

/// Increment resubscribe attempts counter.
pub fn inc_resubscribes() {
    counter!(METRIC_RESUBSCRIBES).increment(1);
}

/// Increment applied snapshots counter.
pub fn inc_snapshots_applied() {
    counter!(METRIC_SNAPSHOTS_APPLIED).increment(1);
}

/// Increment applied deltas counter.
pub fn inc_deltas_applied() {
    counter!(METRIC_DELTAS_APPLIED).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for routing one frame.
pub fn timer_route() -> LatencyTimer {
    LatencyTimer::new(METRIC_ROUTE_LATENCY)
}
