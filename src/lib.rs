//! Live order book client.
//!
//! Connects to a WebSocket book feed, subscribes one product at a time and
//! reconciles its snapshot and delta frames into a sorted, depth-aggregated
//! book.
//!
//! # Pipeline
//!
//! ```text
//! socket ─▶ FeedConnection ─▶ MessageRouter (product filter + throttle)
//!                                   │
//!                                   ▼
//!                         handler ─▶ BookStore ─▶ reduce(state, action)
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`feed`]: Wire codec, connection, subscriptions, routing and throttling
//! - [`orderbook`]: Book types, the pure reducer, the live store and views
//! - [`metrics`]: Prometheus counters and latency histograms
//! - [`api`]: HTTP API for health, status, book and metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod orderbook;
pub mod utils;

pub use config::Config;
pub use error::{AppError, FeedError, Result};
pub use feed::{SubscriptionManager, SubscriptionState};
pub use orderbook::{reduce, BookStore, FeedAction, OrderBookState, INITIAL_STATE};
