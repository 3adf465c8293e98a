//! Application configuration loaded from environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::feed::codec::{FeedTags, DEFAULT_DELTA_TAG, DEFAULT_FEED, DEFAULT_SNAPSHOT_TAG};
use crate::orderbook::{DeltaMode, ProductId};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // === Feed ===
    /// WebSocket endpoint of the book feed.
    #[serde(default = "default_ws_url")]
    pub book_ws_url: String,

    /// Feed named in subscribe/unsubscribe commands.
    #[serde(default = "default_feed_name")]
    pub feed_name: String,

    /// `feed` tag of snapshot frames.
    #[serde(default = "default_snapshot_tag")]
    pub feed_type_snapshot: String,

    /// `feed` tag of delta frames.
    #[serde(default = "default_delta_tag")]
    pub feed_type_delta: String,

    /// Product subscribed on startup.
    #[serde(default = "default_product_id")]
    pub product_id: ProductId,

    // === Timing ===
    /// Throttle window for routed frames in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Confirmation (and close handshake) timeout in milliseconds.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    // === Book ===
    /// How deltas merge into existing levels.
    #[serde(default)]
    pub delta_mode: DeltaMode,

    /// Rows per side shown by the book view.
    #[serde(default = "default_book_depth")]
    pub book_depth: usize,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_ws_url() -> String {
    "wss://www.cryptofacilities.com/ws/v1".to_string()
}

fn default_feed_name() -> String {
    DEFAULT_FEED.to_string()
}

fn default_snapshot_tag() -> String {
    DEFAULT_SNAPSHOT_TAG.to_string()
}

fn default_delta_tag() -> String {
    DEFAULT_DELTA_TAG.to_string()
}

fn default_product_id() -> ProductId {
    ProductId::new(ProductId::XBT_USD)
}

fn default_throttle_ms() -> u64 {
    1000
}

fn default_confirm_timeout_ms() -> u64 {
    10_000
}

fn default_book_depth() -> usize {
    crate::orderbook::aggregator::DEFAULT_BOOK_DEPTH
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            book_ws_url: default_ws_url(),
            feed_name: default_feed_name(),
            feed_type_snapshot: default_snapshot_tag(),
            feed_type_delta: default_delta_tag(),
            product_id: default_product_id(),
            throttle_ms: default_throttle_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            delta_mode: DeltaMode::default(),
            book_depth: default_book_depth(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        let url = Url::parse(&self.book_ws_url)
            .map_err(|e| format!("BOOK_WS_URL is not a valid URL: {e}"))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(format!(
                "BOOK_WS_URL must use ws:// or wss://, got {}://",
                url.scheme()
            ));
        }

        if self.feed_name.is_empty() {
            return Err("FEED_NAME must not be empty".to_string());
        }

        if self.feed_type_snapshot.is_empty() || self.feed_type_delta.is_empty() {
            return Err("FEED_TYPE_SNAPSHOT and FEED_TYPE_DELTA must not be empty".to_string());
        }

        if self.feed_type_snapshot == self.feed_type_delta {
            return Err("FEED_TYPE_SNAPSHOT and FEED_TYPE_DELTA must differ".to_string());
        }

        if self.product_id.as_str().is_empty() {
            return Err("PRODUCT_ID is required".to_string());
        }

        if self.confirm_timeout_ms == 0 {
            return Err("CONFIRM_TIMEOUT_MS must be greater than 0".to_string());
        }

        if self.book_depth == 0 {
            return Err("BOOK_DEPTH must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Validate, turning a failure into [`AppError::InvalidConfig`].
    pub fn validated(self) -> crate::Result<Self> {
        self.validate().map_err(AppError::InvalidConfig)?;
        Ok(self)
    }

    /// Tracing filter directive. `--verbose` or `VERBOSE=true` turns on
    /// debug output for this crate; otherwise `RUST_LOG` applies.
    pub fn log_directive(&self, verbose: bool) -> String {
        if verbose || self.verbose {
            "book_feed=debug,info".to_string()
        } else {
            self.rust_log.clone()
        }
    }

    /// Feed names used on the wire.
    pub fn tags(&self) -> FeedTags {
        FeedTags {
            feed: self.feed_name.clone(),
            snapshot: self.feed_type_snapshot.clone(),
            delta: self.feed_type_delta.clone(),
        }
    }

    /// Router throttle window.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Confirmation timeout.
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}
