//! Unified error types for the order book feed.

use thiserror::Error;

use crate::feed::codec::Confirmation;
use crate::orderbook::ProductId;

/// Unified error type for the application layer.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Feed connection or subscription error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// WebSocket feed errors.
///
/// `Parse` never leaves the router: malformed frames are dropped. Every
/// other variant is surfaced to the caller of the pending operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Opening the socket failed, or the socket reported an error.
    #[error("websocket connection failed: {0}")]
    Connection(String),

    /// The socket closed while an operation was waiting on it.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// No confirmation arrived within the configured timeout.
    #[error("timed out after {timeout_ms}ms waiting for {confirmation} confirmation of {product_id}")]
    ConfirmationTimeout {
        /// What was being waited for.
        confirmation: Confirmation,
        /// Product the command was issued for.
        product_id: ProductId,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The close handshake did not complete within the timeout.
    #[error("timed out after {timeout_ms}ms waiting for the websocket to close")]
    CloseTimeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// A send was attempted while the socket is not open.
    #[error("websocket is not connected")]
    NotConnected,

    /// A frame could not be decoded.
    #[error("failed to parse websocket message: {0}")]
    Parse(String),
}

impl FeedError {
    /// Whether this error means the feed is no longer usable.
    ///
    /// Callers treat these as "feed inactive" and decide whether to retry.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            FeedError::Connection(_)
                | FeedError::ConnectionClosed { .. }
                | FeedError::ConfirmationTimeout { .. }
                | FeedError::CloseTimeout { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Parse(e.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
