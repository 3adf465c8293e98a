//! Wire format of the book feed.
//!
//! Outbound commands:
//! `{"event":"subscribe","feed":"book_ui_1","product_ids":["PI_XBTUSD"]}`
//!
//! Inbound frames are either events (`info`, `subscribed`, `unsubscribed`,
//! `alert`, ...) or data frames carrying a `product_id` and `[price, size]`
//! level arrays.

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::orderbook::{FeedAction, PriceLevel, ProductId};

/// Default command feed.
pub const DEFAULT_FEED: &str = "book_ui_1";
/// Default snapshot data tag.
pub const DEFAULT_SNAPSHOT_TAG: &str = "book_ui_1_snapshot";
/// Default delta data tag.
pub const DEFAULT_DELTA_TAG: &str = "book_ui_1";

/// Feed names used on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTags {
    /// Feed named in commands and confirmations.
    pub feed: String,
    /// `feed` value of snapshot data frames.
    pub snapshot: String,
    /// `feed` value of delta data frames.
    pub delta: String,
}

impl Default for FeedTags {
    fn default() -> Self {
        Self {
            feed: DEFAULT_FEED.to_string(),
            snapshot: DEFAULT_SNAPSHOT_TAG.to_string(),
            delta: DEFAULT_DELTA_TAG.to_string(),
        }
    }
}

/// Kind of a data frame, by its feed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FeedKind {
    /// Full book.
    Snapshot,
    /// Changed levels.
    Delta,
}

impl FeedTags {
    /// Classify a data frame's feed tag.
    pub fn kind_of(&self, feed: &str) -> Option<FeedKind> {
        if feed == self.snapshot {
            Some(FeedKind::Snapshot)
        } else if feed == self.delta {
            Some(FeedKind::Delta)
        } else {
            None
        }
    }
}

/// Server acknowledgement of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Confirmation {
    /// `{"event":"subscribed"}`.
    Subscribed,
    /// `{"event":"unsubscribed"}`.
    Unsubscribed,
}

/// Outbound command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandEvent {
    /// Start receiving a product.
    Subscribe,
    /// Stop receiving a product.
    Unsubscribe,
}

/// Outbound subscription command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Verb.
    pub event: CommandEvent,
    /// Feed the command applies to.
    pub feed: String,
    /// Exactly one product in practice.
    pub product_ids: Vec<ProductId>,
}

impl Command {
    /// `subscribe` command for one product.
    pub fn subscribe(feed: &str, product_id: &ProductId) -> Self {
        Self {
            event: CommandEvent::Subscribe,
            feed: feed.to_string(),
            product_ids: vec![product_id.clone()],
        }
    }

    /// `unsubscribe` command for one product.
    pub fn unsubscribe(feed: &str, product_id: &ProductId) -> Self {
        Self {
            event: CommandEvent::Unsubscribe,
            feed: feed.to_string(),
            product_ids: vec![product_id.clone()],
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, FeedError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server event frame (confirmations, info, alerts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name, e.g. `subscribed`.
    pub event: String,
    /// Feed the event refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    /// Products the event refers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_ids: Vec<ProductId>,
    /// Human readable detail (alerts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventFrame {
    /// Confirmation frame as the server sends it.
    pub fn confirmation(confirmation: Confirmation, feed: &str, product_id: &ProductId) -> Self {
        Self {
            event: confirmation.to_string(),
            feed: Some(feed.to_string()),
            product_ids: vec![product_id.clone()],
            message: None,
        }
    }

    /// Whether this frame confirms `confirmation` for `product_id` on `feed`.
    ///
    /// Only the first product id is compared.
    pub fn confirms(&self, confirmation: Confirmation, feed: &str, product_id: &ProductId) -> bool {
        self.event == confirmation.to_string()
            && self.feed.as_deref() == Some(feed)
            && self.product_ids.first() == Some(product_id)
    }
}

/// Book data frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedData {
    /// Snapshot or delta tag.
    pub feed: String,
    /// Product the levels belong to.
    pub product_id: ProductId,
    /// Depth of a snapshot.
    #[serde(rename = "numLevels", default, skip_serializing_if = "Option::is_none")]
    pub num_levels: Option<u32>,
    /// Bid levels.
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// Ask levels.
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl FeedData {
    /// Reducer action for this frame, `None` for unknown tags.
    pub fn to_action(&self, tags: &FeedTags) -> Option<FeedAction> {
        let (bids, asks) = (self.bids.clone(), self.asks.clone());
        match tags.kind_of(&self.feed)? {
            FeedKind::Snapshot => Some(FeedAction::Snapshot { bids, asks }),
            FeedKind::Delta => Some(FeedAction::Delta { bids, asks }),
        }
    }
}

/// Any decodable inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    /// Has an `event` field.
    Event(EventFrame),
    /// Has `feed` and `product_id` fields.
    Data(FeedData),
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Inbound, FeedError> {
    serde_json::from_str(text).map_err(|e| FeedError::Parse(e.to_string()))
}

/// Whether `text` is the confirmation being waited for.
///
/// Frames that fail to decode or confirm something else simply don't match.
pub fn is_confirmation(
    text: &str,
    confirmation: Confirmation,
    feed: &str,
    product_id: &ProductId,
) -> bool {
    matches!(decode(text), Ok(Inbound::Event(frame)) if frame.confirms(confirmation, feed, product_id))
}
