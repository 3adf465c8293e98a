//! Order book types and data structures.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange product identifier, e.g. `PI_XBTUSD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Bitcoin perpetual.
    pub const XBT_USD: &'static str = "PI_XBTUSD";
    /// Ether perpetual.
    pub const ETH_USD: &'static str = "PI_ETHUSD";

    /// Create a product id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl PartialEq<str> for ProductId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Single price level in an order book.
///
/// On the wire a level is a two element array `[price, size]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "(Decimal, Decimal)", into = "(Decimal, Decimal)")]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total size resting at this price.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, size): (Decimal, Decimal)) -> Self {
        Self { price, size }
    }
}

impl From<PriceLevel> for (Decimal, Decimal) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.size)
    }
}

/// Price level with the running depth from the best price outward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevelWithTotal {
    /// Price at this level.
    pub price: Decimal,
    /// Size resting at this price.
    pub size: Decimal,
    /// Sum of sizes of this level and every better-priced level.
    pub cumulative_total: Decimal,
}

impl PriceLevelWithTotal {
    /// Create a level with its running total.
    pub fn new(price: Decimal, size: Decimal, cumulative_total: Decimal) -> Self {
        Self { price, size, cumulative_total }
    }

    /// Drop the running total.
    pub fn level(&self) -> PriceLevel {
        PriceLevel::new(self.price, self.size)
    }
}

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Side {
    /// Buy side, best (highest) price first.
    Bid,
    /// Sell side, best (lowest) price first.
    Ask,
}

/// Reconciled order book.
///
/// Built only by the reducer; every reduction produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBookState {
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevelWithTotal>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevelWithTotal>,
    /// Larger of the two sides' final cumulative totals.
    pub highest_total: Decimal,
}

/// The empty book every subscription starts from.
pub const INITIAL_STATE: OrderBookState = OrderBookState {
    bids: Vec::new(),
    asks: Vec::new(),
    highest_total: Decimal::ZERO,
};

impl Default for OrderBookState {
    fn default() -> Self {
        INITIAL_STATE
    }
}

impl OrderBookState {
    /// Levels of one side.
    pub fn side(&self, side: Side) -> &[PriceLevelWithTotal] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Get the best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get the best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Final running total of the bid side, 0 when empty.
    pub fn bid_total(&self) -> Decimal {
        self.bids.last().map(|l| l.cumulative_total).unwrap_or(Decimal::ZERO)
    }

    /// Final running total of the ask side, 0 when empty.
    pub fn ask_total(&self) -> Decimal {
        self.asks.last().map(|l| l.cumulative_total).unwrap_or(Decimal::ZERO)
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Reducer input.
///
/// Serialized as `{"type": ..., "payload": {...}}`; unknown tags decode to
/// [`FeedAction::Other`], which the reducer ignores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum FeedAction {
    /// Full replacement of both sides.
    Snapshot {
        /// Bid levels in any order.
        bids: Vec<PriceLevel>,
        /// Ask levels in any order.
        asks: Vec<PriceLevel>,
    },
    /// Changed levels only.
    Delta {
        /// Changed bid levels.
        #[serde(default)]
        bids: Vec<PriceLevel>,
        /// Changed ask levels.
        #[serde(default)]
        asks: Vec<PriceLevel>,
    },
    /// Any other action tag.
    #[serde(other)]
    Other,
}

/// How a delta's size combines with the stored size at the same price.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeltaMode {
    /// Incoming size is the absolute size at that price.
    #[default]
    Replace,
    /// Incoming size is added to the stored size.
    Additive,
}
