//! Order book module.
//!
//! This module handles:
//! - Order book types and data structures
//! - The pure snapshot/delta reducer
//! - The live book store and derived depth views

pub mod aggregator;
pub mod reducer;
pub mod store;
pub mod types;

pub use aggregator::{depth_percent, limit_rows, mid_price, spread, BookView, Spread};
pub use reducer::{reduce, reduce_with};
pub use store::BookStore;
pub use types::{
    DeltaMode, FeedAction, OrderBookState, PriceLevel, PriceLevelWithTotal, ProductId, Side,
    INITIAL_STATE,
};
