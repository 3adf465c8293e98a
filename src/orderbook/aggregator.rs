//! Read-only views derived from a reduced book: spread, limited rows and
//! depth percentages.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::instrument;

use super::types::{OrderBookState, PriceLevelWithTotal};

/// Rows per side shown by default.
pub const DEFAULT_BOOK_DEPTH: usize = 20;

/// Distance between the best bid and the best ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Spread {
    /// Absolute price distance.
    pub amount: Decimal,
    /// Distance as a percentage of the best ask.
    pub percentage: Decimal,
}

/// One displayed row with its depth bar width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthRow {
    /// Price at this level.
    pub price: Decimal,
    /// Size at this level.
    pub size: Decimal,
    /// Running total within the displayed rows.
    pub total: Decimal,
    /// `total` relative to the larger side's displayed total, 0..=100.
    pub depth: u32,
}

/// Top-of-book summary for consumers that only show a few rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookView {
    /// Best bids, highest first.
    pub bids: Vec<DepthRow>,
    /// Best asks, lowest first.
    pub asks: Vec<DepthRow>,
    /// Spread, when both sides have levels.
    pub spread: Option<Spread>,
    /// Larger of the two displayed totals.
    pub highest_total: Decimal,
}

impl BookView {
    /// Build a view of at most `depth` rows per side.
    #[instrument(level = "trace", skip(state))]
    pub fn from_state(state: &OrderBookState, depth: usize) -> Self {
        let (bids, bid_total) = limit_rows(&state.bids, depth);
        let (asks, ask_total) = limit_rows(&state.asks, depth);
        let highest_total = bid_total.max(ask_total);

        let rows = |levels: Vec<PriceLevelWithTotal>| -> Vec<DepthRow> {
            levels
                .into_iter()
                .map(|l| DepthRow {
                    price: l.price,
                    size: l.size,
                    total: l.cumulative_total,
                    depth: depth_percent(l.cumulative_total, highest_total),
                })
                .collect()
        };

        Self {
            bids: rows(bids),
            asks: rows(asks),
            spread: spread(state),
            highest_total,
        }
    }
}

/// Spread between best bid and best ask.
///
/// `None` unless both sides have at least one level.
pub fn spread(state: &OrderBookState) -> Option<Spread> {
    let (bid, ask) = (state.best_bid()?, state.best_ask()?);
    let amount = (ask - bid).abs();
    let percentage = if ask.is_zero() {
        Decimal::ZERO
    } else {
        amount / ask * Decimal::ONE_HUNDRED
    };

    Some(Spread { amount, percentage })
}

/// Calculate the mid price from best bid and ask.
pub fn mid_price(state: &OrderBookState) -> Option<Decimal> {
    match (state.best_bid(), state.best_ask()) {
        (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
        _ => None,
    }
}

/// Keep the first `n` levels of a side.
///
/// Totals are recomputed over the kept rows; the final total is returned
/// alongside (0 for an empty side).
pub fn limit_rows(levels: &[PriceLevelWithTotal], n: usize) -> (Vec<PriceLevelWithTotal>, Decimal) {
    let mut total = Decimal::ZERO;
    let rows = levels
        .iter()
        .take(n)
        .map(|l| {
            total += l.size;
            PriceLevelWithTotal::new(l.price, l.size, total)
        })
        .collect();

    (rows, total)
}

/// Depth bar width: `total / highest_total` as a rounded percentage.
pub fn depth_percent(total: Decimal, highest_total: Decimal) -> u32 {
    if highest_total <= Decimal::ZERO {
        return 0;
    }

    (total / highest_total * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u32()
        .unwrap_or(0)
}
