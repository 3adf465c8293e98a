//! Pure order book reducer.
//!
//! Folds snapshot and delta actions into an [`OrderBookState`]. Nothing here
//! performs I/O or mutates its input; each call returns a fresh state.
//! An update whose sizes or totals would overflow `Decimal` is dropped and
//! the input state returned as is.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::warn;

use super::types::{DeltaMode, FeedAction, OrderBookState, PriceLevel, PriceLevelWithTotal, Side};

/// Reduce with absolute (replace) delta semantics.
pub fn reduce(state: &OrderBookState, action: &FeedAction) -> OrderBookState {
    reduce_with(state, action, DeltaMode::Replace)
}

/// Reduce with an explicit delta merge mode.
pub fn reduce_with(state: &OrderBookState, action: &FeedAction, mode: DeltaMode) -> OrderBookState {
    let next = match action {
        FeedAction::Snapshot { bids, asks } => {
            with_totals(bids, Side::Bid).zip(with_totals(asks, Side::Ask))
        }
        FeedAction::Delta { bids, asks } => {
            if bids.is_empty() && asks.is_empty() {
                return state.clone();
            }
            apply_delta_side(&state.bids, bids, mode, Side::Bid)
                .zip(apply_delta_side(&state.asks, asks, mode, Side::Ask))
        }
        FeedAction::Other => return state.clone(),
    };

    match next {
        Some((bids, asks)) => build_state(bids, asks),
        None => {
            warn!("Dropping book update: sizes overflow");
            state.clone()
        }
    }
}

fn apply_delta_side(
    existing: &[PriceLevelWithTotal],
    updates: &[PriceLevel],
    mode: DeltaMode,
    side: Side,
) -> Option<Vec<PriceLevelWithTotal>> {
    if updates.is_empty() {
        return Some(existing.to_vec());
    }
    with_totals(&merge_levels(existing, updates, mode)?, side)
}

fn build_state(bids: Vec<PriceLevelWithTotal>, asks: Vec<PriceLevelWithTotal>) -> OrderBookState {
    let bid_total = bids.last().map(|l| l.cumulative_total).unwrap_or(Decimal::ZERO);
    let ask_total = asks.last().map(|l| l.cumulative_total).unwrap_or(Decimal::ZERO);

    OrderBookState {
        bids,
        asks,
        highest_total: bid_total.max(ask_total),
    }
}

/// Apply delta levels on top of an existing side.
///
/// Output is unsorted and may contain non-positive sizes; [`with_totals`]
/// normalizes it. `None` if an additive merge overflows.
pub fn merge_levels(
    existing: &[PriceLevelWithTotal],
    updates: &[PriceLevel],
    mode: DeltaMode,
) -> Option<Vec<PriceLevel>> {
    let mut by_price: BTreeMap<Decimal, Decimal> =
        existing.iter().map(|l| (l.price, l.size)).collect();

    for update in updates {
        match mode {
            DeltaMode::Replace => {
                by_price.insert(update.price, update.size);
            }
            DeltaMode::Additive => {
                let size = by_price.entry(update.price).or_insert(Decimal::ZERO);
                *size = size.checked_add(update.size)?;
            }
        }
    }

    Some(
        by_price
            .into_iter()
            .map(|(price, size)| PriceLevel::new(price, size))
            .collect(),
    )
}

/// Sort levels best price first, drop non-positive sizes, and attach the
/// running total.
///
/// Duplicate prices collapse to the last occurrence. `None` if the running
/// total overflows.
pub fn with_totals(levels: &[PriceLevel], side: Side) -> Option<Vec<PriceLevelWithTotal>> {
    let by_price: BTreeMap<Decimal, Decimal> = levels
        .iter()
        .map(|l| (l.price, l.size))
        .collect();

    let positive = by_price.into_iter().filter(|(_, size)| *size > Decimal::ZERO);
    let ordered: Vec<(Decimal, Decimal)> = match side {
        Side::Bid => positive.rev().collect(),
        Side::Ask => positive.collect(),
    };

    let mut total = Decimal::ZERO;
    ordered
        .into_iter()
        .map(|(price, size)| {
            total = total.checked_add(size)?;
            Some(PriceLevelWithTotal::new(price, size, total))
        })
        .collect()
}
