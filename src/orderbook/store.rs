//! Owner of the live book.
//!
//! Each applied action runs the reducer and swaps a fresh `Arc` in, so a
//! reader holding a previous [`BookStore::current_state`] keeps a complete,
//! consistent book.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use time::OffsetDateTime;
use tracing::{debug, trace};

use super::reducer::reduce_with;
use super::types::{DeltaMode, FeedAction, OrderBookState};
use crate::feed::codec::{FeedData, FeedTags};
use crate::metrics;

#[derive(Debug, Default)]
struct Published {
    state: Arc<OrderBookState>,
    updated_at: Option<OffsetDateTime>,
}

/// Live order book fed by reducer actions.
#[derive(Debug, Default)]
pub struct BookStore {
    mode: DeltaMode,
    published: RwLock<Published>,
}

impl BookStore {
    /// Create an empty store using the given delta merge mode.
    pub fn new(mode: DeltaMode) -> Self {
        Self {
            mode,
            published: RwLock::new(Published::default()),
        }
    }

    /// Delta merge mode in use.
    pub fn mode(&self) -> DeltaMode {
        self.mode
    }

    /// Current book (a clone of the published `Arc`).
    pub fn current_state(&self) -> Arc<OrderBookState> {
        match self.published.read() {
            Ok(published) => Arc::clone(&published.state),
            Err(poisoned) => Arc::clone(&poisoned.into_inner().state),
        }
    }

    /// When the last action was applied, if any.
    pub fn updated_at(&self) -> Option<OffsetDateTime> {
        match self.published.read() {
            Ok(published) => published.updated_at,
            Err(poisoned) => poisoned.into_inner().updated_at,
        }
    }

    /// Reduce `action` into the book and publish the result.
    pub fn apply(&self, action: &FeedAction) -> Arc<OrderBookState> {
        let start = Instant::now();
        let mut published = match self.published.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let next = Arc::new(reduce_with(&published.state, action, self.mode));
        published.state = Arc::clone(&next);
        published.updated_at = Some(OffsetDateTime::now_utc());
        drop(published);

        match action {
            FeedAction::Snapshot { .. } => metrics::inc_snapshots_applied(),
            FeedAction::Delta { .. } => metrics::inc_deltas_applied(),
            FeedAction::Other => {}
        }
        metrics::record_reduce_latency(start);
        trace!(bids = next.bids.len(), asks = next.asks.len(), "Book updated");

        next
    }

    /// Map a routed data frame to an action by its feed tag and apply it.
    ///
    /// Frames with any other tag are ignored and `None` is returned.
    pub fn apply_feed(&self, data: &FeedData, tags: &FeedTags) -> Option<Arc<OrderBookState>> {
        let action = data.to_action(tags)?;
        Some(self.apply(&action))
    }

    /// Discard the book, e.g. when the subscription is torn down.
    pub fn reset(&self) {
        let mut published = match self.published.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *published = Published::default();
        debug!("Book reset");
    }
}
