//! Routes inbound data frames of the active subscription to the consumer.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::codec::{decode, FeedData, FeedTags, Inbound};
use super::throttle::Throttle;
use crate::metrics;
use crate::orderbook::ProductId;

/// Consumer callback for routed frames.
pub type FeedHandler = Arc<dyn Fn(FeedData) + Send + Sync>;

/// Shared, replaceable handler registration.
#[derive(Clone, Default)]
pub struct HandlerSlot(Arc<RwLock<Option<FeedHandler>>>);

impl HandlerSlot {
    /// Register (or replace) the handler.
    pub fn set(&self, handler: FeedHandler) {
        match self.0.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    /// Current handler, if any.
    pub fn get(&self) -> Option<FeedHandler> {
        match self.0.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HandlerSlot").field(&self.get().is_some()).finish()
    }
}

/// What happened to a routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RouteOutcome {
    /// Reached the handler.
    Delivered,
    /// Qualified but dropped by the throttle.
    Throttled,
    /// Not a data frame of this subscription.
    Filtered,
    /// Could not be decoded.
    Malformed,
}

/// Filter + throttle for one subscribed product.
#[derive(Debug)]
pub struct MessageRouter {
    product_id: ProductId,
    tags: FeedTags,
    throttle: Throttle,
    handler: HandlerSlot,
}

impl MessageRouter {
    /// Router for `product_id`, delivering at most once per `throttle`.
    pub fn new(product_id: ProductId, tags: FeedTags, throttle: Duration, handler: HandlerSlot) -> Self {
        Self {
            product_id,
            tags,
            throttle: Throttle::new(throttle),
            handler,
        }
    }

    /// Product this router delivers.
    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Route one raw text frame.
    pub fn route(&mut self, text: &str) -> RouteOutcome {
        let _timer = metrics::timer_route();
        let outcome = self.classify(text);
        metrics::inc_frames_routed(outcome);
        outcome
    }

    fn classify(&mut self, text: &str) -> RouteOutcome {
        let data = match decode(text) {
            Ok(Inbound::Data(data)) => data,
            Ok(Inbound::Event(event)) => {
                if event.event == "alert" {
                    warn!(message = ?event.message, "Feed alert");
                }
                return RouteOutcome::Filtered;
            }
            Err(e) => {
                trace!(error = %e, "Dropping undecodable frame");
                return RouteOutcome::Malformed;
            }
        };

        if self.tags.kind_of(&data.feed).is_none() {
            return RouteOutcome::Filtered;
        }
        if data.product_id != self.product_id {
            debug!(
                product_id = %data.product_id,
                active = %self.product_id,
                "Dropping frame for inactive product"
            );
            return RouteOutcome::Filtered;
        }
        let Some(handler) = self.handler.get() else {
            debug!("No feed handler registered");
            return RouteOutcome::Filtered;
        };
        if !self.throttle.allow() {
            return RouteOutcome::Throttled;
        }

        handler(data);
        RouteOutcome::Delivered
    }
}
