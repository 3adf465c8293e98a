//! Caller-side reconnection policy.
//!
//! The connection and subscription manager never retry on their own. This
//! supervisor is the caller that does: it keeps one product subscribed,
//! backing off exponentially after failures, until told to stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::subscription::SubscriptionManager;
use crate::metrics;
use crate::orderbook::ProductId;

/// Reconnection configuration.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// How often an established subscription is checked, in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
            check_interval_ms: 500,
        }
    }
}

impl ReconnectConfig {
    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Keep `product_id` subscribed until `shutdown` flips to `true` or its
/// sender is dropped.
///
/// A lost subscription leaves the book at its last good value; the next
/// snapshot replaces it.
pub async fn maintain_subscription(
    manager: Arc<SubscriptionManager>,
    product_id: ProductId,
    throttle: Duration,
    config: ReconnectConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let check_interval = Duration::from_millis(config.check_interval_ms);
    let mut attempt = 0u32;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match manager.subscribe(product_id.clone(), throttle).await {
            Ok(()) => {
                attempt = 0;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(check_interval) => {}
                    }
                    if !manager.state().is_subscribed() {
                        warn!(product_id = %product_id, "Feed subscription lost");
                        break;
                    }
                }
            }
            Err(e) => {
                error!(product_id = %product_id, error = %e, attempt = attempt, "Subscribe failed");
            }
        }

        let delay = config.next_delay(attempt);
        metrics::inc_resubscribes();
        info!(delay_ms = delay.as_millis() as u64, "Resubscribing after delay");
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}
