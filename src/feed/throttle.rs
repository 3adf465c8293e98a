//! Leading-edge throttle.
//!
//! The first call in a window goes through immediately; later calls inside
//! the window are dropped, not queued. This bounds the handler rate under a
//! flood of deltas without building a backlog.

use std::time::Duration;

use tokio::time::Instant;

/// Leading-edge rate limiter state.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_call: Option<Instant>,
}

impl Throttle {
    /// Create a throttle with the given window. A zero window never drops.
    pub fn new(window: Duration) -> Self {
        Self { window, last_call: None }
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a call made now may pass.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Whether a call made at `now` may pass. Passing calls open a new window.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_call {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_call = Some(now);
        true
    }
}
