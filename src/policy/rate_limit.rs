//! Fixed-window rate limiting.
//!
//! A window opens on the first check and is reset lazily by the first check
//! that finds it expired. Every check counts, including rejected ones.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

// ============================================================================
// Types
// ============================================================================

/// When an aging window is considered expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEdge {
    /// Expired once `elapsed >= window`.
    Inclusive,
    /// Expired once `elapsed > window`.
    Exclusive,
}

#[derive(Debug, Default)]
struct WindowState {
    start: Option<Instant>,
    count: u32,
}

// ============================================================================
// RateLimiter
// ============================================================================

/// Counter over a fixed window.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    edge: WindowEdge,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` hits per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration, edge: WindowEdge) -> Self {
        Self {
            limit,
            window,
            edge,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Records a hit now. Returns `false` when over the limit.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Records a hit at `now`. Returns `false` when over the limit.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let expired = match state.start {
            None => true,
            Some(start) => {
                let elapsed = now.saturating_duration_since(start);
                match self.edge {
                    WindowEdge::Inclusive => elapsed >= self.window,
                    WindowEdge::Exclusive => elapsed > self.window,
                }
            }
        };
        if expired {
            state.start = Some(now);
            state.count = 0;
        }

        state.count = state.count.saturating_add(1);
        state.count <= self.limit
    }

    /// Returns the configured limit.
    #[inline]
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns the configured window.
    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

// ============================================================================
// Tests
// ============================================================================
