//! Traffic policy: allow-lists and rate limits.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Allowlist`] | Fixed command and event name sets |
//! | [`RateLimiter`] | Lazily reset fixed window counter |

// ============================================================================
// Submodules
// ============================================================================

/// Command and event allow-lists.
pub mod allowlist;

/// Fixed-window rate limiter.
pub mod rate_limit;

// ============================================================================
// Re-exports
// ============================================================================

pub use allowlist::{ALLOWED_COMMANDS, ALLOWED_EVENTS, Allowlist, FEATURE_VERSION};
pub use rate_limit::{RateLimiter, WindowEdge};
