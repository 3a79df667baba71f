//! Relay configuration and persisted settings.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RelayConfig`] | Timeouts, retry budgets, limits and restricted origins |
//! | [`SettingsStore`] | Key/value persistence seam |
//! | [`MemorySettings`] | In-memory store |
//! | [`JsonFileSettings`] | JSON file store |
//! | [`Settings`] | Typed accessors over a store |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tab_relay::RelayConfig;
//!
//! let config = RelayConfig::new()
//!     .with_default_port(9222)
//!     .with_connect_timeout(Duration::from_secs(3));
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Relay tunables.
pub mod options;

/// Persisted settings.
pub mod settings;

// ============================================================================
// Re-exports
// ============================================================================

pub use options::{
    DEFAULT_CHAT_BROWSER_PORTS, DEFAULT_RELAY_PORT, RELAY_TOKEN_HEADER, RelayConfig, canvas_url,
};
pub use settings::{
    AttachFailure, FeatureMarker, JsonFileSettings, MemorySettings, Settings, SettingsStore,
    clamp_port,
};
