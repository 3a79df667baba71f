//! The relay core.
//!
//! Ties the connection manager, the session registry and the traffic policy
//! to the host's debugger and tabs.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Relay`] | Attach, route, forward and clean up |
//! | [`RelayBuilder`] | Fluent construction |
//! | [`AttachOptions`] | Per-attach switches |
//! | [`ToggleOutcome`] | Result of toggling the active tab |
//! | [`Forwarding`] | Fate of a debugger event |
//! | [`StartupReport`] | Summary of startup maintenance |
//!
//! # Example
//!
//! ```ignore
//! use tab_relay::{Relay, RelayKey};
//!
//! let relay = Relay::builder().bridge(bridge).host(host).build()?;
//! relay.startup().await?;
//!
//! let key = RelayKey::new(18792, "token");
//! relay.ensure_connection(&key).await?;
//! relay.attach_with_retry(tab, &key).await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for relay construction.
pub mod builder;

/// Core relay type and bridge listener.
pub mod core;

mod attach;
mod forwarder;
mod lifecycle;
mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use attach::{AttachOptions, ToggleOutcome};
pub use builder::RelayBuilder;
pub use core::Relay;
pub use forwarder::{DropReason, Forwarding};
pub use lifecycle::StartupReport;
