//! Tab relay - bridges browser tabs to a local debugging relay server.
//!
//! The relay keeps one WebSocket per relay server, attaches the host's
//! debugger to tabs on request, routes debugging commands pushed by the
//! server to the right tab and forwards a filtered, rate-limited stream of
//! debugger events back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  DebuggerBridge   ┌───────────────┐   WebSocket    ┌──────────────┐
//! │  Host tabs   │◄─────────────────►│  Relay        │◄──────────────►│ Relay server │
//! │  + debugger  │  TabHost          │  (this crate) │ 127.0.0.1:PORT │  /extension  │
//! └──────────────┘                   └───────────────┘                └──────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Connections are keyed by `(port, credential)`; concurrent connects coalesce
//! - One session per tab, child sessions tracked separately
//! - Commands and events pass fixed allow-lists
//! - A closed socket tears down every tab bound to it
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tab_relay::{Relay, RelayConfig, Result};
//!
//! async fn run(bridge: Arc<dyn tab_relay::DebuggerBridge>, host: Arc<dyn tab_relay::TabHost>) -> Result<()> {
//!     let relay = Relay::builder()
//!         .config(RelayConfig::default())
//!         .bridge(bridge)
//!         .host(host)
//!         .build()?;
//!
//!     relay.settings().set_gateway_token("secret").await?;
//!     let tab = relay.attach_active_tab(18792).await?;
//!     println!("attached {tab}");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Host seams: [`DebuggerBridge`], [`TabHost`] |
//! | [`config`] | [`RelayConfig`] and persisted [`Settings`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`policy`] | Allow-lists and rate limits |
//! | [`protocol`] | Relay wire messages |
//! | [`relay`] | The [`Relay`] itself |
//! | [`session`] | Tab and session bookkeeping |
//! | [`transport`] | WebSocket connections |

// ============================================================================
// Modules
// ============================================================================

/// Collaborator seams implemented by the host browser.
pub mod bridge;

/// Relay tunables and persisted settings.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Allow-lists and rate limiting.
pub mod policy;

/// Relay wire protocol message types.
pub mod protocol;

/// Relay core.
///
/// Use [`Relay::builder()`] to create an instance.
pub mod relay;

/// Tab session registry.
pub mod session;

/// WebSocket transport layer.
///
/// Internal module handling relay sockets and connection management.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{
    BridgeEvent, DebugTarget, Debuggee, DebuggerBridge, Indicator, TabHost, TabInfo, TabStatus,
    Title,
};

// Config types
pub use config::{JsonFileSettings, MemorySettings, RelayConfig, Settings, SettingsStore};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, RelayKey, RequestId, SessionId, TabId, TargetId};

// Relay types
pub use relay::{
    AttachOptions, DropReason, Forwarding, Relay, RelayBuilder, StartupReport, ToggleOutcome,
};

// Session types
pub use session::{ConnectedTab, SessionRegistry, TabSession};

// Transport types
pub use transport::{CloseReason, ConnectionState, Connector, RelayHealth};
