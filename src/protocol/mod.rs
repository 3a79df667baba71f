//! Relay wire protocol.
//!
//! JSON text frames exchanged with the relay server.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `ping` / `pong` | Server → Local → Server | Keepalive |
//! | `forwardCDPCommand` | Server → Local | Debugging command for a tab |
//! | `{id, result}` / `{id, error}` | Both | Completion of a request |
//! | `forwardCDPEvent` | Local → Server | Debugging event from a tab |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `inbound` | Parsing of server frames |
//! | `outbound` | Frames sent to the server |

// ============================================================================
// Submodules
// ============================================================================

/// Server-to-local messages.
pub mod inbound;

/// Local-to-server messages.
pub mod outbound;

// ============================================================================
// Constants
// ============================================================================

/// Keepalive probe method.
pub const PING: &str = "ping";

/// Keepalive answer method.
pub const PONG: &str = "pong";

/// Method of server-pushed debugging commands.
pub const FORWARD_COMMAND: &str = "forwardCDPCommand";

/// Method of forwarded debugging events.
pub const FORWARD_EVENT: &str = "forwardCDPEvent";

// ============================================================================
// Re-exports
// ============================================================================

pub use inbound::{ForwardedCommand, Inbound};
pub use outbound::{ForwardedEvent, Outbound};
