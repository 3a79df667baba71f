//! Collaborator seams implemented by the host browser.
//!
//! | Trait | Role |
//! |-------|------|
//! | [`DebuggerBridge`] | attach, detach, command tabs; emits [`BridgeEvent`]s |
//! | [`TabHost`] | look up, open, close and decorate tabs |

// ============================================================================
// Submodules
// ============================================================================

/// Debugger access.
pub mod debugger;

/// Tab and window access.
pub mod host;

// ============================================================================
// Re-exports
// ============================================================================

pub use debugger::{BridgeEvent, DebugTarget, Debuggee, DebuggerBridge};
pub use host::{Indicator, TabHost, TabInfo, TabStatus, Title};
