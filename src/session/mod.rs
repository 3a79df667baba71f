//! Tab session state.

// ============================================================================
// Submodules
// ============================================================================

/// Session registry and attach guard.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use registry::{
    AttachGuard, ConnectedTab, SessionKind, SessionRegistry, TabSession, TabState,
};
