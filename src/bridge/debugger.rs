//! Host debugging bridge.
//!
//! The relay never talks to a browser directly. It drives tabs through a
//! [`DebuggerBridge`] supplied by the host and receives its callbacks as
//! [`BridgeEvent`]s on a channel.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::identifiers::{SessionId, TabId};

// ============================================================================
// Debuggee
// ============================================================================

/// Addressee of a debugging command: a tab, optionally one of its sub-sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Debuggee {
    /// Tab the session belongs to.
    pub tab_id: TabId,
    /// Sub-session (frame or worker); `None` addresses the tab itself.
    pub session_id: Option<SessionId>,
}

impl Debuggee {
    /// Addresses a tab's main target.
    #[inline]
    #[must_use]
    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id,
            session_id: None,
        }
    }

    /// Addresses a sub-session of a tab.
    #[inline]
    #[must_use]
    pub fn session(tab_id: TabId, session_id: SessionId) -> Self {
        Self {
            tab_id,
            session_id: Some(session_id),
        }
    }
}

// ============================================================================
// DebugTarget
// ============================================================================

/// Debuggable target as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugTarget {
    /// Owning tab; `None` for non-tab targets.
    pub tab_id: Option<TabId>,
    /// Whether any debugger is attached.
    pub attached: bool,
}

// ============================================================================
// BridgeEvent
// ============================================================================

/// Callback from the host bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Debugging event emitted by a tab or one of its sub-sessions.
    Event {
        /// Emitting session.
        source: Debuggee,
        /// Event name.
        method: String,
        /// Event parameters.
        params: Value,
    },

    /// The debugger detached from a tab without being asked.
    Detached {
        /// Affected tab.
        tab_id: TabId,
        /// Host-reported reason (`target_closed`, `canceled_by_user`, ...).
        reason: String,
    },

    /// The tab was closed.
    TabRemoved {
        /// Closed tab.
        tab_id: TabId,
    },
}

// ============================================================================
// DebuggerBridge
// ============================================================================

/// Debugger access provided by the host.
#[async_trait]
pub trait DebuggerBridge: Send + Sync + 'static {
    /// Attaches the debugger to a tab.
    async fn attach(&self, tab: TabId, protocol_version: &str) -> Result<()>;

    /// Detaches the debugger from a tab.
    async fn detach(&self, tab: TabId) -> Result<()>;

    /// Sends a debugging command and returns its result.
    async fn send_command(
        &self,
        target: &Debuggee,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value>;

    /// Lists debuggable targets.
    async fn targets(&self) -> Result<Vec<DebugTarget>>;

    /// Opens a stream of bridge callbacks.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeEvent>;
}

// ============================================================================
// Tests
// ============================================================================
