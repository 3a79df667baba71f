//! Forwarding of debugger events to the relay server.

use serde_json::Value;
use tracing::trace;

use crate::bridge::Debuggee;
use crate::identifiers::SessionId;
use crate::protocol::Outbound;

use super::core::Relay;

// ============================================================================
// Types
// ============================================================================

/// What happened to a debugger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    /// Sent to the tab's relay server.
    Forwarded,
    /// Not sent.
    Dropped(DropReason),
}

/// Why an event was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The tab is not attached.
    Untracked,
    /// The event is not on the allow-list.
    NotAllowed,
    /// The global event budget is spent.
    RateLimited,
    /// The relay socket is not open.
    SendFailed,
}

/// `params.sessionId` as a session id; numbers are stringified.
fn child_session(params: &Value) -> Option<SessionId> {
    match params.get("sessionId")? {
        Value::String(s) if !s.is_empty() => Some(SessionId::new(s.as_str())),
        Value::Number(n) => Some(SessionId::new(n.to_string())),
        _ => None,
    }
}

// ============================================================================
// Relay - Events
// ============================================================================

impl Relay {
    /// Forwards a debugger event from `source` to the relay owning its tab.
    ///
    /// Checks run in order: attached tab, allow-list, rate limit. A dropped
    /// event does not consume budget unless it got past the allow-list.
    pub fn forward_event(&self, source: &Debuggee, method: &str, params: Value) -> Forwarding {
        let tab = source.tab_id;
        let Some((key, connected)) = self.inner.registry.connected(tab) else {
            return Forwarding::Dropped(DropReason::Untracked);
        };

        if !self.inner.allowlist.allows_event(method) {
            return Forwarding::Dropped(DropReason::NotAllowed);
        }

        if !self.inner.event_limiter.try_acquire() {
            trace!(tab = %tab, method, "Event dropped by rate limit");
            return Forwarding::Dropped(DropReason::RateLimited);
        }

        match method {
            "Target.attachedToTarget" => {
                if let Some(child) = child_session(&params) {
                    self.inner.registry.register_child(child, tab);
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(child) = child_session(&params) {
                    self.inner.registry.remove_child(child.as_str());
                }
            }
            _ => {}
        }

        let session_id = source
            .session_id
            .clone()
            .unwrap_or(connected.session_id);
        let message = Outbound::event(session_id, method, params);

        match self.inner.manager.send(&key, &message) {
            Ok(()) => Forwarding::Forwarded,
            Err(e) => {
                trace!(tab = %tab, method, error = %e, "Event not sent");
                Forwarding::Dropped(DropReason::SendFailed)
            }
        }
    }
}
