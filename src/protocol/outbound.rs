//! Messages sent to the relay server.
//!
//! | Variant | Shape |
//! |---------|-------|
//! | `Notice` | `{ "method": "pong" }` |
//! | `Reply` | `{ "id", "result" }` |
//! | `Failure` | `{ "id", "error" }` |
//! | `Request` | `{ "id", "method", "params"? }` |
//! | `Event` | `{ "method": "forwardCDPEvent", "params": { "sessionId"?, "method", "params" } }` |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{RequestId, SessionId};

use super::{FORWARD_EVENT, PONG};

// ============================================================================
// Outbound
// ============================================================================

/// A message for the relay server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    /// Bare method notice (keepalive answer).
    Notice {
        /// Notice name.
        method: String,
    },

    /// Successful command reply.
    Reply {
        /// Echoed command id.
        id: RequestId,
        /// Command result.
        result: Value,
    },

    /// Failed command reply.
    Failure {
        /// Echoed command id.
        id: RequestId,
        /// Error text.
        error: String,
    },

    /// Request expecting a completion.
    Request {
        /// Caller-chosen id.
        id: RequestId,
        /// Method name.
        method: String,
        /// Parameters.
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },

    /// Debugging event.
    Event {
        /// Always `forwardCDPEvent`.
        method: String,
        /// Event payload.
        params: ForwardedEvent,
    },
}

/// Payload of a `forwardCDPEvent` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedEvent {
    /// Owning session; absent on synthetic lifecycle events.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Event name.
    pub method: String,
    /// Event parameters.
    pub params: Value,
}

// ============================================================================
// Constructors
// ============================================================================

impl Outbound {
    /// Keepalive answer.
    #[inline]
    #[must_use]
    pub fn pong() -> Self {
        Self::Notice {
            method: PONG.to_string(),
        }
    }

    /// Successful reply to command `id`.
    #[inline]
    #[must_use]
    pub fn reply(id: RequestId, result: Value) -> Self {
        Self::Reply { id, result }
    }

    /// Failed reply to command `id`.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, error: impl Into<String>) -> Self {
        Self::Failure {
            id,
            error: error.into(),
        }
    }

    /// Request expecting a completion.
    #[inline]
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Event forwarded from a session.
    #[inline]
    #[must_use]
    pub fn event(session_id: SessionId, method: impl Into<String>, params: Value) -> Self {
        Self::Event {
            method: FORWARD_EVENT.to_string(),
            params: ForwardedEvent {
                session_id: Some(session_id),
                method: method.into(),
                params,
            },
        }
    }

    /// Synthetic lifecycle event (no session envelope).
    #[inline]
    #[must_use]
    pub fn lifecycle(method: impl Into<String>, params: Value) -> Self {
        Self::Event {
            method: FORWARD_EVENT.to_string(),
            params: ForwardedEvent {
                session_id: None,
                method: method.into(),
                params,
            },
        }
    }

    /// Serializes to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
