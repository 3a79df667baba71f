//! Messages received from the relay server.
//!
//! Three shapes are recognized; anything else is ignored.
//!
//! Keepalive:
//! ```json
//! { "method": "ping" }
//! ```
//!
//! Completion of a request this side sent:
//! ```json
//! { "id": 7, "result": { ... } }
//! { "id": 7, "error": "message" }
//! ```
//!
//! Command pushed by the server:
//! ```json
//! {
//!   "id": 8,
//!   "method": "forwardCDPCommand",
//!   "params": { "method": "Page.navigate", "params": { ... }, "sessionId": "cb-tab-1" }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use crate::error::Result;
use crate::identifiers::{RequestId, SessionId, TargetId};

use super::{FORWARD_COMMAND, PING};

// ============================================================================
// Inbound
// ============================================================================

/// A parsed relay message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Keepalive probe; answer with a pong.
    Ping,

    /// Completion of an outstanding request.
    Completion {
        /// Id of the completed request.
        id: RequestId,
        /// Result value, or the error text sent by the server.
        outcome: std::result::Result<Value, String>,
    },

    /// Debugging command to execute against a tab.
    Command {
        /// Id to echo in the reply.
        id: RequestId,
        /// The command itself.
        command: ForwardedCommand,
    },

    /// Valid JSON of no interest.
    Ignored,
}

impl Inbound {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the frame is not JSON.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(msg) = value else {
            return Ok(Self::Ignored);
        };

        if msg.get("method").and_then(Value::as_str) == Some(PING) {
            return Ok(Self::Ping);
        }

        let Some(id) = msg.get("id").and_then(Value::as_u64).map(RequestId::new) else {
            return Ok(Self::Ignored);
        };

        if msg.contains_key("result") || msg.contains_key("error") {
            return Ok(Self::Completion {
                id,
                outcome: completion_outcome(&msg),
            });
        }

        if msg.get("method").and_then(Value::as_str) == Some(FORWARD_COMMAND) {
            let params = msg.get("params").unwrap_or(&Value::Null);
            return Ok(Self::Command {
                id,
                command: ForwardedCommand::from_params(params),
            });
        }

        Ok(Self::Ignored)
    }
}

/// A falsy `error` (null, false, 0, "") counts as success.
fn completion_outcome(msg: &Map<String, Value>) -> std::result::Result<Value, String> {
    let error = msg.get("error").filter(|e| is_truthy(e));
    match error {
        Some(Value::String(text)) => Err(text.clone()),
        Some(other) => Err(other.to_string()),
        None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// ForwardedCommand
// ============================================================================

/// A debugging command pushed by the relay server.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedCommand {
    /// Method name, trimmed.
    pub method: String,
    /// Method parameters; absent or falsy parameters are `None`.
    pub params: Option<Value>,
    /// Session the command addresses.
    pub session_id: Option<SessionId>,
}

impl ForwardedCommand {
    /// Creates a command.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, session_id: Option<SessionId>) -> Self {
        Self {
            method: method.into().trim().to_string(),
            params,
            session_id,
        }
    }

    /// Reads a command from the `params` object of a `forwardCDPCommand` frame.
    ///
    /// Missing or mistyped fields are tolerated; the allow-list check
    /// rejects an empty method later.
    #[must_use]
    pub fn from_params(raw: &Value) -> Self {
        let method = raw
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let params = raw.get("params").filter(|p| is_truthy(p)).cloned();
        let session_id = raw
            .get("sessionId")
            .and_then(Value::as_str)
            .map(SessionId::new);

        Self::new(method, params, session_id)
    }

    /// Returns a string field of the parameters.
    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.as_ref()?.get(name)?.as_str()
    }

    /// Returns `params.targetId` when it is a string.
    #[must_use]
    pub fn target_id(&self) -> Option<TargetId> {
        self.param_str("targetId").map(TargetId::new)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_ping() {
        assert_eq!(Inbound::parse(r#"{"method":"ping"}"#).unwrap(), Inbound::Ping);
    }

    #[test]
    fn test_parse_result() {
        let msg = Inbound::parse(r#"{"id":3,"result":{"ok":true}}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Completion {
                id: RequestId::new(3),
                outcome: Ok(json!({"ok": true})),
            }
        );
    }

    #[test]
    fn test_parse_error() {
        let msg = Inbound::parse(r#"{"id":3,"error":"nope"}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Completion {
                id: RequestId::new(3),
                outcome: Err("nope".to_string()),
            }
        );
    }

    #[test]
    fn test_empty_error_is_success() {
        let msg = Inbound::parse(r#"{"id":3,"error":"","result":1}"#).unwrap();
        assert!(matches!(msg, Inbound::Completion { outcome: Ok(_), .. }));
    }

    #[test]
    fn test_parse_command() {
        let msg = Inbound::parse(
            r#"{"id":9,"method":"forwardCDPCommand","params":{"method":" Page.navigate ","params":{"url":"https://a.test"},"sessionId":"cb-tab-1"}}"#,
        )
        .unwrap();

        let Inbound::Command { id, command } = msg else {
            panic!("expected command");
        };
        assert_eq!(id, RequestId::new(9));
        assert_eq!(command.method, "Page.navigate");
        assert_eq!(command.param_str("url"), Some("https://a.test"));
        assert_eq!(command.session_id, Some(SessionId::new("cb-tab-1")));
    }

    #[test]
    fn test_command_tolerates_missing_fields() {
        let command = ForwardedCommand::from_params(&json!({ "sessionId": 5, "params": null }));
        assert_eq!(command.method, "");
        assert!(command.params.is_none());
        assert!(command.session_id.is_none());
    }

    #[test]
    fn test_target_id_must_be_string() {
        let command = ForwardedCommand::new("Target.closeTarget", Some(json!({"targetId": 1})), None);
        assert!(command.target_id().is_none());
    }

    #[test]
    fn test_ignored_shapes() {
        assert_eq!(Inbound::parse("[]").unwrap(), Inbound::Ignored);
        assert_eq!(Inbound::parse(r#"{"id":"x","result":1}"#).unwrap(), Inbound::Ignored);
        assert_eq!(Inbound::parse(r#"{"id":1,"method":"other"}"#).unwrap(), Inbound::Ignored);
        assert!(Inbound::parse("not json").is_err());
    }
}
