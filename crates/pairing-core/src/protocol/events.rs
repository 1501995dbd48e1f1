//! Events emitted by a protocol client during a pairing session.
//!
//! # Event flow
//!
//! ```text
//! client ──► ClientEvent::Credentials(..)   persisted immediately
//!        ──► ClientEvent::Connection(..)    drives the handshake state machine
//! ```
//!
//! # JSON shape
//!
//! Connection updates use the camelCase field names of the upstream client
//! library, so a daemon can forward them verbatim:
//!
//! ```json
//! {"connection":"close","lastDisconnect":{"error":{"output":{"statusCode":401}}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::credentials::CredentialUpdate;

/// Reason used when a close event carries no usable error payload.
pub const DEFAULT_CLOSE_REASON: &str = "Connection closed before open";

/// Transport state reported by a connection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Error payload attached to a close event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastDisconnect {
    /// Whatever the client reported as the disconnect error.
    ///
    /// Usually an object with `message` and a structured `output` field, but
    /// plain strings are accepted as well.
    #[serde(default)]
    pub error: Option<Value>,

    #[serde(default)]
    pub date: Option<Value>,
}

/// A single connection-state notification.
///
/// Every field is optional: one update may carry only a QR payload, another
/// only the new connection state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionState>,

    /// Scannable QR payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
}

/// How a terminal connection update resolves a pairing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Open,
    Closed { reason: String },
}

impl ConnectionUpdate {
    /// An update that only reports `connection: open`.
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionState::Open),
            ..Self::default()
        }
    }

    /// An update that reports `connection: close` with an optional error.
    pub fn close(error: Option<Value>) -> Self {
        Self {
            connection: Some(ConnectionState::Close),
            last_disconnect: Some(LastDisconnect { error, date: None }),
            ..Self::default()
        }
    }

    /// Returns the resolution this update implies, or `None` for
    /// informational updates (QR, pairing code, `connecting`).
    pub fn resolution(&self) -> Option<Resolution> {
        match self.connection? {
            ConnectionState::Open => Some(Resolution::Open),
            ConnectionState::Close => Some(Resolution::Closed {
                reason: disconnect_reason(self.last_disconnect.as_ref()),
            }),
            ConnectionState::Connecting => None,
        }
    }
}

/// Builds a human-readable close reason.
///
/// Preference order:
///
/// 1. `error.output`, serialised as JSON;
/// 2. the error's string form (`error` itself when it is a string, its
///    `message` field when it has one, otherwise the serialised object);
/// 3. [`DEFAULT_CLOSE_REASON`].
///
/// The result is never empty.
pub fn disconnect_reason(last: Option<&LastDisconnect>) -> String {
    let error = match last.and_then(|l| l.error.as_ref()) {
        Some(Value::Null) | None => return DEFAULT_CLOSE_REASON.to_string(),
        Some(error) => error,
    };

    if let Some(output) = error.get("output").filter(|o| !o.is_null()) {
        return output.to_string();
    }

    let text = match error {
        Value::String(s) => s.clone(),
        other => match other.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => other.to_string(),
        },
    };

    if text.trim().is_empty() {
        DEFAULT_CLOSE_REASON.to_string()
    } else {
        text
    }
}

/// Everything a protocol client can report during a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connection(ConnectionUpdate),
    Credentials(CredentialUpdate),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_open_update() {
        let update: ConnectionUpdate = serde_json::from_value(json!({"connection": "open"})).unwrap();
        assert_eq!(update.resolution(), Some(Resolution::Open));
    }

    #[test]
    fn test_deserialize_camel_case_fields() {
        let update: ConnectionUpdate = serde_json::from_value(json!({
            "pairingCode": "ABCD1234",
            "lastDisconnect": {"error": "boom"}
        }))
        .unwrap();
        assert_eq!(update.pairing_code.as_deref(), Some("ABCD1234"));
        assert!(update.last_disconnect.is_some());
    }

    #[test]
    fn test_connecting_is_not_terminal() {
        let update = ConnectionUpdate {
            connection: Some(ConnectionState::Connecting),
            ..ConnectionUpdate::default()
        };
        assert_eq!(update.resolution(), None);
    }

    #[test]
    fn test_qr_only_update_is_not_terminal() {
        let update = ConnectionUpdate {
            qr: Some("2@abc".into()),
            ..ConnectionUpdate::default()
        };
        assert_eq!(update.resolution(), None);
    }

    #[test]
    fn test_close_reason_prefers_structured_output() {
        // Arrange
        let update = ConnectionUpdate::close(Some(json!({
            "message": "Connection Failure",
            "output": {"statusCode": 401}
        })));

        // Act
        let resolution = update.resolution();

        // Assert
        assert_eq!(
            resolution,
            Some(Resolution::Closed {
                reason: r#"{"statusCode":401}"#.to_string()
            })
        );
    }

    #[test]
    fn test_close_reason_falls_back_to_message() {
        let last = LastDisconnect {
            error: Some(json!({"message": "Stream Errored"})),
            date: None,
        };
        assert_eq!(disconnect_reason(Some(&last)), "Stream Errored");
    }

    #[test]
    fn test_close_reason_uses_plain_string_error() {
        let last = LastDisconnect {
            error: Some(json!("socket hang up")),
            date: None,
        };
        assert_eq!(disconnect_reason(Some(&last)), "socket hang up");
    }

    #[test]
    fn test_close_reason_serialises_unknown_object() {
        let last = LastDisconnect {
            error: Some(json!({"code": 515})),
            date: None,
        };
        assert_eq!(disconnect_reason(Some(&last)), r#"{"code":515}"#);
    }

    #[test]
    fn test_close_reason_defaults_when_missing() {
        assert_eq!(disconnect_reason(None), DEFAULT_CLOSE_REASON);
        assert_eq!(
            disconnect_reason(Some(&LastDisconnect::default())),
            DEFAULT_CLOSE_REASON
        );
    }

    #[test]
    fn test_close_reason_defaults_for_blank_string() {
        let last = LastDisconnect {
            error: Some(json!("  ")),
            date: None,
        };
        assert_eq!(disconnect_reason(Some(&last)), DEFAULT_CLOSE_REASON);
    }

    #[test]
    fn test_close_without_payload_has_non_empty_reason() {
        match ConnectionUpdate::close(None).resolution() {
            Some(Resolution::Closed { reason }) => assert!(!reason.is_empty()),
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_skips_absent_fields() {
        let json = serde_json::to_value(ConnectionUpdate::open()).unwrap();
        assert_eq!(json, json!({"connection": "open"}));
    }
}
