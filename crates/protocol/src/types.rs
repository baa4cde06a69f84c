use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of the WhatsApp connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    QrReady,
    Connected,
}

impl ConnectionStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::QrReady => "qr_ready",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WhatsApp Web protocol version `[major, minor, patch]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub has_pairing_challenge: bool,
    pub has_persisted_auth: bool,
}

/// Delivery receipt for a sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub success: bool,
    pub message_id: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Result of a registration lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub registered: bool,
    pub canonical_address: String,
}

/// Result of `clear_session`. Failures are reported here, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSessionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClearSessionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Where the bytes of a media message come from.
///
/// Raw bytes travel base64-encoded in JSON; a URL is downloaded by the
/// transport itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaSource {
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Url(String),
}

/// Payload accepted by `send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SendPayload {
    Text {
        text: String,
    },
    Media {
        source: MediaSource,
        mimetype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
}

impl SendPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

pub(crate) mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::QrReady).unwrap(),
            "\"qr_ready\""
        );
        let s: ConnectionStatus = serde_json::from_str("\"disconnected\"").unwrap();
        assert_eq!(s, ConnectionStatus::Disconnected);
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn status_display_matches_wire_name() {
        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::QrReady,
            ConnectionStatus::Connected,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn status_report_camel_case() {
        let report = StatusReport {
            status: ConnectionStatus::Connected,
            last_error: None,
            has_pairing_challenge: false,
            has_persisted_auth: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "connected");
        assert_eq!(json["hasPairingChallenge"], false);
        assert_eq!(json["hasPersistedAuth"], true);
        assert!(json.get("lastError").is_none());
    }

    #[test]
    fn send_receipt_camel_case() {
        let receipt = SendReceipt {
            success: true,
            message_id: "3EB0ABC".into(),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["messageId"], "3EB0ABC");
        assert_eq!(json["timestamp"], 1_700_000_000);
    }

    #[test]
    fn clear_session_failure_carries_error() {
        let json = serde_json::to_value(ClearSessionResult::failed("permission denied")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "permission denied");

        let json = serde_json::to_value(ClearSessionResult::ok()).unwrap();
        assert!(json.get("error").is_none());
    }

    #[test]
    fn media_payload_from_json() {
        let json = serde_json::json!({
            "type": "media",
            "source": {"bytes": "aGVsbG8="},
            "mimetype": "image/jpeg",
            "caption": "invoice",
        });
        let payload: SendPayload = serde_json::from_value(json).unwrap();
        match payload {
            SendPayload::Media {
                source,
                mimetype,
                caption,
                file_name,
            } => {
                assert_eq!(source, MediaSource::Bytes(b"hello".to_vec()));
                assert_eq!(mimetype, "image/jpeg");
                assert_eq!(caption.as_deref(), Some("invoice"));
                assert!(file_name.is_none());
            }
            other => panic!("expected media payload, got {other:?}"),
        }
    }

    #[test]
    fn text_payload_from_json() {
        let payload: SendPayload =
            serde_json::from_value(serde_json::json!({"type": "text", "text": "hi"})).unwrap();
        assert_eq!(payload, SendPayload::text("hi"));
    }

    #[test]
    fn protocol_version_display() {
        assert_eq!(ProtocolVersion([2, 3000, 1015901307]).to_string(), "2.3000.1015901307");
    }
}
