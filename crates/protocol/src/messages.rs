use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{MediaSource, ProtocolVersion};

/// Signal key material by category, then key id.
pub type KeySnapshot = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Key changes by category, then key id. `None` deletes the key.
pub type KeyUpdates = BTreeMap<String, BTreeMap<String, Option<serde_json::Value>>>;

// ---------------------------------------------------------------------------
// Outbound message content
// ---------------------------------------------------------------------------

/// Message content handed to the transport, one variant per delivery class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Image {
        media: MediaSource,
        mimetype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Video {
        media: MediaSource,
        mimetype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Audio {
        media: MediaSource,
        mimetype: String,
        /// Push-to-talk voice note rather than an audio file attachment.
        voice_note: bool,
    },
    Document {
        media: MediaSource,
        mimetype: String,
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a session on the gateway with the given auth material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    pub version: ProtocolVersion,
    pub creds: serde_json::Value,
    #[serde(default)]
    pub keys: KeySnapshot,
}

/// Sends a message to a normalized JID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub jid: String,
    pub message: OutboundMessage,
}

/// Checks whether a JID is registered on WhatsApp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnWhatsAppRequest {
    pub jid: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Latest protocol version known to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub version: ProtocolVersion,
    #[serde(default)]
    pub is_latest: bool,
}

/// Result of a `send_message` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Result of an `on_whatsapp` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnWhatsAppResponse {
    pub exists: bool,
    pub jid: String,
}

// ---------------------------------------------------------------------------
// Push events
// ---------------------------------------------------------------------------

/// Connection phase reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// A connection update. Every field is optional: a single update may carry
/// only a QR code, only a phase change, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Partial credential update to merge into the stored creds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredsUpdatePayload {
    pub creds: serde_json::Value,
}

/// Signal key writes and deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeysUpdatePayload {
    pub keys: KeyUpdates,
}
