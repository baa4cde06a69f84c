use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// This acts as a read deadline: if *nothing* arrives within this window
/// (no pong, no response, no push event), the gateway connection is
/// considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings to the gateway.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (64 MB, enough for base64 video payloads).
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Timeout for request/response operations.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `send_message` requests.
///
/// Media sends include the upload to the WhatsApp media servers, which is
/// much slower than a plain text relay.
pub const WS_SEND_TIMEOUT: Duration = Duration::from_secs(120);

/// Close status code the transport reports when the linked device was
/// logged out from the phone. Routes to a full credential wipe.
pub const LOGGED_OUT_STATUS_CODE: u16 = 401;

/// Close status code sent right after a successful QR pairing. Transient.
pub const RESTART_REQUIRED_STATUS_CODE: u16 = 515;

/// Server part of an individual-chat JID.
pub const INDIVIDUAL_SERVER: &str = "s.whatsapp.net";

/// Server part of a group JID.
pub const GROUP_SERVER: &str = "g.us";

/// Default fixed delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Gateway message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from manager to gateway
    #[serde(rename = "fetch_version")]
    FetchVersion,
    #[serde(rename = "open_session")]
    OpenSession,
    #[serde(rename = "send_message")]
    SendMessage,
    #[serde(rename = "on_whatsapp")]
    OnWhatsApp,
    #[serde(rename = "end_session")]
    EndSession,

    // Responses from gateway
    #[serde(rename = "version")]
    Version,
    #[serde(rename = "session_opened")]
    SessionOpened,
    #[serde(rename = "message_sent")]
    MessageSent,
    #[serde(rename = "on_whatsapp_result")]
    OnWhatsAppResult,
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,

    // Events from gateway (push notifications)
    #[serde(rename = "connection_update")]
    ConnectionUpdate,
    #[serde(rename = "creds_update")]
    CredsUpdate,
    #[serde(rename = "keys_update")]
    KeysUpdate,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common gateway error codes.
pub const GW_ERR_CODE_NO_SESSION: i32 = 409;
pub const GW_ERR_CODE_INTERNAL: i32 = 500;
