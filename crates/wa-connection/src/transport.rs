//! Contract between the connection manager and a WhatsApp transport.
//!
//! A transport opens sessions from a protocol version plus auth material,
//! and each session yields an ordered stream of [`TransportEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crmlink_protocol::constants::LOGGED_OUT_STATUS_CODE;
use crmlink_protocol::messages::ConnectionUpdatePayload;
use crmlink_protocol::{ConnectionPhase, KeySnapshot, KeyUpdates, OutboundMessage, ProtocolVersion};

/// Errors from a transport or one of its sessions.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("gateway error {code}: {message}")]
    Gateway { code: i32, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Auth material handed to the transport when a session is opened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    /// Credentials object; `{}` on first run.
    pub creds: serde_json::Value,
    pub keys: KeySnapshot,
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseInfo {
    pub status_code: Option<u16>,
    pub message: String,
}

impl CloseInfo {
    /// Returns `true` when the device was logged out remotely. Every other
    /// close reason is transient.
    pub fn is_logged_out(&self) -> bool {
        self.status_code == Some(LOGGED_OUT_STATUS_CODE)
    }
}

/// A connection update. A single update may carry a QR code, a phase
/// change, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub qr: Option<String>,
    pub connection: Option<ConnectionPhase>,
    /// Set when `connection` is [`ConnectionPhase::Close`].
    pub close: Option<CloseInfo>,
}

impl ConnectionUpdate {
    pub fn qr(code: impl Into<String>) -> Self {
        Self {
            qr: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionPhase::Open),
            ..Default::default()
        }
    }

    pub fn close(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            qr: None,
            connection: Some(ConnectionPhase::Close),
            close: Some(CloseInfo {
                status_code,
                message: message.into(),
            }),
        }
    }
}

impl From<ConnectionUpdatePayload> for ConnectionUpdate {
    fn from(p: ConnectionUpdatePayload) -> Self {
        let close = (p.connection == Some(ConnectionPhase::Close)).then(|| CloseInfo {
            status_code: p.status_code,
            message: p.error.unwrap_or_else(|| "connection closed".into()),
        });
        Self {
            qr: p.qr,
            connection: p.connection,
            close,
        }
    }
}

/// Events emitted by a live session, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionUpdate(ConnectionUpdate),
    /// Partial credential update to merge and persist.
    CredsUpdate(serde_json::Value),
    KeysUpdate(KeyUpdates),
}

/// Receipt for a message accepted by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub id: String,
    /// Unix seconds, when the transport reports one.
    pub timestamp: Option<i64>,
}

/// Registration lookup result from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredAddress {
    pub exists: bool,
    pub jid: String,
}

/// A freshly opened session and its event stream.
pub struct OpenedSession {
    pub session: Arc<dyn Session>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens sessions to WhatsApp.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the latest WhatsApp Web protocol version.
    async fn fetch_latest_version(&self) -> Result<ProtocolVersion, TransportError>;

    /// Opens a new session. The session starts in the connecting phase and
    /// reports progress through its event stream.
    async fn open_session(
        &self,
        version: ProtocolVersion,
        auth: AuthState,
    ) -> Result<OpenedSession, TransportError>;
}

/// A live transport session.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send_message(
        &self,
        jid: &str,
        message: OutboundMessage,
    ) -> Result<SentMessage, TransportError>;

    /// Looks up a JID. `None` when the transport has no answer for it.
    async fn on_whatsapp(&self, jid: &str) -> Result<Option<RegisteredAddress>, TransportError>;

    /// Ends the session without logging out. Never fails.
    async fn end(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_only_for_401() {
        let close = |code| CloseInfo {
            status_code: code,
            message: "closed".into(),
        };
        assert!(close(Some(401)).is_logged_out());
        assert!(!close(Some(515)).is_logged_out());
        assert!(!close(Some(408)).is_logged_out());
        assert!(!close(None).is_logged_out());
    }

    #[test]
    fn update_from_close_payload() {
        let payload = ConnectionUpdatePayload {
            qr: None,
            connection: Some(ConnectionPhase::Close),
            status_code: Some(428),
            error: Some("Connection Closed".into()),
        };
        let update = ConnectionUpdate::from(payload);
        let close = update.close.unwrap();
        assert_eq!(close.status_code, Some(428));
        assert_eq!(close.message, "Connection Closed");
    }

    #[test]
    fn update_from_qr_payload_has_no_close() {
        let payload = ConnectionUpdatePayload {
            qr: Some("2@abc".into()),
            ..Default::default()
        };
        let update = ConnectionUpdate::from(payload);
        assert_eq!(update.qr.as_deref(), Some("2@abc"));
        assert!(update.close.is_none());
        assert!(update.connection.is_none());
    }

    #[test]
    fn close_without_error_gets_default_message() {
        let payload = ConnectionUpdatePayload {
            connection: Some(ConnectionPhase::Close),
            ..Default::default()
        };
        let close = ConnectionUpdate::from(payload).close.unwrap();
        assert_eq!(close.message, "connection closed");
        assert!(close.status_code.is_none());
    }
}
