//! [`Transport`] backed by a WhatsApp Web gateway spoken to over WebSocket.
//!
//! Each session gets its own socket. Requests and responses share the
//! envelope from `crmlink_protocol`; connection, creds and keys updates
//! arrive as push frames and are forwarded to the session's event stream.
//! Losing the socket surfaces as a transient close.

pub mod client;
mod pumps;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crmlink_protocol::constants::{MessageType, WS_REQUEST_TIMEOUT, WS_SEND_TIMEOUT};
use crmlink_protocol::envelope::Message;
use crmlink_protocol::messages::{
    ConnectionUpdatePayload, CredsUpdatePayload, KeysUpdatePayload, MessageSentResponse,
    OnWhatsAppRequest, OnWhatsAppResponse, OpenSessionRequest, SendMessageRequest,
    VersionResponse,
};
use crmlink_protocol::{OutboundMessage, ProtocolVersion};

use crate::transport::{
    AuthState, ConnectionUpdate, OpenedSession, RegisteredAddress, SentMessage, Session,
    Transport, TransportError, TransportEvent,
};

pub use client::GatewayClient;

/// Close message reported when the gateway socket goes away.
const GATEWAY_LOST: &str = "gateway connection lost";

/// Opens WhatsApp sessions through the gateway at `url`.
#[derive(Debug, Clone)]
pub struct GatewayTransport {
    url: String,
}

impl GatewayTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn fetch_latest_version(&self) -> Result<ProtocolVersion, TransportError> {
        let client = GatewayClient::connect(&self.url).await?;
        let result = client
            .send_request::<()>(MessageType::FetchVersion, None, WS_REQUEST_TIMEOUT)
            .await
            .and_then(|resp| expect_payload::<VersionResponse>(&resp, MessageType::Version));
        client.close().await;

        let resp = result?;
        debug!(version = %resp.version, is_latest = resp.is_latest, "fetched protocol version");
        Ok(resp.version)
    }

    async fn open_session(
        &self,
        version: ProtocolVersion,
        auth: AuthState,
    ) -> Result<OpenedSession, TransportError> {
        let client = GatewayClient::connect(&self.url).await?;
        let (events_tx, events) = mpsc::unbounded_channel();

        // Wire both callbacks before the request so no push is missed.
        let push_tx = events_tx.clone();
        client
            .set_event_callback(Box::new(move |msg| {
                if let Some(event) = map_push_event(&msg) {
                    let _ = push_tx.send(event);
                }
            }))
            .await;
        client
            .set_disconnect_callback(Box::new(move || {
                let _ = events_tx.send(TransportEvent::ConnectionUpdate(ConnectionUpdate::close(
                    None,
                    GATEWAY_LOST,
                )));
            }))
            .await;

        let request = OpenSessionRequest {
            version,
            creds: auth.creds,
            keys: auth.keys,
        };
        let opened = client
            .send_request(MessageType::OpenSession, Some(&request), WS_REQUEST_TIMEOUT)
            .await
            .and_then(|resp| expect_type(&resp, MessageType::SessionOpened));
        if let Err(e) = opened {
            client.close().await;
            return Err(e);
        }
        debug!(%version, "gateway session opened");

        Ok(OpenedSession {
            session: Arc::new(GatewaySession { client }),
            events,
        })
    }
}

/// A session living on one gateway socket.
pub struct GatewaySession {
    client: GatewayClient,
}

#[async_trait]
impl Session for GatewaySession {
    async fn send_message(
        &self,
        jid: &str,
        message: OutboundMessage,
    ) -> Result<SentMessage, TransportError> {
        let request = SendMessageRequest {
            jid: jid.to_string(),
            message,
        };
        let resp = self
            .client
            .send_request(MessageType::SendMessage, Some(&request), WS_SEND_TIMEOUT)
            .await?;
        let sent: MessageSentResponse = expect_payload(&resp, MessageType::MessageSent)?;
        Ok(SentMessage {
            id: sent.id,
            timestamp: sent.timestamp,
        })
    }

    async fn on_whatsapp(&self, jid: &str) -> Result<Option<RegisteredAddress>, TransportError> {
        let request = OnWhatsAppRequest {
            jid: jid.to_string(),
        };
        let resp = self
            .client
            .send_request(MessageType::OnWhatsApp, Some(&request), WS_REQUEST_TIMEOUT)
            .await?;
        expect_type(&resp, MessageType::OnWhatsAppResult)?;
        let found = resp.parse_payload::<Option<OnWhatsAppResponse>>()?.flatten();
        Ok(found.map(|r| RegisteredAddress {
            exists: r.exists,
            jid: r.jid,
        }))
    }

    async fn end(&self) {
        if let Err(e) = self
            .client
            .send_request::<()>(MessageType::EndSession, None, WS_REQUEST_TIMEOUT)
            .await
        {
            debug!("gateway end_session failed: {e}");
        }
        self.client.close().await;
    }
}

/// Translates a gateway push frame into a session event.
pub(crate) fn map_push_event(msg: &Message) -> Option<TransportEvent> {
    let parsed = match msg.msg_type {
        MessageType::ConnectionUpdate => msg
            .parse_payload::<ConnectionUpdatePayload>()
            .map(|p| p.map(|p| TransportEvent::ConnectionUpdate(p.into()))),
        MessageType::CredsUpdate => msg
            .parse_payload::<CredsUpdatePayload>()
            .map(|p| p.map(|p| TransportEvent::CredsUpdate(p.creds))),
        MessageType::KeysUpdate => msg
            .parse_payload::<KeysUpdatePayload>()
            .map(|p| p.map(|p| TransportEvent::KeysUpdate(p.keys))),
        ref other => {
            debug!(msg_type = ?other, "ignoring gateway push");
            return None;
        }
    };

    match parsed {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            warn!(msg_type = ?msg.msg_type, "gateway push without payload");
            None
        }
        Err(e) => {
            warn!(msg_type = ?msg.msg_type, "malformed gateway push: {e}");
            None
        }
    }
}

fn expect_type(resp: &Message, expected: MessageType) -> Result<(), TransportError> {
    if resp.msg_type == expected {
        Ok(())
    } else {
        Err(TransportError::UnexpectedResponse(format!(
            "expected {expected:?}, got {:?}",
            resp.msg_type
        )))
    }
}

fn expect_payload<T: DeserializeOwned>(
    resp: &Message,
    expected: MessageType,
) -> Result<T, TransportError> {
    expect_type(resp, expected.clone())?;
    resp.parse_payload::<T>()?.ok_or_else(|| {
        TransportError::UnexpectedResponse(format!("{expected:?} without payload"))
    })
}
