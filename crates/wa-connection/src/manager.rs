//! Connection manager for the process-wide WhatsApp session.
//!
//! Exposes a small idempotent API over a single transport session: open it
//! lazily, report its status, gate sends on it being authenticated, and
//! wipe it on request. Reconnects after transient closes happen on their
//! own with a fixed delay.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use crmlink_protocol::{
    ClearSessionResult, ConnectionStatus, MediaSource, RegistrationResult, SendPayload,
    SendReceipt, StatusReport,
};

use crate::auth_store::AuthStore;
use crate::error::ConnectionError;
use crate::jid::normalize_jid;
use crate::lifecycle::{self, InitTrigger, ManagerContext, cancel_reconnect};
use crate::outbound::build_outbound;
use crate::transport::{Session, Transport};
use crate::types::{ConnectionEvent, ConnectionState, ManagerConfig};

/// Connection manager owning the single WhatsApp session.
pub struct ConnectionManager {
    ctx: ManagerContext,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl ConnectionManager {
    /// Creates a manager in the `disconnected` state. Nothing is opened
    /// until [`initialize`](Self::initialize) is called.
    pub fn new(transport: Arc<dyn Transport>, config: ManagerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);

        let ctx = ManagerContext {
            transport,
            auth_store: Arc::new(AuthStore::new(config.auth_dir)),
            state: Arc::new(RwLock::new(ConnectionState::default())),
            session: Arc::new(Mutex::new(None)),
            active_generation: Arc::new(AtomicU64::new(0)),
            next_generation: Arc::new(AtomicU64::new(0)),
            lifecycle: Arc::new(Mutex::new(())),
            events_tx,
            reconnect_cancel: Arc::new(std::sync::Mutex::new(None)),
            reconnect_delay: config.reconnect_delay,
        };

        Self {
            ctx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Opens the session if not already connected.
    ///
    /// Returns the status once the session has been opened; pairing and
    /// authentication progress arrive asynchronously afterwards. A pending
    /// reconnect timer is cancelled.
    pub async fn initialize(&self) -> Result<ConnectionStatus, ConnectionError> {
        lifecycle::initialize(&self.ctx, InitTrigger::Caller).await
    }

    /// Returns a snapshot of the connection state.
    pub async fn get_status(&self) -> StatusReport {
        let state = self.ctx.state.read().await;
        StatusReport {
            status: state.status(),
            last_error: state.last_error().map(str::to_string),
            has_pairing_challenge: state.pairing_challenge().is_some(),
            has_persisted_auth: self.ctx.auth_store.has_creds(),
        }
    }

    /// Returns the current pairing challenge, present only in `qr_ready`.
    pub async fn get_pairing_challenge(&self) -> Option<String> {
        self.ctx
            .state
            .read()
            .await
            .pairing_challenge()
            .map(str::to_string)
    }

    /// Logs the device out locally: ends the session, deletes persisted auth
    /// material and resets to the empty baseline. Never fails; errors are
    /// reported in the result.
    pub async fn clear_session(&self) -> ClearSessionResult {
        let _lifecycle = self.ctx.lifecycle.lock().await;
        cancel_reconnect(&self.ctx.reconnect_cancel);
        match lifecycle::clear_session_locked(&self.ctx, true, true).await {
            Ok(()) => {
                info!("WhatsApp session cleared");
                ClearSessionResult::ok()
            }
            Err(e) => {
                warn!("failed to clear WhatsApp session: {e}");
                ClearSessionResult::failed(e.to_string())
            }
        }
    }

    /// Sends a message to `target`, a phone number or JID.
    pub async fn send(
        &self,
        target: &str,
        payload: SendPayload,
    ) -> Result<SendReceipt, ConnectionError> {
        let session = self.connected_session().await?;
        let jid = normalize_jid(target);
        let message = build_outbound(payload);

        let sent = session.send_message(&jid, message).await?;
        let timestamp = sent
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        debug!(jid = %jid, message_id = %sent.id, "message sent");

        Ok(SendReceipt {
            success: true,
            message_id: sent.id,
            timestamp,
        })
    }

    /// Sends a text message.
    pub async fn send_text(
        &self,
        target: &str,
        text: impl Into<String>,
    ) -> Result<SendReceipt, ConnectionError> {
        self.send(target, SendPayload::text(text)).await
    }

    /// Sends a media message. The MIME type selects how it is delivered.
    pub async fn send_media(
        &self,
        target: &str,
        source: MediaSource,
        mimetype: impl Into<String>,
        caption: Option<String>,
        file_name: Option<String>,
    ) -> Result<SendReceipt, ConnectionError> {
        let payload = SendPayload::Media {
            source,
            mimetype: mimetype.into(),
            caption,
            file_name,
        };
        self.send(target, payload).await
    }

    /// Checks whether `identifier` is a valid WhatsApp destination.
    pub async fn is_registered(
        &self,
        identifier: &str,
    ) -> Result<RegistrationResult, ConnectionError> {
        let session = self.connected_session().await?;
        let jid = normalize_jid(identifier);

        let result = session.on_whatsapp(&jid).await?;
        Ok(match result {
            Some(found) => RegistrationResult {
                registered: found.exists,
                canonical_address: if found.jid.is_empty() { jid } else { found.jid },
            },
            None => RegistrationResult {
                registered: false,
                canonical_address: jid,
            },
        })
    }

    /// Ends the live session and cancels any pending reconnect, keeping the
    /// persisted auth material for the next start.
    pub async fn shutdown(&self) {
        let _lifecycle = self.ctx.lifecycle.lock().await;
        cancel_reconnect(&self.ctx.reconnect_cancel);
        if let Some(session) = self.ctx.take_session(true).await {
            session.end().await;
        }
        self.ctx.transition(|s| s.disconnected(None)).await;
        info!("connection manager shut down");
    }

    /// Returns the live session if authenticated.
    ///
    /// The status check is a point-in-time read: a close racing with the
    /// call surfaces as a transport error from the session itself.
    async fn connected_session(&self) -> Result<Arc<dyn Session>, ConnectionError> {
        if self.ctx.state.read().await.status() != ConnectionStatus::Connected {
            return Err(ConnectionError::NotConnected);
        }
        self.ctx
            .session
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
            .ok_or(ConnectionError::NotConnected)
    }
}
