//! In-memory transport whose sessions are driven from the test body.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crmlink_protocol::{OutboundMessage, ProtocolVersion};

use crate::transport::{
    AuthState, ConnectionUpdate, OpenedSession, RegisteredAddress, SentMessage, Session,
    Transport, TransportError, TransportEvent,
};

#[derive(Default)]
struct Script {
    open_attempts: usize,
    failing_opens: usize,
    opened: Vec<AuthState>,
    senders: Vec<Option<mpsc::UnboundedSender<TransportEvent>>>,
    sent: Vec<(String, OutboundMessage)>,
    registered: HashMap<String, RegisteredAddress>,
    ended: usize,
}

/// Records every session it opens and lets the test push events into them.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `n` open attempts fail.
    pub(crate) fn fail_next_opens(&self, n: usize) {
        self.script.lock().unwrap().failing_opens = n;
    }

    pub(crate) fn open_attempts(&self) -> usize {
        self.script.lock().unwrap().open_attempts
    }

    pub(crate) fn open_count(&self) -> usize {
        self.script.lock().unwrap().opened.len()
    }

    /// Auth material handed to the `index`th opened session.
    pub(crate) fn opened_auth(&self, index: usize) -> AuthState {
        self.script.lock().unwrap().opened[index].clone()
    }

    pub(crate) fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.script.lock().unwrap().sent.clone()
    }

    pub(crate) fn ended(&self) -> usize {
        self.script.lock().unwrap().ended
    }

    pub(crate) fn register(&self, jid: &str, canonical: &str) {
        self.script.lock().unwrap().registered.insert(
            jid.to_string(),
            RegisteredAddress {
                exists: true,
                jid: canonical.to_string(),
            },
        );
    }

    /// Pushes an event into the `index`th opened session.
    pub(crate) fn emit_to(&self, index: usize, event: TransportEvent) {
        if let Some(Some(tx)) = self.script.lock().unwrap().senders.get(index) {
            let _ = tx.send(event);
        }
    }

    /// Pushes an event into the most recently opened session.
    pub(crate) fn emit(&self, event: TransportEvent) {
        let latest = self.open_count().checked_sub(1).expect("no session opened");
        self.emit_to(latest, event);
    }

    pub(crate) fn emit_qr(&self, code: &str) {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::qr(code)));
    }

    pub(crate) fn emit_open(&self) {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::open()));
    }

    pub(crate) fn emit_close(&self, status_code: Option<u16>, message: &str) {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::close(
            status_code,
            message,
        )));
    }

    pub(crate) fn emit_creds(&self, creds: serde_json::Value) {
        self.emit(TransportEvent::CredsUpdate(creds));
    }

    /// Ends the latest session's event stream without a close event.
    pub(crate) fn end_stream(&self) {
        if let Some(slot) = self.script.lock().unwrap().senders.last_mut() {
            slot.take();
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch_latest_version(&self) -> Result<ProtocolVersion, TransportError> {
        Ok(ProtocolVersion([2, 3000, 1015901307]))
    }

    async fn open_session(
        &self,
        _version: ProtocolVersion,
        auth: AuthState,
    ) -> Result<OpenedSession, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.open_attempts += 1;
        if script.failing_opens > 0 {
            script.failing_opens -= 1;
            return Err(TransportError::Gateway {
                code: 503,
                message: "gateway unavailable".into(),
            });
        }

        let (tx, events) = mpsc::unbounded_channel();
        script.opened.push(auth);
        script.senders.push(Some(tx));
        Ok(OpenedSession {
            session: Arc::new(ScriptedSession {
                script: self.script.clone(),
            }),
            events,
        })
    }
}

struct ScriptedSession {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn send_message(
        &self,
        jid: &str,
        message: OutboundMessage,
    ) -> Result<SentMessage, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.sent.push((jid.to_string(), message));
        Ok(SentMessage {
            id: format!("3EB0{:04}", script.sent.len()),
            timestamp: None,
        })
    }

    async fn on_whatsapp(&self, jid: &str) -> Result<Option<RegisteredAddress>, TransportError> {
        Ok(self.script.lock().unwrap().registered.get(jid).cloned())
    }

    async fn end(&self) {
        self.script.lock().unwrap().ended += 1;
    }
}
