//! Public types for the connection manager.

use std::path::PathBuf;
use std::time::Duration;

use crmlink_protocol::ConnectionStatus;
use crmlink_protocol::constants::DEFAULT_RECONNECT_DELAY;

/// In-memory connection state.
///
/// Fields are only changed through the transition methods, which keep the
/// pairing challenge confined to [`ConnectionStatus::QrReady`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    status: ConnectionStatus,
    pairing_challenge: Option<String>,
    last_error: Option<String>,
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn pairing_challenge(&self) -> Option<&str> {
        self.pairing_challenge.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A session is being opened. Clears the challenge and last error.
    pub(crate) fn begin_connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.pairing_challenge = None;
        self.last_error = None;
    }

    /// The transport issued (or reissued) a pairing challenge.
    pub(crate) fn challenge_issued(&mut self, code: String) {
        self.status = ConnectionStatus::QrReady;
        self.pairing_challenge = Some(code);
    }

    /// The session authenticated.
    pub(crate) fn opened(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.pairing_challenge = None;
        self.last_error = None;
    }

    /// The session went away. `error` replaces the last error when given.
    pub(crate) fn disconnected(&mut self, error: Option<String>) {
        self.status = ConnectionStatus::Disconnected;
        self.pairing_challenge = None;
        if error.is_some() {
            self.last_error = error;
        }
    }

    /// Back to the empty process-start baseline.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection status changed.
    StateChanged(ConnectionStatus),
    /// A pairing challenge (QR payload) is ready to be scanned.
    PairingChallenge(String),
    /// The session closed transiently; a reconnect is scheduled.
    Reconnecting { delay: Duration },
    /// The device was logged out remotely and auth material was wiped.
    LoggedOut,
}

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory holding persisted auth material.
    pub auth_dir: PathBuf,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
}

impl ManagerConfig {
    pub fn new(auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            auth_dir: auth_dir.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}
