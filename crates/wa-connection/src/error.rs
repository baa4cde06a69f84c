//! Errors surfaced by the connection manager API.

use crate::transport::TransportError;

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager).
///
/// Transient disconnects and remote logouts are not errors: they are
/// absorbed by the manager and show up in the status report instead.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Opening the session failed. The caller must retry explicitly.
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("WhatsApp not connected")]
    NotConnected,

    /// The live session rejected the operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
