//! WhatsApp connection manager.
//!
//! Owns a single lazily-initialized transport session, tracks its
//! lifecycle, gates send/query operations on the connection state and
//! persists authentication material across restarts.

pub mod auth_store;
pub mod error;
pub mod gateway;
pub mod jid;
pub(crate) mod lifecycle;
pub mod manager;
pub mod outbound;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth_store::{AuthStore, AuthStoreError};
pub use error::ConnectionError;
pub use gateway::GatewayTransport;
pub use jid::normalize_jid;
pub use manager::ConnectionManager;
pub use outbound::build_outbound;
pub use transport::{Session, Transport, TransportError, TransportEvent};
pub use types::{ConnectionEvent, ConnectionState, ManagerConfig};
