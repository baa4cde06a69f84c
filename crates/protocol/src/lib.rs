pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{GatewayError, Message};
pub use messages::{ConnectionPhase, KeySnapshot, KeyUpdates, OutboundMessage};
pub use types::{
    ClearSessionResult, ConnectionStatus, MediaSource, ProtocolVersion, RegistrationResult,
    SendPayload, SendReceipt, StatusReport,
};
