//! # Protocol Layer
//!
//! Connections, inbound delivery and negotiation.
//!
//! ## Components
//! - **Connection**: cloneable handle for writes, close and handler control
//! - **Pipeline**: per-connection queue with ordered or overlapping dispatch
//! - **Message**: delivered payload plus the connection it came from
//! - **Negotiation**: validator-driven handshake run before a connection is exposed
//!
//! ## Flow
//! ```text
//! transport ─> message_received ─> pipeline ─> handler (application, or negotiation while it runs)
//! ```

pub mod connection;
pub mod handshake;
pub mod message;
pub mod pipeline;
pub mod validator;

#[cfg(test)]
mod tests;

pub use connection::{Connection, DisconnectCallback, WeakConnection};
pub use handshake::{negotiate, Negotiation, NegotiationOutcome, NegotiationSession};
pub use message::{Message, MessageHandler, ReleaseCallback};
pub use pipeline::QueueState;
pub use validator::{NameValidator, Role, Validator, ValidatorAction};
