//! # Error Types
//!
//! Error handling for codecs, connections and negotiation.
//!
//! ## Error Categories
//! - **Setup errors**: unregistered or duplicate codec types, invalid settings files
//! - **Codec errors**: truncated buffers, length mismatches, malformed UTF-8
//! - **Connection errors**: writes or queue control on a closed or handler-less connection
//! - **Negotiation errors**: validator rejection, handshake timeout
//! - **Transport errors**: socket failures and peer disconnects
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use protoforge::core::CodecRegistry;
//! use protoforge::error::{ProtocolError, Result};
//!
//! fn decode_port(registry: &CodecRegistry, raw: &[u8]) -> Result<u16> {
//!     registry.deserialize::<u16>(raw)
//! }
//!
//! let registry = CodecRegistry::new();
//! assert!(matches!(
//!     decode_port(&registry, &[1, 2, 3]),
//!     Err(ProtocolError::CodecError(_))
//! ));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on codec registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on codec registry";
    pub const ERR_ENTRY_TYPE_MISMATCH: &str = "Registered codec entry has an unexpected type";

    /// Codec errors
    pub const ERR_MISSING_COUNT: &str = "Truncated sequence: missing element count";
    pub const ERR_MISSING_LENGTH: &str = "Truncated sequence: missing element length prefix";
    pub const ERR_SEQUENCE_TOO_LONG: &str = "Sequence has more than u32::MAX elements";
    pub const ERR_ELEMENT_TOO_LONG: &str = "Sequence element exceeds u32::MAX bytes";
    pub const ERR_ZERO_WIDTH: &str = "Fixed-size codecs must encode at least one byte";
    pub const ERR_INVALID_UTF8: &str = "String payload is not valid UTF-8";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_RESUME_WITHOUT_HANDLER: &str =
        "Cannot resume the message queue while no message handler is set";

    /// Negotiation errors
    pub const ERR_NEGOTIATION_TIMEOUT: &str = "Negotiation timed out waiting for the peer";
    pub const ERR_NEGOTIATION_CLOSED: &str = "Connection closed during negotiation";
    pub const ERR_NAME_MISMATCH: &str = "Peer presented a different protocol name";
    pub const ERR_UNEXPECTED_ACK: &str = "Peer sent an unexpected acknowledgement";

    /// Transport errors
    pub const ERR_PEER_CLOSED: &str = "Peer closed the connection";
    pub const ERR_WRITER_GONE: &str = "Transport writer task is no longer running";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Unregistered type lookup or duplicate registration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Malformed, truncated or mis-sized codec input.
    #[error("Codec error: {0}")]
    CodecError(String),

    /// Operation not allowed in the connection's current state.
    #[error("Connection state error: {0}")]
    ConnectionStateError(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Transport disconnected: {0}")]
    TransportDisconnect(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Timeout occurred")]
    Timeout,

    /// Settings file or environment problems.
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = ProtocolError::NegotiationFailure(constants::ERR_NAME_MISMATCH.into());
        assert_eq!(
            err.to_string(),
            "Negotiation failed: Peer presented a different protocol name"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err: ProtocolError = io_err.into();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
