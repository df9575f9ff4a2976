//! # Transports
//!
//! Byte-moving backends behind a [`Connection`](crate::protocol::Connection).
//!
//! A transport owns the socket side: it frames outgoing payloads, reads
//! complete inbound messages and hands them to
//! [`Connection::message_received`](crate::protocol::Connection::message_received),
//! and reports failures through
//! [`Connection::close_with_error`](crate::protocol::Connection::close_with_error).
//!
//! ## Implementations
//! - **tcp**: stream transport, `[len:u32 LE][payload]` framing
//! - **udp**: datagram transport, one datagram per message
//! - **memory**: linked in-process pair for tests and embedding

use crate::error::Result;
use bytes::Bytes;
use std::net::SocketAddr;

pub mod framing;
pub mod memory;
pub mod tcp;
pub mod udp;

/// Outbound half of a transport as seen by a connection.
///
/// `send` must not block: implementations queue the frame for a writer task.
pub trait Transport: Send + Sync + 'static {
    /// Queue one complete logical message for transmission.
    fn send(&self, payload: Bytes) -> Result<()>;

    /// Release transport resources. Called once, when the connection closes.
    fn shutdown(&self) {}

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Short label for logs.
    fn kind(&self) -> &'static str;
}
