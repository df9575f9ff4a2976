//! In-process transport.
//!
//! [`pair`] links two connections through unbounded channels. Closing either
//! side closes the other, like a socket whose peer hung up. The pumps hold
//! only weak handles, so dropping every clone of one side also ends the pair.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::{Connection, WeakConnection};
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct MemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl Transport for MemoryTransport {
    fn send(&self, payload: Bytes) -> Result<()> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| {
                ProtocolError::TransportDisconnect(constants::ERR_PEER_CLOSED.into())
            }),
            None => Err(ProtocolError::TransportDisconnect(
                constants::ERR_WRITER_GONE.into(),
            )),
        }
    }

    fn shutdown(&self) {
        // Dropping the sender ends the peer's pump.
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// Two connected in-memory connections.
///
/// # Panics
/// Panics when called outside a Tokio runtime.
pub fn pair() -> (Connection, Connection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    let a = Connection::new(MemoryTransport {
        outbound: Mutex::new(Some(a_tx)),
    });
    let b = Connection::new(MemoryTransport {
        outbound: Mutex::new(Some(b_tx)),
    });

    // a writes land on b, and the other way round
    tokio::spawn(pump(b.downgrade(), b.shutdown_token(), a_rx));
    tokio::spawn(pump(a.downgrade(), a.shutdown_token(), b_rx));
    (a, b)
}

async fn pump(
    conn: WeakConnection,
    shutdown: CancellationToken,
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            next = inbound.recv() => {
                let Some(conn) = conn.upgrade() else { return };
                match next {
                    Some(payload) => {
                        trace!(connection = conn.id(), bytes = payload.len(), "Memory frame");
                        conn.message_received(payload, None);
                    }
                    None => {
                        conn.close();
                        return;
                    }
                }
            }
        }
    }
}
