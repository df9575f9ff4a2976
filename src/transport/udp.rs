//! Datagram transport: one datagram carries exactly one message, unframed.

use crate::config::ConnectionConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::transport::Transport;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

/// Largest payload that fits in a single IPv4 UDP datagram.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

struct UdpTransport {
    outbound: mpsc::UnboundedSender<Bytes>,
    peer: Option<SocketAddr>,
}

impl Transport for UdpTransport {
    fn send(&self, payload: Bytes) -> Result<()> {
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(ProtocolError::OversizedFrame(payload.len()));
        }
        self.outbound
            .send(payload)
            .map_err(|_| ProtocolError::TransportDisconnect(constants::ERR_WRITER_GONE.into()))
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn kind(&self) -> &'static str {
        "udp"
    }
}

/// Bind `local` and associate the socket with `remote`.
#[instrument(skip(config))]
pub async fn connect<L, R>(local: L, remote: R, config: &ConnectionConfig) -> Result<Connection>
where
    L: ToSocketAddrs + std::fmt::Debug,
    R: ToSocketAddrs + std::fmt::Debug,
{
    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;
    Ok(from_socket(socket, config))
}

/// Wrap an already connected socket.
///
/// # Panics
/// Panics when called outside a Tokio runtime.
pub fn from_socket(socket: UdpSocket, config: &ConnectionConfig) -> Connection {
    let peer = socket.peer_addr().ok();
    let socket = Arc::new(socket);
    let (outbound, outbound_rx) = mpsc::unbounded_channel();

    let conn = Connection::new(UdpTransport { outbound, peer });
    conn.set_keep_in_order(config.keep_in_order);

    tokio::spawn(send_loop(conn.clone(), Arc::clone(&socket), outbound_rx));
    tokio::spawn(recv_loop(conn.clone(), socket));
    conn
}

async fn send_loop(
    conn: Connection,
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    let shutdown = conn.shutdown_token();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            next = outbound.recv() => match next {
                Some(datagram) => {
                    if let Err(e) = socket.send(&datagram).await {
                        conn.close_with_error(e.into());
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

async fn recv_loop(conn: Connection, socket: Arc<UdpSocket>) {
    let shutdown = conn.shutdown_token();
    let mut buf = vec![0u8; MAX_DATAGRAM_PAYLOAD + 1];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = socket.recv(&mut buf) => match received {
                Ok(n) => conn.message_received(Bytes::copy_from_slice(&buf[..n]), None),
                Err(e) => {
                    debug!(connection = conn.id(), error = %e, "Datagram receive failed");
                    conn.close_with_error(e.into());
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_datagrams_are_messages() {
        let a_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a_socket.connect(b_socket.local_addr().unwrap()).await.unwrap();
        b_socket.connect(a_socket.local_addr().unwrap()).await.unwrap();

        let config = ConnectionConfig::default();
        let a = from_socket(a_socket, &config);
        let b = from_socket(b_socket, &config);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx = Mutex::new(tx);
        b.set_handler(move |msg| {
            let _ = tx.lock().unwrap().send(msg.payload().clone());
        });

        a.write(&b"one"[..]).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], b"one");
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect("127.0.0.1:9").await.unwrap();
        let conn = from_socket(socket, &ConnectionConfig::default());
        assert!(matches!(
            conn.write(vec![0u8; MAX_DATAGRAM_PAYLOAD + 1]),
            Err(ProtocolError::OversizedFrame(_))
        ));
    }
}
