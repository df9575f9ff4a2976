//! # TCP Transport
//!
//! Stream transport with `[len:u32 LE][payload]` framing.
//!
//! Each connection runs two tasks:
//! - a **reader** that decodes frames and hands them to the connection. Every
//!   frame holds an in-flight permit until its release callback runs, so a
//!   slow handler eventually stops the reader and TCP flow control pushes
//!   back on the peer.
//! - a **writer** that drains the outbound channel into the socket. On close
//!   it flushes whatever was already queued before shutting the socket.

use crate::config::ConnectionConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::transport::framing::FrameCodec;
use crate::transport::Transport;
use crate::utils::timeout::with_timeout;
use bytes::{Bytes, BytesMut};
use futures::{ready, Sink, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

struct TcpTransport {
    outbound: mpsc::UnboundedSender<Bytes>,
    peer: Option<SocketAddr>,
    max_frame_size: usize,
}

impl Transport for TcpTransport {
    fn send(&self, payload: Bytes) -> Result<()> {
        if payload.len() > self.max_frame_size {
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
        "tcp"
    }
}

/// Open a raw connection to `addr`, giving up after `connect_timeout`.
#[instrument(skip(config))]
pub async fn connect<A>(
    addr: A,
    config: &ConnectionConfig,
    connect_timeout: Duration,
) -> Result<Connection>
where
    A: ToSocketAddrs + std::fmt::Debug,
{
    let stream = with_timeout(connect_timeout, async move {
        Ok(TcpStream::connect(addr).await?)
    })
    .await?;
    Ok(from_stream(stream, config))
}

/// Wrap an established stream in a connection and start its I/O tasks.
///
/// # Panics
/// Panics when called outside a Tokio runtime.
pub fn from_stream(stream: TcpStream, config: &ConnectionConfig) -> Connection {
    let peer = stream.peer_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let conn = Connection::new(TcpTransport {
        outbound,
        peer,
        max_frame_size: config.max_frame_size,
    });
    conn.set_keep_in_order(config.keep_in_order);

    let (sink, frames) = Framed::new(stream, FrameCodec::new(config.max_frame_size)).split();
    tokio::spawn(write_loop(conn.clone(), sink, outbound_rx));
    tokio::spawn(read_loop(conn.clone(), frames, config.inflight_limit));
    conn
}

async fn write_loop<S>(conn: Connection, mut sink: S, mut outbound: mpsc::UnboundedReceiver<Bytes>)
where
    S: Sink<Bytes, Error = ProtocolError> + Unpin,
{
    let shutdown = conn.shutdown_token();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = outbound.recv() => match next {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        conn.close_with_error(e);
                        return;
                    }
                }
                None => break,
            },
        }
    }

    // Frames written just before close still go out.
    while let Ok(frame) = outbound.try_recv() {
        if sink.feed(frame).await.is_err() {
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(connection = conn.id(), error = %e, "Socket close failed");
    }
}

async fn read_loop<S>(conn: Connection, mut frames: S, inflight_limit: usize)
where
    S: Stream<Item = Result<BytesMut>> + Unpin,
{
    let shutdown = conn.shutdown_token();
    let permits = Arc::new(Semaphore::new(inflight_limit.max(1)));

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => return,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let next = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                conn.message_received(frame.freeze(), Some(Box::new(move || drop(permit))));
            }
            Some(Err(e)) => {
                conn.close_with_error(e);
                return;
            }
            None => {
                debug!(connection = conn.id(), "Peer closed the stream");
                conn.close();
                return;
            }
        }
    }
}

/// Accepting socket that yields raw connections, for use as a server source.
pub struct TcpSource {
    listener: TcpListenerStream,
    local_addr: SocketAddr,
    config: ConnectionConfig,
}

impl TcpSource {
    #[instrument(skip(config))]
    pub async fn bind(addr: &str, config: ConnectionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Listening");
        Ok(Self {
            listener: TcpListenerStream::new(listener),
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Stream for TcpSource {
    type Item = Result<Connection>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match ready!(Pin::new(&mut self.listener).poll_next(cx)) {
            Some(Ok(stream)) => Poll::Ready(Some(Ok(from_stream(stream, &self.config)))),
            Some(Err(e)) => {
                warn!(error = %e, "Accept failed");
                Poll::Ready(Some(Err(e.into())))
            }
            None => Poll::Ready(None),
        }
    }
}
