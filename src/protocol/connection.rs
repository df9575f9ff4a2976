//! # Connection
//!
//! The bidirectional conduit handed to applications.
//!
//! A `Connection` is a cheap, cloneable handle. It owns one
//! [message pipeline](crate::protocol::pipeline) for its lifetime, forwards
//! writes to its [`Transport`], and moves one way from open to closed.
//!
//! ## Lifecycle
//! 1. A transport builds the connection with [`Connection::new`] and starts
//!    feeding it through [`Connection::message_received`].
//! 2. The application (or a negotiation) installs a handler.
//! 3. [`Connection::close`] or a transport failure closes it; disconnect
//!    subscribers run exactly once, on a runtime task.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Inbound, Message, MessageHandler, ReleaseCallback};
use crate::protocol::pipeline::{MessagePipeline, QueueState};
use crate::transport::Transport;
use crate::utils::metrics::global_metrics;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Subscriber for the disconnect notification. The error is `None` when the
/// connection was closed on request or by an orderly peer shutdown.
pub type DisconnectCallback =
    Box<dyn FnOnce(Connection, Option<Arc<ProtocolError>>) + Send + 'static>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct DisconnectState {
    subscribers: Vec<DisconnectCallback>,
    // Some(cause) once fired
    fired: Option<Option<Arc<ProtocolError>>>,
}

struct ConnectionInner {
    id: u64,
    transport: Box<dyn Transport>,
    pipeline: MessagePipeline,
    closed: AtomicBool,
    shutdown: CancellationToken,
    runtime: Handle,
    disconnect: Mutex<DisconnectState>,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap `transport` in a new open connection with ordered delivery.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new<T: Transport>(transport: T) -> Self {
        let inner = ConnectionInner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            transport: Box::new(transport),
            pipeline: MessagePipeline::new(true),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            runtime: Handle::current(),
            disconnect: Mutex::new(DisconnectState::default()),
        };
        global_metrics().connection_opened();
        debug!(
            connection = inner.id,
            transport = inner.transport.kind(),
            peer = ?inner.transport.peer_addr(),
            "Connection opened"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.peer_addr()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Send one complete message to the peer.
    ///
    /// # Errors
    /// `ProtocolError::ConnectionStateError` once the connection is closed,
    /// or whatever the transport reports while queueing the frame.
    pub fn write(&self, payload: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionStateError(
                constants::ERR_CONNECTION_CLOSED.into(),
            ));
        }
        let payload = payload.into();
        let len = payload.len() as u64;
        self.inner.transport.send(payload)?;
        global_metrics().message_sent(len);
        Ok(())
    }

    /// Close on request. Idempotent.
    pub fn close(&self) {
        self.shutdown_with(None);
    }

    /// Close because of a failure; the error is passed to disconnect
    /// subscribers. A no-op if already closed.
    pub fn close_with_error(&self, cause: ProtocolError) {
        self.shutdown_with(Some(cause));
    }

    fn shutdown_with(&self, cause: Option<ProtocolError>) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match &cause {
            Some(err) => warn!(connection = self.id(), error = %err, "Connection closed by failure"),
            None => info!(connection = self.id(), "Connection closed"),
        }

        let failed = cause.is_some();
        let cause = cause.map(Arc::new);

        self.inner.shutdown.cancel();
        self.inner.transport.shutdown();
        let discarded = self.inner.pipeline.close();
        if discarded > 0 {
            debug!(connection = self.id(), discarded, "Dropped undelivered messages");
        }
        global_metrics().connection_closed(discarded as u64, failed);

        let subscribers = {
            let mut state = self
                .inner
                .disconnect
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.fired = Some(cause.clone());
            std::mem::take(&mut state.subscribers)
        };
        if !subscribers.is_empty() {
            let conn = self.clone();
            self.spawn(async move {
                for subscriber in subscribers {
                    subscriber(conn.clone(), cause.clone());
                }
            });
        }
    }

    /// Subscribe to the disconnect notification. If the connection is
    /// already closed the callback is scheduled immediately.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: FnOnce(Connection, Option<Arc<ProtocolError>>) + Send + 'static,
    {
        let mut state = self
            .inner
            .disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match state.fired.clone() {
            Some(cause) => {
                let conn = self.clone();
                drop(state);
                self.spawn(async move { callback(conn, cause) });
            }
            None => state.subscribers.push(Box::new(callback)),
        }
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Token cancelled when the connection closes; transports select on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Entry point for transports: one complete inbound message. `release`
    /// runs after the handler has returned.
    pub fn message_received(&self, payload: Bytes, release: Option<ReleaseCallback>) {
        global_metrics().message_received(payload.len() as u64);
        self.inner
            .pipeline
            .deliver(self, Inbound::new(payload, release));
    }

    /// Install the message handler, replacing any previous one.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.set_shared_handler(Arc::new(handler));
    }

    /// Install an already shared handler, e.g. one used by many connections.
    pub fn set_shared_handler(&self, handler: MessageHandler) {
        self.inner.pipeline.set_handler(self, handler);
    }

    /// Remove the handler; arrivals are buffered until a new one is set.
    pub fn clear_handler(&self) -> Option<MessageHandler> {
        self.inner.pipeline.clear_handler()
    }

    pub fn has_handler(&self) -> bool {
        self.inner.pipeline.has_handler()
    }

    /// When true (the default) handler calls never overlap and follow
    /// arrival order.
    pub fn set_keep_in_order(&self, keep_in_order: bool) {
        self.inner.pipeline.set_keep_in_order(keep_in_order);
    }

    pub fn keep_in_order(&self) -> bool {
        self.inner.pipeline.keep_in_order()
    }

    /// Stop starting new handler calls. Nothing is dropped.
    pub fn pause(&self) {
        self.inner.pipeline.pause();
    }

    /// Resume delivery of buffered and new messages.
    ///
    /// # Errors
    /// `ProtocolError::ConnectionStateError` if no handler is set.
    pub fn resume(&self) -> Result<()> {
        self.inner.pipeline.resume(self)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pipeline.is_paused()
    }

    pub fn queue_state(&self) -> QueueState {
        self.inner.pipeline.state()
    }

    /// Messages buffered and not yet handed to the handler.
    pub fn queued_len(&self) -> usize {
        self.inner.pipeline.len()
    }

    /// Handle that does not keep the connection alive.
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn pipeline(&self) -> &MessagePipeline {
        &self.inner.pipeline
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(future);
    }
}

/// Non-owning [`Connection`] handle, for tasks that must not outlive the
/// application's last clone.
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<ConnectionInner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("transport", &self.inner.transport.kind())
            .field("peer", &self.peer_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}
