//! # Server
//!
//! Accept loop that turns raw connections into validated ones.
//!
//! Every connection yielded by the source is negotiated as
//! [`Role::Responder`] with its own clone of the validator. Outcomes are
//! published as [`ServerEvent`]s on an unbounded channel:
//!
//! ```text
//! source ─> raw ─> negotiate ─┬─> ConnectionValidated ─> ... ─> ConnectionDisconnected
//!                             └─> ValidationFailed
//! ```
//!
//! Each raw connection produces at most one event per path.

use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::Negotiation;
use crate::protocol::message::{Message, MessageHandler};
use crate::protocol::validator::{Role, Validator};
use crate::protocol::Connection;
use crate::transport::tcp::TcpSource;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const ERR_SERVER_FULL: &str = "Server connection limit reached";

#[derive(Debug)]
pub enum ServerEvent {
    /// Negotiation accepted; the connection is ready for application traffic.
    ConnectionValidated(Connection),
    /// Negotiation rejected, timed out, or the server was full. The
    /// connection is already closed.
    ValidationFailed {
        connection: Connection,
        reason: String,
    },
    /// A validated connection closed. `error` is set for transport failures.
    ConnectionDisconnected {
        connection: Connection,
        error: Option<Arc<ProtocolError>>,
    },
}

pub type ServerEvents = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Clone)]
pub struct ServerOptions {
    pub max_connections: usize,
    pub negotiation_timeout: Duration,
    /// Installed on every validated connection before it is announced.
    pub message_handler: Option<MessageHandler>,
}

impl ServerOptions {
    pub fn with_message_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.message_handler = Some(Arc::new(handler));
        self
    }
}

impl From<&NetworkConfig> for ServerOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            max_connections: config.server.max_connections,
            negotiation_timeout: config.negotiation.timeout,
            message_handler: None,
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

struct Shared {
    // raw and validated connections alike, keyed by id
    connections: Mutex<HashMap<u64, Connection>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    options: ServerOptions,
}

impl Shared {
    fn connections(&self) -> MutexGuard<'_, HashMap<u64, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            debug!("Server event receiver dropped");
        }
    }
}

/// Running accept loop. Dropping it shuts the server down.
pub struct Server {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Start accepting from `source`. Must be called inside a Tokio runtime.
    pub fn start<S, V>(
        source: S,
        validator: V,
        options: impl Into<ServerOptions>,
    ) -> (Self, ServerEvents)
    where
        S: Stream<Item = Result<Connection>> + Send + Unpin + 'static,
        V: Validator + Clone,
    {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            connections: Mutex::new(HashMap::new()),
            events,
            options: options.into(),
        });
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(
            source,
            validator,
            Arc::clone(&shared),
            shutdown.clone(),
        ));

        let server = Self {
            shared,
            shutdown,
            local_addr: None,
        };
        (server, receiver)
    }

    /// Listen on `config.server.address` and start serving.
    #[instrument(skip(config, validator), fields(address = %config.server.address))]
    pub async fn bind<V>(config: &NetworkConfig, validator: V) -> Result<(Self, ServerEvents)>
    where
        V: Validator + Clone,
    {
        Self::bind_with(config, validator, ServerOptions::from(config)).await
    }

    pub async fn bind_with<V>(
        config: &NetworkConfig,
        validator: V,
        options: ServerOptions,
    ) -> Result<(Self, ServerEvents)>
    where
        V: Validator + Clone,
    {
        let source = TcpSource::bind(&config.server.address, config.connection.clone()).await?;
        let local_addr = source.local_addr();
        let (mut server, events) = Self::start(source, validator, options);
        server.local_addr = Some(local_addr);
        Ok((server, events))
    }

    /// Bound address when started through [`Server::bind`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connections currently held, including those still negotiating.
    pub fn connection_count(&self) -> usize {
        self.shared.connections().len()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.shared.connections().values().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop accepting and close every connection. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down server");
        self.shutdown.cancel();

        let open: Vec<Connection> = self.shared.connections().values().cloned().collect();
        for conn in open {
            conn.close();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop<S, V>(
    mut source: S,
    validator: V,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) where
    S: Stream<Item = Result<Connection>> + Unpin,
    V: Validator + Clone,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Accept loop stopped");
                return;
            }
            next = source.next() => match next {
                Some(Ok(raw)) => admit(raw, validator.clone(), &shared),
                Some(Err(e)) => error!(error = %e, "Error accepting connection"),
                None => {
                    info!("Connection source exhausted");
                    return;
                }
            },
        }
    }
}

fn admit<V: Validator>(raw: Connection, validator: V, shared: &Arc<Shared>) {
    {
        let mut connections = shared.connections();
        if connections.len() >= shared.options.max_connections {
            drop(connections);
            warn!(connection = raw.id(), "Rejecting connection, server full");
            raw.close();
            shared.publish(ServerEvent::ValidationFailed {
                connection: raw,
                reason: ERR_SERVER_FULL.into(),
            });
            return;
        }
        connections.insert(raw.id(), raw.clone());
    }

    debug!(connection = raw.id(), peer = ?raw.peer_addr(), "Accepted raw connection");
    tokio::spawn(validate(raw, validator, Arc::clone(shared)));
}

async fn validate<V: Validator>(raw: Connection, validator: V, shared: Arc<Shared>) {
    let negotiation = Negotiation::new(Role::Responder, validator)
        .with_timeout(shared.options.negotiation_timeout);

    let conn = match negotiation.run(raw.clone()).await {
        Ok(conn) => conn,
        Err(e) => {
            shared.connections().remove(&raw.id());
            let reason = match e {
                ProtocolError::NegotiationFailure(reason) => reason,
                other => other.to_string(),
            };
            shared.publish(ServerEvent::ValidationFailed {
                connection: raw,
                reason,
            });
            return;
        }
    };

    if let Some(handler) = &shared.options.message_handler {
        conn.set_shared_handler(Arc::clone(handler));
    }
    info!(connection = conn.id(), peer = ?conn.peer_addr(), "Connection validated");
    shared.publish(ServerEvent::ConnectionValidated(conn.clone()));

    // ConnectionDisconnected always follows ConnectionValidated.
    let on_close = Arc::clone(&shared);
    conn.on_disconnect(move |conn, error| {
        on_close.connections().remove(&conn.id());
        on_close.publish(ServerEvent::ConnectionDisconnected {
            connection: conn,
            error,
        });
    });
}
