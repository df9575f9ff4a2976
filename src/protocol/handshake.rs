//! Connection negotiation
//!
//! Runs a [`Validator`] over a freshly opened raw [`Connection`] before the
//! application sees it. Handshake payloads are ordinary messages: a temporary
//! handler intercepts them, feeds each one back into the validator and writes
//! whatever it asks for. The caller awaits a one-shot completion signal,
//! bounded by the negotiation timeout.
//!
//! **Per-session state**
//! Each attempt owns its [`NegotiationSession`]; the only long-lived reference
//! to it is the temporary handler, so closing the connection drops the session
//! and wakes the waiting caller with a failure.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::message::Message;
use crate::protocol::validator::{Role, Validator, ValidatorAction};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::NEGOTIATION_TIMEOUT;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Pending,
    Validated,
    Failed(String),
}

impl NegotiationOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, NegotiationOutcome::Pending)
    }
}

/// Final result of a session; the error carries the failure reason.
type SessionResult = std::result::Result<(), String>;

/// State of one handshake attempt.
pub struct NegotiationSession<V> {
    role: Role,
    validator: V,
    outcome: NegotiationOutcome,
    done: Option<oneshot::Sender<SessionResult>>,
}

impl<V: Validator> NegotiationSession<V> {
    fn new(role: Role, validator: V, done: oneshot::Sender<SessionResult>) -> Self {
        Self {
            role,
            validator,
            outcome: NegotiationOutcome::Pending,
            done: Some(done),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn outcome(&self) -> &NegotiationOutcome {
        &self.outcome
    }

    fn open(&mut self, conn: &Connection) {
        let action = self.validator.step(self.role, None);
        self.apply(conn, action);
    }

    fn on_payload(&mut self, conn: &Connection, payload: &[u8]) {
        if self.outcome.is_finished() {
            return;
        }
        debug!(
            connection = conn.id(),
            role = ?self.role,
            bytes = payload.len(),
            "Handshake payload received"
        );
        let action = self.validator.step(self.role, Some(payload));
        self.apply(conn, action);
    }

    fn apply(&mut self, conn: &Connection, action: ValidatorAction) {
        match action {
            ValidatorAction::Send(payload) => {
                if let Err(e) = conn.write(payload) {
                    self.finish(conn, Err(e.to_string()));
                }
            }
            ValidatorAction::SendAndAccept(payload) => {
                let result = conn.write(payload).map_err(|e| e.to_string());
                self.finish(conn, result);
            }
            ValidatorAction::Accept => self.finish(conn, Ok(())),
            ValidatorAction::Reject(reason) => self.finish(conn, Err(reason)),
        }
    }

    fn finish(&mut self, conn: &Connection, result: SessionResult) {
        // Detach before signalling so anything arriving after the final
        // handshake message stays queued for the application.
        conn.clear_handler();
        self.outcome = match &result {
            Ok(()) => NegotiationOutcome::Validated,
            Err(reason) => NegotiationOutcome::Failed(reason.clone()),
        };
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }
}

/// Handshake driver for one role.
///
/// ```rust,no_run
/// use protoforge::protocol::{Negotiation, NameValidator, Role};
/// use protoforge::transport::memory;
///
/// # async fn run() -> protoforge::error::Result<()> {
/// let (a, b) = memory::pair();
/// let responder = tokio::spawn(
///     Negotiation::new(Role::Responder, NameValidator::new("chat")).run(b),
/// );
/// let conn = Negotiation::new(Role::Initiator, NameValidator::new("chat"))
///     .run(a)
///     .await?;
/// conn.write(&b"hello"[..])?;
/// # let _ = responder.await;
/// # Ok(())
/// # }
/// ```
pub struct Negotiation<V> {
    role: Role,
    validator: V,
    timeout: Duration,
}

impl<V: Validator> Negotiation<V> {
    pub fn new(role: Role, validator: V) -> Self {
        Self {
            role,
            validator,
            timeout: NEGOTIATION_TIMEOUT,
        }
    }

    /// Bound for the whole handshake.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive the handshake to completion.
    ///
    /// On success the connection comes back handler-less, with its ordering
    /// flag and pause state as they were before. On any failure it is closed.
    ///
    /// # Errors
    /// `ProtocolError::NegotiationFailure` on reject, timeout, or if the
    /// connection closes mid-handshake.
    #[instrument(skip_all, fields(connection = conn.id(), role = ?self.role))]
    pub async fn run(self, conn: Connection) -> Result<Connection> {
        let metrics = global_metrics();
        metrics.handshake_attempt();
        let _timer = Timer::start("negotiation");

        let restore_order = conn.keep_in_order();
        let was_paused = conn.is_paused();
        conn.set_keep_in_order(true);

        let (done, outcome) = oneshot::channel();
        let mut session = NegotiationSession::new(self.role, self.validator, done);

        if self.role == Role::Initiator {
            session.open(&conn);
        }

        if !session.outcome().is_finished() {
            // The handler is the sole owner of the session from here on.
            let session = Arc::new(Mutex::new(session));
            conn.set_handler(move |message: Message| {
                let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
                session.on_payload(message.sender(), message.payload());
            });
            if was_paused {
                let _ = conn.resume();
            }
        }

        let result = match tokio::time::timeout(self.timeout, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(constants::ERR_NEGOTIATION_CLOSED.into()),
            Err(_) => Err(constants::ERR_NEGOTIATION_TIMEOUT.into()),
        };
        conn.clear_handler();

        match result {
            Ok(()) => {
                conn.set_keep_in_order(restore_order);
                if was_paused {
                    conn.pause();
                }
                metrics.handshake_success();
                info!("Negotiation succeeded");
                Ok(conn)
            }
            Err(reason) => {
                metrics.handshake_failed();
                warn!(reason = %reason, "Negotiation failed");
                conn.close();
                Err(ProtocolError::NegotiationFailure(reason))
            }
        }
    }
}

/// Shorthand for [`Negotiation::run`].
pub async fn negotiate<V: Validator>(
    conn: Connection,
    role: Role,
    validator: V,
    timeout: Duration,
) -> Result<Connection> {
    Negotiation::new(role, validator)
        .with_timeout(timeout)
        .run(conn)
        .await
}
