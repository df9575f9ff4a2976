//! Validator capability and the shared-secret name validator.

use crate::error::constants;
use bytes::{BufMut, Bytes, BytesMut};

/// Which side of a negotiation a validator is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opened the raw connection and speaks first.
    Initiator,
    /// Reacts to an inbound raw connection.
    Responder,
}

/// What a validator wants to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorAction {
    /// Emit this payload and wait for the peer's reply.
    Send(Bytes),
    /// Emit a final payload and accept without waiting for a reply.
    SendAndAccept(Bytes),
    Accept,
    Reject(String),
}

/// Decides whether a peer is acceptable, one received payload at a time.
///
/// The initiator's validator is first stepped with `None`; a responder's is
/// stepped only once the first payload has arrived.
pub trait Validator: Send + 'static {
    fn step(&mut self, role: Role, last_received: Option<&[u8]>) -> ValidatorAction;
}

impl<F> Validator for F
where
    F: FnMut(Role, Option<&[u8]>) -> ValidatorAction + Send + 'static,
{
    fn step(&mut self, role: Role, last_received: Option<&[u8]>) -> ValidatorAction {
        self(role, last_received)
    }
}

const ACK_TAG: u8 = 0x06;

/// Accepts peers that present the same protocol name.
///
/// ```text
/// Initiator                     Responder
///   name            ───────>      compare, reject on mismatch
///                   <───────      ACK + name (and accept)
///   check ACK, accept
/// ```
#[derive(Debug, Clone)]
pub struct NameValidator {
    name: Bytes,
}

impl NameValidator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Bytes::from(name.into().into_bytes()),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    fn ack(&self) -> Bytes {
        let mut ack = BytesMut::with_capacity(1 + self.name.len());
        ack.put_u8(ACK_TAG);
        ack.put_slice(&self.name);
        ack.freeze()
    }
}

impl Validator for NameValidator {
    fn step(&mut self, role: Role, last_received: Option<&[u8]>) -> ValidatorAction {
        match (role, last_received) {
            (Role::Initiator, None) => ValidatorAction::Send(self.name.clone()),
            (Role::Initiator, Some(reply)) => {
                if reply == self.ack().as_ref() {
                    ValidatorAction::Accept
                } else {
                    ValidatorAction::Reject(constants::ERR_UNEXPECTED_ACK.into())
                }
            }
            (Role::Responder, Some(offered)) => {
                if offered == self.name.as_ref() {
                    ValidatorAction::SendAndAccept(self.ack())
                } else {
                    ValidatorAction::Reject(constants::ERR_NAME_MISMATCH.into())
                }
            }
            (Role::Responder, None) => {
                ValidatorAction::Reject("Responder has nothing to validate yet".into())
            }
        }
    }
}
