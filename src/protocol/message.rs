use crate::core::CodecRegistry;
use crate::error::Result;
use crate::protocol::connection::Connection;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Invoked once the handler has finished with a message so the transport can
/// reuse or release whatever backs the buffer.
pub type ReleaseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Application callback for delivered messages.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// A delivered inbound message and the connection it arrived on.
#[derive(Clone)]
pub struct Message {
    payload: Bytes,
    sender: Connection,
}

impl Message {
    pub(crate) fn new(payload: Bytes, sender: Connection) -> Self {
        Self { payload, sender }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn sender(&self) -> &Connection {
        &self.sender
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Interpret the payload as a `T` using `registry`.
    pub fn decode<T: Send + Sync + 'static>(&self, registry: &CodecRegistry) -> Result<T> {
        registry.deserialize::<T>(&self.payload)
    }

    /// Interpret the payload as a sequence of `T`.
    pub fn decode_sequence<T: Send + Sync + 'static>(
        &self,
        registry: &CodecRegistry,
    ) -> Result<Vec<T>> {
        registry.deserialize_sequence::<T>(&self.payload)
    }

    /// Write `payload` back to the sender.
    pub fn reply(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.sender.write(payload)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.payload.len())
            .field("connection", &self.sender.id())
            .finish()
    }
}

/// A message waiting in the pipeline; the sender is attached at dispatch.
pub(crate) struct Inbound {
    pub payload: Bytes,
    pub release: Option<ReleaseCallback>,
}

impl Inbound {
    pub fn new(payload: Bytes, release: Option<ReleaseCallback>) -> Self {
        Self { payload, release }
    }
}
