//! # Message Pipeline
//!
//! Per-connection inbound queue and dispatch worker.
//!
//! ## Queue States
//! ```text
//!              set handler (not paused) / resume (handler set)
//!   ┌─────────┐ ───────────────────────────────────────────> ┌──────────┐
//!   │ Stopped │                                              │ Draining │
//!   └─────────┘ <─────────────────────────────────────────── └──────────┘
//!                     clear handler / pause
//! ```
//!
//! While `Stopped` every arrival is buffered. While `Draining` a single worker
//! task pops the head and calls the handler. With `keep_in_order` the worker
//! waits for the handler and the release callback before the next pop; without
//! it each message gets its own task and arrivals skip the queue entirely.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::message::{Inbound, Message, MessageHandler};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No handler, or paused: arrivals are buffered.
    Stopped,
    /// Handler set and not paused: the worker is delivering.
    Draining,
}

struct PipelineInner {
    state: QueueState,
    queue: VecDeque<Inbound>,
    handler: Option<MessageHandler>,
    keep_in_order: bool,
    paused: bool,
    closed: bool,
    worker_active: bool,
}

impl PipelineInner {
    fn recompute_state(&mut self) {
        self.state = if self.handler.is_some() && !self.paused && !self.closed {
            QueueState::Draining
        } else {
            QueueState::Stopped
        };
    }

    /// Start the worker if there is something to drain and nobody draining it.
    fn kick(&mut self, conn: &Connection) {
        if self.state == QueueState::Draining && !self.worker_active && !self.queue.is_empty() {
            self.worker_active = true;
            conn.spawn(drain(conn.clone()));
        }
    }
}

pub(crate) struct MessagePipeline {
    inner: Mutex<PipelineInner>,
}

impl MessagePipeline {
    pub fn new(keep_in_order: bool) -> Self {
        Self {
            inner: Mutex::new(PipelineInner {
                state: QueueState::Stopped,
                queue: VecDeque::new(),
                handler: None,
                keep_in_order,
                paused: false,
                closed: false,
                worker_active: false,
            }),
        }
    }

    // No user code ever runs under this lock, so a poisoned guard still
    // holds consistent state.
    fn lock(&self) -> MutexGuard<'_, PipelineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn has_handler(&self) -> bool {
        self.lock().handler.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn keep_in_order(&self) -> bool {
        self.lock().keep_in_order
    }

    pub fn set_keep_in_order(&self, keep_in_order: bool) {
        self.lock().keep_in_order = keep_in_order;
    }

    pub fn set_handler(&self, conn: &Connection, handler: MessageHandler) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.handler = Some(handler);
        inner.recompute_state();
        inner.kick(conn);
    }

    /// Returns the previous handler, if any.
    pub fn clear_handler(&self) -> Option<MessageHandler> {
        let mut inner = self.lock();
        let previous = inner.handler.take();
        inner.recompute_state();
        previous
    }

    pub fn pause(&self) {
        let mut inner = self.lock();
        inner.paused = true;
        inner.recompute_state();
    }

    pub fn resume(&self, conn: &Connection) -> Result<()> {
        let mut inner = self.lock();
        if inner.handler.is_none() {
            return Err(ProtocolError::ConnectionStateError(
                constants::ERR_RESUME_WITHOUT_HANDLER.into(),
            ));
        }
        inner.paused = false;
        inner.recompute_state();
        inner.kick(conn);
        Ok(())
    }

    /// Accept a complete inbound message from the transport.
    pub fn deliver(&self, conn: &Connection, inbound: Inbound) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }

        if inner.keep_in_order || inner.state == QueueState::Stopped {
            inner.queue.push_back(inbound);
            trace!(connection = conn.id(), queued = inner.queue.len(), "Message queued");
            inner.kick(conn);
            return;
        }

        // Unordered and draining: bypass the queue so handlers may overlap.
        let handler = inner.handler.clone();
        drop(inner);
        if let Some(handler) = handler {
            let task_conn = conn.clone();
            conn.spawn(async move { invoke(&task_conn, &handler, inbound) });
        }
    }

    /// Stop dispatching for good and drop whatever is still queued.
    /// Returns the number of discarded messages.
    pub fn close(&self) -> usize {
        let (discarded, handler) = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.recompute_state();
            (std::mem::take(&mut inner.queue), inner.handler.take())
        };
        // Dropped outside the lock: release callbacks and handler captures may
        // run arbitrary drop code.
        let count = discarded.len();
        drop(discarded);
        drop(handler);
        count
    }
}

async fn drain(conn: Connection) {
    loop {
        let next = {
            let mut inner = conn.pipeline().lock();
            if inner.state != QueueState::Draining {
                inner.worker_active = false;
                return;
            }
            match (inner.queue.pop_front(), inner.handler.clone()) {
                (Some(inbound), Some(handler)) => (inbound, handler, inner.keep_in_order),
                (popped, _) => {
                    if let Some(inbound) = popped {
                        inner.queue.push_front(inbound);
                    }
                    inner.worker_active = false;
                    return;
                }
            }
        };

        let (inbound, handler, ordered) = next;
        if ordered {
            invoke(&conn, &handler, inbound);
        } else {
            let task_conn = conn.clone();
            conn.spawn(async move { invoke(&task_conn, &handler, inbound) });
        }
        tokio::task::yield_now().await;
    }
}

/// Run the handler, then the release callback. A panicking handler is logged
/// and does not take the worker down with it.
fn invoke(conn: &Connection, handler: &MessageHandler, inbound: Inbound) {
    let Inbound { payload, release } = inbound;
    let message = Message::new(payload, conn.clone());
    if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
        error!(connection = conn.id(), "Message handler panicked");
    }
    if let Some(release) = release {
        release();
    }
}
