// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::error::{ProtocolError, Result};
use crate::protocol::*;
use crate::transport::{memory, Transport};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<Bytes>>>,
}

impl Transport for Recorder {
    fn send(&self, payload: Bytes) -> Result<()> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "recorder"
    }
}

fn collecting(conn: &Connection) -> mpsc::UnboundedReceiver<Bytes> {
    let (tx, rx) = mpsc::unbounded_channel();
    conn.set_handler(move |msg| {
        let _ = tx.send(msg.payload().clone());
    });
    rx
}

async fn recv_n(rx: &mut mpsc::UnboundedReceiver<Bytes>, n: usize) -> Vec<Bytes> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("handler dropped");
        out.push(next);
    }
    out
}

fn numbered(i: u32) -> Bytes {
    Bytes::copy_from_slice(&i.to_le_bytes())
}

#[tokio::test]
async fn test_ordered_delivery_never_overlaps() {
    let conn = Connection::new(Recorder::default());
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    {
        let busy = Arc::clone(&busy);
        let overlaps = Arc::clone(&overlaps);
        conn.set_handler(move |msg| {
            if busy.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(1));
            busy.store(false, Ordering::SeqCst);
            let _ = tx.send(msg.payload().clone());
        });
    }

    for i in 0..50 {
        conn.message_received(numbered(i), None);
    }

    let got = recv_n(&mut rx, 50).await;
    let expected: Vec<Bytes> = (0..50).map(numbered).collect();
    assert_eq!(got, expected);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unordered_delivers_each_once() {
    let conn = Connection::new(Recorder::default());
    conn.set_keep_in_order(false);
    let mut rx = collecting(&conn);

    for i in 0..200 {
        conn.message_received(numbered(i), None);
    }

    let mut got: Vec<u32> = recv_n(&mut rx, 200)
        .await
        .iter()
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    got.sort_unstable();
    assert_eq!(got, (0..200).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_pause_buffers_and_resume_preserves_order() {
    let conn = Connection::new(Recorder::default());
    conn.pause();
    let mut rx = collecting(&conn);
    assert_eq!(conn.queue_state(), QueueState::Stopped);

    for i in 0..5 {
        conn.message_received(numbered(i), None);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(conn.queued_len(), 5);

    conn.resume().unwrap();
    assert_eq!(conn.queue_state(), QueueState::Draining);
    let got = recv_n(&mut rx, 5).await;
    assert_eq!(got, (0..5).map(numbered).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_messages_wait_for_a_handler() {
    let conn = Connection::new(Recorder::default());
    conn.message_received(Bytes::from_static(b"early"), None);
    assert_eq!(conn.queued_len(), 1);

    let mut rx = collecting(&conn);
    assert_eq!(&recv_n(&mut rx, 1).await[0][..], b"early");
}

#[tokio::test]
async fn test_resume_without_handler_fails() {
    let conn = Connection::new(Recorder::default());
    conn.pause();
    assert!(matches!(
        conn.resume(),
        Err(ProtocolError::ConnectionStateError(_))
    ));
}

#[tokio::test]
async fn test_release_runs_after_handler() {
    let conn = Connection::new(Recorder::default());
    let handled = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel();

    {
        let handled = Arc::clone(&handled);
        conn.set_handler(move |_| handled.store(true, Ordering::SeqCst));
    }
    let handled_at_release = Arc::clone(&handled);
    conn.message_received(
        Bytes::from_static(b"x"),
        Some(Box::new(move || {
            let _ = tx.send(handled_at_release.load(Ordering::SeqCst));
        })),
    );

    assert!(rx.recv().await.unwrap());
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_delivery() {
    let conn = Connection::new(Recorder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.set_handler(move |msg| {
        if msg.payload().as_ref() == b"boom" {
            panic!("handler failure");
        }
        let _ = tx.send(msg.payload().clone());
    });

    conn.message_received(Bytes::from_static(b"boom"), None);
    conn.message_received(Bytes::from_static(b"after"), None);
    assert_eq!(&recv_n(&mut rx, 1).await[0][..], b"after");
}

#[tokio::test]
async fn test_write_reaches_transport_until_closed() {
    let recorder = Recorder::default();
    let conn = Connection::new(recorder.clone());

    conn.write(&b"hello"[..]).unwrap();
    conn.close();
    assert!(conn.is_closed());
    assert!(matches!(
        conn.write(&b"late"[..]),
        Err(ProtocolError::ConnectionStateError(_))
    ));
    assert_eq!(recorder.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_disconnect_fires_once() {
    let conn = Connection::new(Recorder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.on_disconnect(move |_, cause| {
        let _ = tx.send(cause.is_some());
    });

    conn.close();
    conn.close();
    conn.close_with_error(ProtocolError::Timeout);

    assert_eq!(rx.recv().await, Some(false));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_late_disconnect_subscriber_sees_cause() {
    let conn = Connection::new(Recorder::default());
    conn.close_with_error(ProtocolError::TransportDisconnect("reset".into()));

    let (tx, rx) = tokio::sync::oneshot::channel();
    conn.on_disconnect(move |_, cause| {
        let _ = tx.send(cause.map(|e| e.to_string()));
    });
    let cause = rx.await.unwrap().unwrap();
    assert!(cause.contains("reset"));
}

#[tokio::test]
async fn test_close_discards_queue_without_release() {
    let conn = Connection::new(Recorder::default());
    let released = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let released = Arc::clone(&released);
        conn.message_received(
            Bytes::from_static(b"q"),
            Some(Box::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })),
        );
    }
    conn.close();
    assert_eq!(conn.queued_len(), 0);
    assert_eq!(released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_negotiation_success_over_memory_pair() {
    let (a, b) = memory::pair();
    b.set_keep_in_order(false);

    let responder = tokio::spawn(
        Negotiation::new(Role::Responder, NameValidator::new("1234")).run(b),
    );
    let a = Negotiation::new(Role::Initiator, NameValidator::new("1234"))
        .run(a)
        .await
        .unwrap();
    let b = responder.await.unwrap().unwrap();

    assert!(!a.has_handler());
    assert!(!b.has_handler());
    assert!(!b.keep_in_order());

    let mut rx = collecting(&b);
    a.write(&b"after handshake"[..]).unwrap();
    assert_eq!(&recv_n(&mut rx, 1).await[0][..], b"after handshake");
}

#[tokio::test]
async fn test_negotiation_mismatch_closes_both_ends() {
    let (a, b) = memory::pair();

    let responder = tokio::spawn(
        Negotiation::new(Role::Responder, NameValidator::new("1234")).run(b.clone()),
    );
    let result = Negotiation::new(Role::Initiator, NameValidator::new("4321"))
        .with_timeout(Duration::from_secs(2))
        .run(a.clone())
        .await;

    assert!(matches!(result, Err(ProtocolError::NegotiationFailure(_))));
    assert!(matches!(
        responder.await.unwrap(),
        Err(ProtocolError::NegotiationFailure(_))
    ));
    assert!(a.is_closed());
    assert!(b.is_closed());
}

#[tokio::test]
async fn test_negotiation_times_out_on_silent_peer() {
    let (a, _silent) = memory::pair();
    let result = negotiate(
        a.clone(),
        Role::Initiator,
        NameValidator::new("x"),
        Duration::from_millis(50),
    )
    .await;

    match result {
        Err(ProtocolError::NegotiationFailure(reason)) => assert!(reason.contains("timed out")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(a.is_closed());
}

#[tokio::test]
async fn test_close_interrupts_negotiation() {
    let (a, _b) = memory::pair();
    let waiting = tokio::spawn(
        Negotiation::new(Role::Responder, NameValidator::new("x"))
            .with_timeout(Duration::from_secs(30))
            .run(a.clone()),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    a.close();

    let result = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .expect("close should wake the negotiation")
        .unwrap();
    assert!(matches!(result, Err(ProtocolError::NegotiationFailure(_))));
}

#[tokio::test]
async fn test_immediate_accept_needs_no_exchange() {
    let conn = Connection::new(Recorder::default());
    let accept = |_: Role, _: Option<&[u8]>| ValidatorAction::Accept;
    let conn = Negotiation::new(Role::Initiator, accept).run(conn).await.unwrap();
    assert!(!conn.is_closed());
}
