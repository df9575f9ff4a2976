//! End-to-end tests over real TCP sockets: server, client, negotiation and traffic

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::Bytes;
use protoforge::config::NetworkConfig;
use protoforge::error::ProtocolError;
use protoforge::protocol::{Message, NameValidator};
use protoforge::service::{Client, Server, ServerEvent, ServerEvents, ServerOptions};
use protoforge::CodecRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn local_config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.negotiation.timeout = Duration::from_secs(2);
    })
}

fn client_config(server: &Server) -> NetworkConfig {
    let addr = server.local_addr().expect("bound server");
    NetworkConfig::default_with_overrides(|c| {
        c.client.address = addr.to_string();
        c.negotiation.timeout = Duration::from_secs(2);
    })
}

async fn next_event(events: &mut ServerEvents) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no server event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_validated_client_can_exchange_messages() {
    let (server, mut events) = Server::bind(&local_config(), NameValidator::new("1234"))
        .await
        .unwrap();

    let client = Client::connect(&client_config(&server), NameValidator::new("1234"))
        .await
        .unwrap();

    let server_side = match next_event(&mut events).await {
        ServerEvent::ConnectionValidated(conn) => conn,
        other => panic!("unexpected {other:?}"),
    };

    // echo on the server side
    let echo = server_side.clone();
    server_side.set_handler(move |msg: Message| {
        let _ = echo.write(msg.into_payload());
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.connection().set_handler(move |msg| {
        let _ = tx.send(msg.into_payload());
    });

    for word in ["alpha", "beta", "gamma"] {
        client.write(Bytes::from(word)).unwrap();
    }
    for word in ["alpha", "beta", "gamma"] {
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], word.as_bytes());
    }

    client.close();
    match next_event(&mut events).await {
        ServerEvent::ConnectionDisconnected { connection, error } => {
            assert_eq!(connection, server_side);
            assert!(error.is_none(), "orderly close should carry no error");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_mismatched_names_fail_on_both_sides() {
    let (server, mut events) = Server::bind(&local_config(), NameValidator::new("1234"))
        .await
        .unwrap();

    let result = Client::connect(&client_config(&server), NameValidator::new("4321")).await;
    assert!(matches!(result, Err(ProtocolError::NegotiationFailure(_))));

    match next_event(&mut events).await {
        ServerEvent::ValidationFailed { connection, reason } => {
            assert!(connection.is_closed());
            assert!(reason.contains("different protocol name"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_server_installs_shared_handler() {
    let registry = Arc::new(CodecRegistry::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let decode_with = Arc::clone(&registry);
    let options = ServerOptions::from(&local_config()).with_message_handler(move |msg| {
        let words = msg.decode_sequence::<String>(&decode_with);
        let _ = tx.send(words.ok());
    });

    let (server, _events) = Server::bind_with(&local_config(), NameValidator::new("chat"), options)
        .await
        .unwrap();
    let client = Client::connect(&client_config(&server), NameValidator::new("chat"))
        .await
        .unwrap();

    let words = vec!["hello".to_string(), "world".to_string()];
    client
        .write(registry.serialize_sequence(&words).unwrap())
        .unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, Some(words));
}

#[tokio::test]
async fn test_server_enforces_connection_limit() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.server.max_connections = 1;
    });
    let (server, mut events) = Server::bind(&config, NameValidator::new("x")).await.unwrap();
    let client_cfg = client_config(&server);

    let _first = Client::connect(&client_cfg, NameValidator::new("x")).await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ServerEvent::ConnectionValidated(_)
    ));

    let second = Client::connect(&client_cfg, NameValidator::new("x")).await;
    assert!(second.is_err());
    match next_event(&mut events).await {
        ServerEvent::ValidationFailed { reason, .. } => assert!(reason.contains("limit")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let (server, mut events) = Server::bind(&local_config(), NameValidator::new("x"))
        .await
        .unwrap();
    let client = Client::connect(&client_config(&server), NameValidator::new("x"))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ServerEvent::ConnectionValidated(_)
    ));

    server.shutdown();
    assert!(!server.is_running());
    tokio::time::timeout(Duration::from_secs(2), client.connection().closed())
        .await
        .expect("client should observe the server closing");
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.negotiation.timeout = Duration::from_millis(100);
    });
    let (server, mut events) = Server::bind(&config, NameValidator::new("x")).await.unwrap();

    let _socket = tokio::net::TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();
    match next_event(&mut events).await {
        ServerEvent::ValidationFailed { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_large_frames_and_backpressure() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.connection.inflight_limit = 2;
    });
    let (server, mut events) = Server::bind(&config, NameValidator::new("x")).await.unwrap();
    let client = Client::connect(&client_config(&server), NameValidator::new("x"))
        .await
        .unwrap();
    let server_side = match next_event(&mut events).await {
        ServerEvent::ConnectionValidated(conn) => conn,
        other => panic!("unexpected {other:?}"),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    server_side.set_handler(move |msg| {
        std::thread::sleep(Duration::from_millis(2));
        let _ = tx.send(msg.len());
    });

    let big = vec![0xABu8; 256 * 1024];
    for _ in 0..20 {
        client.write(big.clone()).unwrap();
    }
    for _ in 0..20 {
        let len = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(len, big.len());
    }
}
