//! Echo server and client in one process.
//!
//! ```text
//! cargo run --example echo [config.toml]
//! ```

use protoforge::config::NetworkConfig;
use protoforge::protocol::NameValidator;
use protoforge::service::{Client, Server, ServerEvent};
use protoforge::utils::logging::init_logging;
use protoforge::utils::metrics::global_metrics;
use protoforge::{CodecRegistry, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const PROTOCOL_NAME: &str = "echo-v1";

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };
    config.validate_strict()?;
    init_logging(&config.logging);

    config.server.address = "127.0.0.1:0".into();
    let (server, mut events) = Server::bind(&config, NameValidator::new(PROTOCOL_NAME)).await?;
    if let Some(addr) = server.local_addr() {
        config.client.address = addr.to_string();
    }

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::ConnectionValidated(conn) => {
                    info!(connection = conn.id(), peer = ?conn.peer_addr(), "Client joined");
                    conn.set_handler(|msg| {
                        if let Err(e) = msg.reply(msg.payload().clone()) {
                            warn!(error = %e, "Echo failed");
                        }
                    });
                }
                ServerEvent::ValidationFailed { reason, .. } => {
                    warn!(%reason, "Client rejected");
                }
                ServerEvent::ConnectionDisconnected { connection, error } => {
                    info!(connection = connection.id(), error = ?error, "Client left");
                }
            }
        }
    });

    let registry = Arc::new(CodecRegistry::new());
    let client = Client::connect(&config, NameValidator::new(PROTOCOL_NAME)).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let decode_with = Arc::clone(&registry);
    client.connection().set_handler(move |msg| {
        let _ = tx.send(msg.decode_sequence::<String>(&decode_with));
    });

    let lines: Vec<String> = ["hello", "binary", "world"]
        .into_iter()
        .map(String::from)
        .collect();
    client.write(registry.serialize_sequence(&lines)?)?;

    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(Ok(echoed))) => info!(?echoed, "Echo received"),
        Ok(Some(Err(e))) => warn!(error = %e, "Undecodable echo"),
        Ok(None) | Err(_) => warn!("No echo received"),
    }

    client.close();
    server.shutdown();
    global_metrics().log_metrics();
    Ok(())
}
