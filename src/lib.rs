//! # protoforge
//!
//! Framework for custom binary protocols: typed codecs, an ordered
//! per-connection message pipeline, and a pluggable negotiation handshake
//! run before a connection reaches the application.
//!
//! ## Layers
//! - [`core`]: codec registry, primitive codecs, derived sequence codecs
//! - [`protocol`]: connections, message pipeline, negotiation, validators
//! - [`transport`]: TCP, UDP and in-memory transports
//! - [`service`]: server accept loop and client connector
//! - [`config`], [`utils`]: settings, logging, metrics, timeouts
//!
//! ## Quick start
//! ```rust,no_run
//! use protoforge::config::NetworkConfig;
//! use protoforge::protocol::NameValidator;
//! use protoforge::service::{Client, Server, ServerEvent};
//!
//! # async fn run() -> protoforge::Result<()> {
//! let config = NetworkConfig::default();
//! let (server, mut events) = Server::bind(&config, NameValidator::new("chat-v1")).await?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         if let ServerEvent::ConnectionValidated(conn) = event {
//!             // reply through the message; capturing `conn` would keep it alive
//!             conn.set_handler(|msg| {
//!                 let _ = msg.reply(msg.payload().clone());
//!             });
//!         }
//!     }
//! });
//!
//! let client = Client::connect(&config, NameValidator::new("chat-v1")).await?;
//! client.write(&b"hello"[..])?;
//! # drop(server);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::{CodecEntry, CodecRegistry};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{
    Connection, Message, NameValidator, Negotiation, Role, Validator, ValidatorAction,
};
pub use crate::service::{Client, Server, ServerEvent};
