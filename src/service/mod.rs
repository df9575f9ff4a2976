//! # Service Layer
//!
//! Server accept loop and client connector built on negotiation.
//!
//! ## Components
//! - **Server**: negotiates inbound connections as responder, publishes [`ServerEvent`]s
//! - **Client**: opens a TCP connection and negotiates as initiator

pub mod client;
pub mod server;

pub use client::Client;
pub use server::{Server, ServerEvent, ServerEvents, ServerOptions};
