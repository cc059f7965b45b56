//! Embeddable RFC 6455 WebSocket protocol engine for the Tokio stack.
//!
//! This crate offers a small websockets server and client implementation, so
//! a host application can accept or originate WebSocket connections, using an
//! event-callback style ([`handler::Handler::on_open`]/`on_message`/
//! `on_close`) to exchange text or binary messages. It's an async library
//! based on the tokio runtime, using a tokio `TcpStream` behind the scenes as
//! the starting point to implement the standard of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455):
//! performing handshakes, reading frames, parsing masks, handling opcodes and
//! internal payload, and reassembling fragmented messages.
//!
//! TLS, permessage-deflate and other extensions, subprotocol negotiation, and
//! persistent reconnection are out of scope; see `server`/`client` for the
//! host-facing entry points.

pub mod client;
pub mod close;
pub mod config;
pub mod connection;
mod dispatcher;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod message;
pub mod server;
pub mod utf8;
pub mod worker;

pub use client::Client;
pub use config::WebSocketConfig;
pub use connection::{Connection, DataType, Role};
pub use handler::Handler;
pub use message::Message;
pub use server::Server;
pub use worker::ConnectionHandle;
