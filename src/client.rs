//! Client endpoint façade.
//!
//! Opens the TCP connection, writes the opening handshake request, then
//! drives [`Connection`]'s handshake state through [`crate::worker`], waiting
//! on a [`tokio::sync::Notify`] for the connection to open or fail.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use crate::close::CloseCode;
use crate::config::WebSocketConfig;
use crate::connection::{Connection, DataType};
use crate::error::Error;
use crate::handler::Handler;
use crate::handshake;
use crate::worker::{self, ConnectionHandle};

/// A live client connection. Wraps a single [`ConnectionHandle`]; `Client`
/// and `ConnectionHandle` expose the same `send`/`close`/`is_connected`
/// surface as the server side's per-connection handle.
pub struct Client {
    handle: ConnectionHandle,
    worker: tokio::task::JoinHandle<()>,
}

impl Client {
    /// Opens a TCP connection to `host:port`, sends the opening handshake
    /// request for `path`, and waits (up to `config.client_open_timeout`)
    /// for the connection to reach the Connected state. `handler.on_open` has
    /// already run by the time this returns `Ok`.
    pub async fn connect<H: Handler>(
        host: &str,
        port: u16,
        path: &str,
        handler: H,
        config: WebSocketConfig,
    ) -> Result<Self, Error> {
        let open_timeout = config.client_open_timeout;
        timeout(open_timeout, Self::connect_inner(host, port, path, handler, config))
            .await
            .map_err(|_| Error::OpenTimeout)?
    }

    async fn connect_inner<H: Handler>(
        host: &str,
        port: u16,
        path: &str,
        handler: H,
        config: WebSocketConfig,
    ) -> Result<Self, Error> {
        let stream = TcpStream::connect((host, port)).await?;

        let (request, client_key) = handshake::build_request(&format!("{host}:{port}"), path);
        let conn = Connection::new_client(config, client_key);

        let id = worker::generate_id();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id,
            cmd_tx,
            connected: Arc::new(AtomicBool::new(false)),
            open_signal: Arc::new(Notify::new()),
        };
        let handler = Arc::new(handler);

        // The request is handed to the worker task as a prelude write so it
        // goes out before the task starts its read/command select loop.
        let worker = {
            let handle = handle.clone();
            tokio::spawn(async move {
                worker::run_connection_with_prelude(stream, conn, handler, cmd_rx, handle, request).await;
            })
        };

        // Wait for the worker to signal a state transition out of Handshake
        // (either into Connected, or closed before it got there). Create the
        // notified future before re-checking the flag, so a notification
        // fired in between is never missed.
        let notified = handle.open_signal.notified();
        if !handle.is_connected() {
            notified.await;
        }
        if !handle.is_connected() {
            let _ = worker.await;
            return Err(Error::OpenTimeout);
        }

        Ok(Client { handle, worker })
    }

    pub fn id(&self) -> uuid::Uuid {
        self.handle.id()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn send(&self, data_type: DataType, bytes: Vec<u8>) -> Result<(), Error> {
        self.handle.send(data_type, bytes)
    }

    pub fn send_fragment_start(&self, data_type: DataType, bytes: Vec<u8>) -> Result<(), Error> {
        self.handle.send_fragment_start(data_type, bytes)
    }

    pub fn send_fragment_cont(&self, fin: bool, bytes: Vec<u8>) -> Result<(), Error> {
        self.handle.send_fragment_cont(fin, bytes)
    }

    pub fn close(&self, code: CloseCode) {
        self.handle.close(code);
    }

    /// Waits for the connection's worker task to finish (the connection has
    /// closed, in either direction).
    pub async fn closed(self) {
        let _ = self.worker.await;
    }
}
