//! Server endpoint façade.
//!
//! `TcpListener::bind`, a per-connection `tokio::spawn`, and a UUID-keyed
//! connection table, with [`crate::handler::Handler`] callbacks invoked
//! directly from each connection's own worker task (see [`crate::worker`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::close::CloseCode;
use crate::config::WebSocketConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::handler::Handler;
use crate::worker::{self, ConnectionHandle};

type ConnectionMap = Arc<Mutex<HashMap<Uuid, ConnectionHandle>>>;

/// A running WebSocket server. Dropping this value does not stop the accept
/// loop or any live connection; call [`Server::close`] to shut both down.
pub struct Server {
    connections: ConnectionMap,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
    accept_task: tokio::task::JoinHandle<()>,
    /// Every per-connection worker task the accept loop has spawned, so
    /// `close()` can block until all of them have exited (SPEC_FULL §5's
    /// counted wait), not just ask them to.
    tasks: Arc<Mutex<JoinSet<()>>>,
    local_addr: std::net::SocketAddr,
}

impl Server {
    /// Binds `address:port` and starts accepting connections in a background
    /// task. Each accepted socket gets its own worker task that performs the
    /// opening handshake, then drives `handler`'s callbacks for the
    /// connection's lifetime.
    pub async fn bind<H: Handler>(
        address: &str,
        port: u16,
        handler: H,
        config: WebSocketConfig,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind((address, port)).await?;
        let local_addr = listener.local_addr()?;
        let handler = Arc::new(handler);
        let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        let tasks = Arc::new(Mutex::new(JoinSet::new()));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            handler,
            connections.clone(),
            config,
            shutdown.clone(),
            tasks.clone(),
        ));

        info!("server listening on {local_addr}");
        Ok(Server {
            connections,
            shutdown,
            closed,
            accept_task,
            tasks,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Number of connections currently tracked (handshake pending or
    /// established).
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn connection_is_connected(&self, id: Uuid) -> bool {
        self.connections
            .lock()
            .await
            .get(&id)
            .map(|h| h.is_connected())
            .unwrap_or(false)
    }

    pub async fn connection(&self, id: Uuid) -> Option<ConnectionHandle> {
        self.connections.lock().await.get(&id).cloned()
    }

    pub async fn close_connection(&self, id: Uuid, code: CloseCode) {
        if let Some(handle) = self.connections.lock().await.get(&id) {
            handle.close(code);
        }
    }

    /// Stops accepting new connections, closes every connection currently
    /// tracked, and blocks until every connection task the accept loop has
    /// spawned has exited — the counted wait SPEC_FULL §5 requires of a
    /// host-initiated close, not a fire-and-forget one.
    pub async fn close(self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
        let _ = self.accept_task.await;

        let handles: Vec<ConnectionHandle> = self.connections.lock().await.values().cloned().collect();
        for handle in handles {
            handle.close(CloseCode::NORMAL);
        }

        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}

async fn accept_loop<H: Handler>(
    listener: TcpListener,
    handler: Arc<H>,
    connections: ConnectionMap,
    config: WebSocketConfig,
    shutdown: Arc<Notify>,
    tasks: Arc<Mutex<JoinSet<()>>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("accepted connection from {peer}");
                        let id = worker::generate_id();
                        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                        let handle = ConnectionHandle {
                            id,
                            cmd_tx,
                            connected: Arc::new(AtomicBool::new(false)),
                            open_signal: Arc::new(Notify::new()),
                        };
                        connections.lock().await.insert(id, handle.clone());

                        let handler = handler.clone();
                        let connections = connections.clone();
                        let conn = Connection::new_server(config.clone());
                        tasks.lock().await.spawn(async move {
                            worker::run_connection(stream, conn, handler, cmd_rx, handle).await;
                            connections.lock().await.remove(&id);
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {e}");
                    }
                }
            }
        }
    }
}
