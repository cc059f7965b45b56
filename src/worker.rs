//! Per-connection worker task shared by [`crate::server::Server`] and
//! [`crate::client::Client`].
//!
//! Drives [`Connection::ingest`] directly off a timed transport read and
//! applies its effects, while a command channel lets the host push outbound
//! sends without a second writer ever touching the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use uuid::Uuid;

use crate::close::CloseCode;
use crate::connection::{Connection, DataType, Effect};
use crate::error::Error;
use crate::frame::{self, OpCode};
use crate::handler::Handler;
use crate::message::Message;

pub(crate) enum Command {
    Send(Message),
    SendFragmentStart(DataType, Vec<u8>),
    SendFragmentCont(bool, Vec<u8>),
    Close(CloseCode),
}

/// A handle to a single live connection, usable from outside its worker task
/// to send data or request a close (the `send*`/`close_connection`/
/// connection-is-connected query).
#[derive(Clone)]
pub struct ConnectionHandle {
    pub(crate) id: Uuid,
    pub(crate) cmd_tx: mpsc::UnboundedSender<Command>,
    pub(crate) connected: Arc<AtomicBool>,
    /// Notified once when the connection leaves the Handshake state (either
    /// reaching Connected, or closing before it got there). Lets
    /// `Client::connect` await the transition instead of polling it
    /// without polling.
    pub(crate) open_signal: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn send(&self, data_type: DataType, bytes: Vec<u8>) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let message = match data_type {
            DataType::Text => Message::Text(String::from_utf8(bytes)?),
            DataType::Binary => Message::Binary(bytes),
        };
        self.cmd_tx
            .send(Command::Send(message))
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn send_fragment_start(&self, data_type: DataType, bytes: Vec<u8>) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.cmd_tx
            .send(Command::SendFragmentStart(data_type, bytes))
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn send_fragment_cont(&self, fin: bool, bytes: Vec<u8>) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.cmd_tx
            .send(Command::SendFragmentCont(fin, bytes))
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn close(&self, code: CloseCode) {
        let _ = self.cmd_tx.send(Command::Close(code));
    }
}

pub(crate) fn generate_id() -> Uuid {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    Uuid::new_v8(bytes)
}

/// Drives `conn` to completion over `stream`: reads with a bounded timeout so
/// the command channel and a closed connection are both noticed promptly,
/// applies every [`Effect`] in order, and serialises outbound writes (both
/// the connection's own control-frame replies and host-initiated sends)
/// behind the single write half this task owns.
pub(crate) async fn run_connection<H: Handler>(
    stream: TcpStream,
    conn: Connection,
    handler: Arc<H>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    handle: ConnectionHandle,
) {
    run_connection_with_prelude(stream, conn, handler, cmd_rx, handle, Vec::new()).await;
}

/// Same as [`run_connection`], but writes `prelude` (the client-side opening
/// handshake request) to the transport before entering the read/command
/// loop, so it is the very first thing the peer sees.
pub(crate) async fn run_connection_with_prelude<H: Handler>(
    stream: TcpStream,
    mut conn: Connection,
    handler: Arc<H>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    handle: ConnectionHandle,
    prelude: Vec<u8>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    if !prelude.is_empty() && write_half.write_all(&prelude).await.is_err() {
        handle.connected.store(false, Ordering::Release);
        handle.open_signal.notify_waiters();
        return;
    }

    let mut user_data: Option<H::UserData> = None;
    let mut read_buf = vec![0u8; 8192];
    let poll_interval = conn.config.read_poll_interval;

    'outer: loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(message)) => {
                        if !conn.is_connected() { continue; }
                        for frame in message.to_frames(conn.config.max_frame_size) {
                            if write_frame(&mut write_half, &conn, frame.fin, frame.opcode, frame.payload).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                    Some(Command::SendFragmentStart(data_type, bytes)) => {
                        if !conn.is_connected() { continue; }
                        let opcode = match data_type {
                            DataType::Text => OpCode::Text,
                            DataType::Binary => OpCode::Binary,
                        };
                        if write_frame(&mut write_half, &conn, false, opcode, bytes).await.is_err() {
                            break 'outer;
                        }
                    }
                    Some(Command::SendFragmentCont(fin, bytes)) => {
                        if !conn.is_connected() { continue; }
                        if write_frame(&mut write_half, &conn, fin, OpCode::Continue, bytes).await.is_err() {
                            break 'outer;
                        }
                    }
                    Some(Command::Close(code)) => {
                        let mut effects = Vec::new();
                        conn.close_with(&mut effects, code, &[]);
                        if !apply_effects(&mut write_half, &handler, &mut user_data, &handle, effects).await {
                            break 'outer;
                        }
                        if !conn.is_connected() {
                            break 'outer;
                        }
                    }
                    None => break 'outer,
                }
            }

            read_result = timeout(poll_interval, read_half.read(&mut read_buf)) => {
                match read_result {
                    Ok(Ok(0)) => {
                        debug!("transport EOF");
                        break 'outer;
                    }
                    Ok(Ok(n)) => {
                        match conn.ingest(&read_buf[..n]) {
                            Ok(effects) => {
                                if !apply_effects(&mut write_half, &handler, &mut user_data, &handle, effects).await {
                                    break 'outer;
                                }
                                if conn.state == crate::connection::State::Closed {
                                    break 'outer;
                                }
                            }
                            Err(e) => {
                                warn!("connection error: {e}");
                                break 'outer;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        error!("transport read error: {e}");
                        break 'outer;
                    }
                    Err(_elapsed) => {
                        // Just a 300ms poll tick; loop back around.
                    }
                }
            }
        }
    }

    handle.connected.store(false, Ordering::Release);
    handle.open_signal.notify_waiters();
    if let Some(user_data) = user_data.take() {
        handler.on_close(&handle, user_data);
    }
}

/// Applies a batch of [`Effect`]s in order: writes go straight to the socket,
/// `Open`/`Message` invoke the host [`Handler`]. Returns `false` if a write
/// failed and the caller should tear the connection down.
async fn apply_effects<H: Handler>(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    handler: &Arc<H>,
    user_data: &mut Option<H::UserData>,
    handle: &ConnectionHandle,
    effects: Vec<Effect>,
) -> bool {
    for effect in effects {
        match effect {
            Effect::Write(bytes) => {
                if write_half.write_all(&bytes).await.is_err() {
                    return false;
                }
            }
            Effect::Open => {
                handle.connected.store(true, Ordering::Release);
                *user_data = Some(handler.on_open(handle));
                handle.open_signal.notify_waiters();
            }
            Effect::Message(message) => {
                if let Some(ud) = user_data.as_mut() {
                    handler.on_message(handle, ud, message);
                }
            }
            Effect::Closed => {
                handle.connected.store(false, Ordering::Release);
                handle.open_signal.notify_waiters();
            }
        }
    }
    true
}

async fn write_frame(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    conn: &Connection,
    fin: bool,
    opcode: OpCode,
    mut payload: Vec<u8>,
) -> Result<(), Error> {
    let mask = if conn.role == crate::connection::Role::Client {
        Some(random_mask())
    } else {
        None
    };
    let mut out = Vec::new();
    frame::encode(&mut out, fin, opcode, mask, &mut payload);
    write_half.write_all(&out).await?;
    Ok(())
}

fn random_mask() -> [u8; 4] {
    use rand::RngCore;
    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);
    mask
}
