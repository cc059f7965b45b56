//! Per-connection state machine.
//!
//! The connection owns its read buffer directly (a `BytesMut`), so bytes
//! handed to `ingest()` are drained internally (`BytesMut::split_to`) as they
//! are consumed, rather than requiring the caller to track an offset.

use std::time::Instant;

use bytes::BytesMut;

use crate::close::CloseCode;
use crate::config::WebSocketConfig;
use crate::dispatcher;
use crate::error::Error;
use crate::frame::{self, ParseOutcome};
use crate::handshake::{self, ClientHandshakeOutcome, ServerHandshakeOutcome};
use crate::message::Message;
use crate::utf8::Utf8Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Handshake,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Text,
    Binary,
}

/// Reassembly slot for a fragmented message in progress.
pub struct PartialMessage {
    pub data_type: DataType,
    pub payload: Vec<u8>,
    pub first_received: bool,
    pub complete: bool,
    pub validator: Utf8Validator,
}

/// Observable effects of a call to [`Connection::ingest`]. The caller (the
/// per-connection worker task, see [`crate::dispatcher`]) is responsible for
/// writing `Write` payloads to the transport and invoking the host
/// [`crate::handler::Handler`] for `Open`/`Message`/`Closed`, in order.
#[derive(Debug)]
pub enum Effect {
    Open,
    Message(Message),
    Write(Vec<u8>),
    Closed,
}

pub struct Connection {
    pub role: Role,
    pub state: State,
    pub config: WebSocketConfig,
    read_buffer: BytesMut,
    pub partial: Option<PartialMessage>,
    pub(crate) message_deadline: Option<Instant>,
    /// Client-side only: the nonce sent in the opening request, verified
    /// against the server's `Sec-WebSocket-Accept` reply.
    client_key: Option<String>,
    /// Set on the first `NeedMore`/`Invalid` outcome while in `Handshake`;
    /// exceeding `config.handshake_timeout` abandons the handshake (the only
    /// thing that force-closes a connection stuck in `Handshake`).
    handshake_deadline: Option<Instant>,
}

impl Connection {
    pub fn new_server(config: WebSocketConfig) -> Self {
        Connection {
            role: Role::Server,
            state: State::Handshake,
            config,
            read_buffer: BytesMut::new(),
            partial: None,
            message_deadline: None,
            client_key: None,
            handshake_deadline: None,
        }
    }

    pub fn new_client(config: WebSocketConfig, client_key: String) -> Self {
        Connection {
            role: Role::Client,
            state: State::Handshake,
            config,
            read_buffer: BytesMut::new(),
            partial: None,
            message_deadline: None,
            client_key: Some(client_key),
            handshake_deadline: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// Feeds newly-read transport bytes into the connection, driving the
    /// handshake or frame-reassembly state machine as appropriate. Returns
    /// the ordered list of effects the caller must apply; a protocol or
    /// encoding error is reported via `Err` after having already queued
    /// whatever close-reply `Effect::Write` is appropriate.
    pub fn ingest(&mut self, bytes: &[u8]) -> Result<Vec<Effect>, Error> {
        self.read_buffer.extend_from_slice(bytes);
        let mut effects = Vec::new();

        match self.state {
            State::Closed => {
                self.read_buffer.clear();
            }
            State::Handshake => self.ingest_handshake(&mut effects),
            State::Connected => self.ingest_frames(&mut effects)?,
        }

        Ok(effects)
    }

    /// On a complete/well-formed handshake, transitions to `Connected`. On an
    /// incomplete or malformed one, stays in `Handshake` (SPEC_FULL §4.3/§4.4)
    /// — the malformed attempt's bytes are discarded so they aren't re-parsed
    /// against whatever the peer sends next, but the connection itself is
    /// left for the caller (or the handshake deadline below) to close.
    fn ingest_handshake(&mut self, effects: &mut Vec<Effect>) {
        match self.role {
            Role::Server => match handshake::try_accept(&self.read_buffer) {
                ServerHandshakeOutcome::NeedMore => self.tick_handshake_deadline(effects),
                ServerHandshakeOutcome::Invalid(e) => {
                    log::warn!("invalid handshake request: {e}");
                    self.read_buffer.clear();
                    self.tick_handshake_deadline(effects);
                }
                ServerHandshakeOutcome::Accepted { response, consumed } => {
                    let _ = self.read_buffer.split_to(consumed);
                    self.state = State::Connected;
                    self.handshake_deadline = None;
                    effects.push(Effect::Write(response));
                    effects.push(Effect::Open);
                }
            },
            Role::Client => {
                let key = self.client_key.clone().unwrap_or_default();
                match handshake::verify_reply(&self.read_buffer, &key) {
                    ClientHandshakeOutcome::NeedMore => self.tick_handshake_deadline(effects),
                    ClientHandshakeOutcome::Invalid(e) => {
                        log::warn!("invalid handshake reply: {e}");
                        self.read_buffer.clear();
                        self.tick_handshake_deadline(effects);
                    }
                    ClientHandshakeOutcome::Accepted { consumed } => {
                        let _ = self.read_buffer.split_to(consumed);
                        self.state = State::Connected;
                        self.handshake_deadline = None;
                        effects.push(Effect::Open);
                    }
                }
            }
        }
    }

    /// Starts (or checks) the handshake deadline while stuck in `Handshake`.
    /// Mirrors `tick_deadline`'s unset-then-check shape for the same reason
    /// (SPEC_FULL §9's `tv_sec`/`tv_nsec` open question): a connection that
    /// never completes its handshake must eventually be force-closed rather
    /// than sit in `Handshake` forever.
    fn tick_handshake_deadline(&mut self, effects: &mut Vec<Effect>) {
        match self.handshake_deadline {
            None => self.handshake_deadline = Some(Instant::now()),
            Some(deadline) => {
                if Instant::now().duration_since(deadline) > self.config.handshake_timeout {
                    log::warn!("abandoning handshake after {:?}", self.config.handshake_timeout);
                    self.handshake_deadline = None;
                    self.state = State::Closed;
                    effects.push(Effect::Closed);
                }
            }
        }
    }

    fn ingest_frames(&mut self, effects: &mut Vec<Effect>) -> Result<(), Error> {
        loop {
            match frame::parse_header(&self.read_buffer) {
                ParseOutcome::NeedMore => {
                    self.tick_deadline(effects);
                    return Ok(());
                }
                ParseOutcome::Invalid(e) => {
                    self.fail(effects, e.close_code().unwrap_or(CloseCode::PROTOCOL_ERROR));
                    return Err(e);
                }
                ParseOutcome::Ok(header, offset) => {
                    if self.read_buffer.len() < offset + header.payload_len {
                        self.tick_deadline(effects);
                        return Ok(());
                    }

                    let expects_mask = self.role == Role::Server;
                    if header.masked != expects_mask {
                        let err = if expects_mask {
                            Error::UnmaskedFrameFromClient
                        } else {
                            Error::MaskedFrameFromServer
                        };
                        self.fail(effects, CloseCode::PROTOCOL_ERROR);
                        return Err(err);
                    }

                    let mut payload = self.read_buffer[offset..offset + header.payload_len].to_vec();
                    if let Some(mask) = header.mask {
                        frame::apply_mask(mask, &mut payload);
                    }
                    let _ = self.read_buffer.split_to(offset + header.payload_len);

                    if let Err(e) = dispatcher::dispatch(self, header.fin, header.opcode, payload, effects) {
                        let code = e.close_code().unwrap_or(CloseCode::PROTOCOL_ERROR);
                        self.fail(effects, code);
                        return Err(e);
                    }

                    if self.state == State::Closed {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Called whenever a `Connected`-state ingest finds nothing more to
    /// parse. Starts the message-completion deadline on the first such call
    /// while a partial message is in progress, and abandons the partial
    /// message if the deadline has been exceeded.
    fn tick_deadline(&mut self, _effects: &mut [Effect]) {
        if self.partial.is_none() {
            self.message_deadline = None;
            return;
        }
        match self.message_deadline {
            None => self.message_deadline = Some(Instant::now()),
            Some(deadline) => {
                if Instant::now().duration_since(deadline) > self.config.message_completion_timeout {
                    log::warn!("abandoning incomplete message after {:?}", self.config.message_completion_timeout);
                    self.partial = None;
                    self.message_deadline = None;
                }
            }
        }
    }

    /// Queues a close-frame reply carrying `code`, transitions to `Closed`,
    /// and clears any in-progress reassembly. Used both for protocol/encoding
    /// errors (§7) and for clean peer-initiated closes (§4.5).
    pub fn fail(&mut self, effects: &mut Vec<Effect>, code: CloseCode) {
        self.close_with(effects, code, &[]);
    }

    pub fn close_with(&mut self, effects: &mut Vec<Effect>, code: CloseCode, trailer: &[u8]) {
        if self.state == State::Closed {
            return;
        }
        let mask = if self.role == Role::Client { Some(random_mask()) } else { None };
        let mut frame = crate::frame::Frame::close(code, trailer);
        let mut out = Vec::new();
        frame::encode(&mut out, frame.fin, frame.opcode, mask, &mut frame.payload);
        effects.push(Effect::Write(out));
        self.partial = None;
        self.message_deadline = None;
        self.state = State::Closed;
        effects.push(Effect::Closed);
    }
}

fn random_mask() -> [u8; 4] {
    use rand::RngCore;
    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OpCode;

    fn masked_frame(fin: bool, opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let mut buf = payload.to_vec();
        let mut out = Vec::new();
        frame::encode(&mut out, fin, opcode, Some(mask), &mut buf);
        out
    }

    fn connect_server() -> Connection {
        let mut conn = Connection::new_server(WebSocketConfig::default());
        let req = b"GET /x HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let effects = conn.ingest(req).unwrap();
        assert!(matches!(effects[0], Effect::Write(_)));
        assert!(matches!(effects[1], Effect::Open));
        assert_eq!(conn.state, State::Connected);
        conn
    }

    #[test]
    fn echo_unmasked_text_scenario() {
        let mut conn = connect_server();
        let input = [0x81u8, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58];
        let effects = conn.ingest(&input).unwrap();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::Message(Message::Text(s)) => assert_eq!(s, "Hello"),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn fragmented_valid_utf8_delivers_one_message() {
        let mut conn = connect_server();
        let mask = [1, 2, 3, 4];
        let f1 = masked_frame(false, OpCode::Text, &[0xE2, 0x82], mask);
        let f2 = masked_frame(true, OpCode::Continue, &[0xAC], mask);

        assert!(conn.ingest(&f1).unwrap().is_empty());
        let effects = conn.ingest(&f2).unwrap();
        match &effects[0] {
            Effect::Message(Message::Text(s)) => assert_eq!(s, "\u{20AC}"),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn fragmented_invalid_utf8_closes_1007() {
        let mut conn = connect_server();
        let mask = [1, 2, 3, 4];
        let f1 = masked_frame(false, OpCode::Text, &[0xC3], mask);
        let f2 = masked_frame(true, OpCode::Continue, &[0x28], mask);

        assert!(conn.ingest(&f1).unwrap().is_empty());
        let err = conn.ingest(&f2).unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8 | Error::FromUtf8Error { .. }));
        assert_eq!(conn.state, State::Closed);
    }

    #[test]
    fn ping_round_trip() {
        let mut conn = connect_server();
        let mask = [9, 9, 9, 9];
        let ping = masked_frame(true, OpCode::Ping, b"abc", mask);
        let effects = conn.ingest(&ping).unwrap();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::Write(bytes) => {
                assert_eq!(bytes[0], 0b1000_1010); // FIN + Pong
                assert_eq!(&bytes[2..], b"abc");
            }
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn close_handshake_fires_once() {
        let mut conn = connect_server();
        let mask = [5, 5, 5, 5];
        let close = masked_frame(true, OpCode::Close, &1000u16.to_be_bytes(), mask);
        let effects = conn.ingest(&close).unwrap();
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], Effect::Write(_)));
        assert!(matches!(effects[1], Effect::Closed));
        assert_eq!(conn.state, State::Closed);
    }

    #[test]
    fn unmasked_frame_from_client_rejected() {
        let mut conn = connect_server();
        let mut buf = b"Hello".to_vec();
        let mut out = Vec::new();
        frame::encode(&mut out, true, OpCode::Text, None, &mut buf);
        let err = conn.ingest(&out).unwrap_err();
        assert!(matches!(err, Error::UnmaskedFrameFromClient));
    }

    #[test]
    fn oversized_message_closes_with_1009() {
        let mut config = WebSocketConfig::default();
        config.max_message_size = 4;
        let mut conn = Connection::new_server(config);
        let req = b"GET /x HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        conn.ingest(req).unwrap();

        let mask = [1, 2, 3, 4];
        let frame = masked_frame(true, OpCode::Binary, b"too long", mask);
        let err = conn.ingest(&frame).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge(4)));
        assert_eq!(conn.state, State::Closed);
    }
}
