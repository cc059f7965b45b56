use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Error taxonomy for the protocol engine.
///
/// Transport and resource errors are recoverable (the connection may stay open,
/// or simply closes without a specific wire close-code); protocol and encoding
/// errors always carry a close-code reply (see [`crate::close`]).
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    // Handshake errors
    #[error("incomplete HTTP request")]
    IncompleteHandshake,

    #[error("Sec-WebSocket-Key header missing from the request")]
    NoSecWebsocketKey,

    #[error("Upgrade: websocket header missing or incorrect")]
    NoUpgradeHeader,

    #[error("Connection: Upgrade header missing or incorrect")]
    NoConnectionHeader,

    #[error("Host header missing from the request")]
    NoHostHeader,

    #[error("server response did not contain HTTP 101 Switching Protocols")]
    NoUpgrade,

    #[error("server's Sec-WebSocket-Accept value did not match the expected value")]
    InvalidAcceptKey,

    #[error("client open timed out before the connection reached the Connected state")]
    OpenTimeout,

    // Framing errors
    #[error("reserved bits must be zero")]
    ReservedBitsNonZero,

    #[error("unrecognized opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("control frames must not be fragmented")]
    ControlFrameFragmented,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadTooLarge,

    #[error("server-side connection received a frame with the mask bit unset")]
    UnmaskedFrameFromClient,

    #[error("client-side connection received a frame with the mask bit set")]
    MaskedFrameFromServer,

    #[error("text or binary frame received while a previous message is still in progress")]
    MessageAlreadyInProgress,

    #[error("continuation frame received without a preceding start frame")]
    UnexpectedContinuation,

    #[error("invalid close frame payload length: {0}")]
    InvalidCloseLength(usize),

    #[error("close code {0} is not a legal close code")]
    InvalidCloseCode(u16),

    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("reassembled message exceeds the configured maximum of {0} bytes")]
    MessageTooLarge(usize),

    // Caller errors
    #[error("operation attempted on a connection that is not Connected")]
    NotConnected,

    #[error("connection is closed")]
    ConnectionClosed,
}

/// Maps a protocol-level [`Error`] to the wire close code that should accompany it,
/// Returns `None` for errors that are not protocol/encoding failures
/// (transport errors, caller errors) and therefore carry no close-code reply.
impl Error {
    pub fn close_code(&self) -> Option<crate::close::CloseCode> {
        use crate::close::CloseCode;
        match self {
            Error::FromUtf8Error { .. } | Error::InvalidUtf8 => Some(CloseCode::INVALID_PAYLOAD_DATA),
            Error::ReservedBitsNonZero
            | Error::InvalidOpcode(_)
            | Error::ControlFrameFragmented
            | Error::ControlFramePayloadTooLarge
            | Error::UnmaskedFrameFromClient
            | Error::MaskedFrameFromServer
            | Error::MessageAlreadyInProgress
            | Error::UnexpectedContinuation
            | Error::InvalidCloseLength(_)
            | Error::InvalidCloseCode(_) => Some(CloseCode::PROTOCOL_ERROR),
            Error::MessageTooLarge(_) => Some(CloseCode::MESSAGE_TOO_BIG),
            _ => None,
        }
    }
}
