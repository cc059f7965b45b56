//! Message dispatcher: per-opcode handling.
//!
//! Fragmented-message bookkeeping and ping/pong/close handling, driven from
//! [`Connection::ingest`] one parsed frame at a time and expressed as
//! [`Effect`]s for the caller to apply.

use crate::close::CloseCode;
use crate::connection::{Connection, DataType, Effect, PartialMessage, Role};
use crate::error::Error;
use crate::frame::OpCode;
use crate::message::Message;
use crate::utf8::{Utf8Status, Utf8Validator};

pub fn dispatch(
    conn: &mut Connection,
    fin: bool,
    opcode: OpCode,
    payload: Vec<u8>,
    effects: &mut Vec<Effect>,
) -> Result<(), Error> {
    match opcode {
        OpCode::Text | OpCode::Binary => start_message(conn, fin, opcode, payload, effects),
        OpCode::Continue => continue_message(conn, fin, payload, effects),
        OpCode::Ping => reply_pong(conn, payload, effects),
        OpCode::Pong => Ok(()),
        OpCode::Close => handle_close(conn, payload, effects),
    }
}

fn start_message(
    conn: &mut Connection,
    fin: bool,
    opcode: OpCode,
    payload: Vec<u8>,
    effects: &mut Vec<Effect>,
) -> Result<(), Error> {
    if conn.partial.is_some() {
        return Err(Error::MessageAlreadyInProgress);
    }

    let data_type = match opcode {
        OpCode::Text => DataType::Text,
        OpCode::Binary => DataType::Binary,
        _ => unreachable!(),
    };

    if payload.len() > conn.config.max_message_size {
        return Err(Error::MessageTooLarge(conn.config.max_message_size));
    }

    let mut validator = Utf8Validator::new();
    if data_type == DataType::Text {
        check_utf8(&mut validator, &payload, fin)?;
    }

    let mut partial = PartialMessage {
        data_type,
        payload,
        first_received: true,
        complete: fin,
        validator,
    };

    if fin {
        deliver(&mut partial, conn, effects)?;
    } else {
        conn.partial = Some(partial);
    }

    Ok(())
}

fn continue_message(
    conn: &mut Connection,
    fin: bool,
    payload: Vec<u8>,
    effects: &mut Vec<Effect>,
) -> Result<(), Error> {
    let mut partial = conn.partial.take().ok_or(Error::UnexpectedContinuation)?;

    if partial.payload.len() + payload.len() > conn.config.max_message_size {
        return Err(Error::MessageTooLarge(conn.config.max_message_size));
    }

    if partial.data_type == DataType::Text {
        check_utf8(&mut partial.validator, &payload, fin)?;
    }

    partial.payload.extend_from_slice(&payload);
    partial.complete = fin;

    if fin {
        deliver(&mut partial, conn, effects)?;
    } else {
        conn.partial = Some(partial);
    }

    Ok(())
}

fn check_utf8(validator: &mut Utf8Validator, chunk: &[u8], fin: bool) -> Result<(), Error> {
    match validator.feed(chunk) {
        Utf8Status::Fail => Err(Error::InvalidUtf8),
        Utf8Status::Busy if fin => Err(Error::InvalidUtf8),
        Utf8Status::Ok | Utf8Status::Busy => Ok(()),
    }
}

fn deliver(partial: &mut PartialMessage, conn: &mut Connection, effects: &mut Vec<Effect>) -> Result<(), Error> {
    let message = match partial.data_type {
        DataType::Text => Message::Text(String::from_utf8(std::mem::take(&mut partial.payload))?),
        DataType::Binary => Message::Binary(std::mem::take(&mut partial.payload)),
    };
    conn.partial = None;
    conn.message_deadline = None;
    effects.push(Effect::Message(message));
    Ok(())
}

fn reply_pong(conn: &mut Connection, payload: Vec<u8>, effects: &mut Vec<Effect>) -> Result<(), Error> {
    let mask = if conn.role == Role::Client { Some(random_mask()) } else { None };
    let mut buf = payload;
    let mut out = Vec::new();
    crate::frame::encode(&mut out, true, OpCode::Pong, mask, &mut buf);
    effects.push(Effect::Write(out));
    Ok(())
}

fn handle_close(conn: &mut Connection, payload: Vec<u8>, effects: &mut Vec<Effect>) -> Result<(), Error> {
    match payload.len() {
        0 => {
            conn.close_with(effects, CloseCode::NORMAL, &[]);
            Ok(())
        }
        1 => Err(Error::InvalidCloseLength(1)),
        _ => {
            let mut code_bytes = [0u8; 2];
            code_bytes.copy_from_slice(&payload[..2]);
            let code = u16::from_be_bytes(code_bytes);
            let close_code = CloseCode::try_from(code)?;

            let trailer = &payload[2..];
            if std::str::from_utf8(trailer).is_err() {
                return Err(Error::InvalidUtf8);
            }

            conn.close_with(effects, close_code, trailer);
            Ok(())
        }
    }
}

fn random_mask() -> [u8; 4] {
    use rand::RngCore;
    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);
    mask
}
