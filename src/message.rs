//! Application-level message type.

use crate::frame::{Frame, OpCode};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Splits the message into one or more frames, each no larger than
    /// `max_frame_size`, with FIN set only on the last.
    pub fn to_frames(self, max_frame_size: usize) -> Vec<Frame> {
        let opcode = self.opcode();
        let payload = self.into_bytes();

        if payload.is_empty() {
            return vec![Frame::new(true, opcode, payload)];
        }

        let mut frames = Vec::new();
        for chunk in payload.chunks(max_frame_size.max(1)) {
            let op = if frames.is_empty() { opcode } else { OpCode::Continue };
            frames.push(Frame::new(false, op, chunk.to_vec()));
        }

        if let Some(last) = frames.last_mut() {
            last.fin = true;
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_for_small_message() {
        let frames = Message::Text("hi".into()).to_frames(1024);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Text);
    }

    #[test]
    fn splits_across_continuation_frames() {
        let frames = Message::Binary(vec![0u8; 10]).to_frames(4);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert_eq!(frames[1].opcode, OpCode::Continue);
        assert_eq!(frames[2].opcode, OpCode::Continue);
        assert!(!frames[0].fin);
        assert!(!frames[1].fin);
        assert!(frames[2].fin);
    }
}
