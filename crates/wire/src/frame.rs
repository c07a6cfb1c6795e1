use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Frames above this size are treated as a framing fault rather than parsed.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcpMessageKind {
    Text = 1,
    FileRequest = 2,
    FileChunk = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpMessage {
    pub protocol_version: u32,
    pub kind: TcpMessageKind,
    pub sequence: u64,
    pub payload: Vec<u8>,
    pub timestamp: i64,
}

impl TcpMessage {
    pub fn new(kind: TcpMessageKind, sequence: u64, payload: Vec<u8>, timestamp: i64) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            kind,
            sequence,
            payload,
            timestamp,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(CodecError::EncodeFailed)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        bincode::serde::decode_from_slice(buf, bincode::config::standard())
            .map(|(msg, _)| msg)
            .map_err(CodecError::MalformedPayload)
    }
}

/// Decode-and-discard; returns whether `buf` is a well-formed length-framed payload.
pub fn is_valid_frame(buf: &[u8]) -> bool {
    TcpMessage::decode(buf).is_ok()
}

/// `[length: u32 big-endian][payload bytes]`. A zero length is a heartbeat.
pub fn encode_length_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn heartbeat_frame() -> [u8; 4] {
    0u32.to_be_bytes()
}

/// One fully-parsed unit off the TCP byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Heartbeat,
    Payload(Vec<u8>),
}

/// Accumulates bytes off the wire and extracts complete length-prefixed frames
/// in order. Mirrors the read side of the framing rule in isolation from any
/// socket I/O, so the connection task only has to feed it bytes.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-read bytes and drain every frame that is now complete.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>, CodecError> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes(self.buf[..4].try_into().unwrap());
            if len > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(len));
            }
            let total = 4 + len as usize;
            if self.buf.len() < total {
                break;
            }
            self.buf.advance(4);
            if len == 0 {
                frames.push(Frame::Heartbeat);
            } else {
                let payload = self.buf.split_to(len as usize).to_vec();
                frames.push(Frame::Payload(payload));
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TcpMessage {
        TcpMessage::new(TcpMessageKind::Text, 7, b"hello".to_vec(), 100)
    }

    #[test]
    fn round_trip() {
        let msg = sample();
        let bytes = msg.encode().unwrap();
        assert_eq!(TcpMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn zero_length_is_heartbeat_never_delivered() {
        let mut asm = FrameAssembler::new();
        let frames = asm.feed(&heartbeat_frame()).unwrap();
        assert_eq!(frames, vec![Frame::Heartbeat]);
    }

    #[test]
    fn arbitrary_split_yields_one_frame() {
        let msg = sample();
        let payload = msg.encode().unwrap();
        let framed = encode_length_frame(&payload);

        let mut asm = FrameAssembler::new();
        let (a, b) = framed.split_at(3);
        let (b, c) = b.split_at(framed.len() / 2 - 3);

        let mut out = asm.feed(a).unwrap();
        out.extend(asm.feed(b).unwrap());
        out.extend(asm.feed(c).unwrap());

        assert_eq!(out.len(), 1);
        match &out[0] {
            Frame::Payload(bytes) => assert_eq!(TcpMessage::decode(bytes).unwrap(), msg),
            Frame::Heartbeat => panic!("expected payload frame"),
        }
    }

    #[test]
    fn oversized_length_is_framing_fault() {
        let mut asm = FrameAssembler::new();
        let bad = (MAX_FRAME_SIZE + 1).to_be_bytes();
        assert!(matches!(asm.feed(&bad), Err(CodecError::FrameTooLarge(_))));
    }
}
