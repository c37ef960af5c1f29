//! Vanilla (gossip) wire protocol: frame envelope and message encode/decode.
//!
//! Frame: `[length:u32][type:u8][body]`, big-endian, where `length` covers
//! `type` plus `body`.

use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Inv(Vec<u64>),
    GetHeaders { start_id: u64, stop_id: u64 },
    Headers(Vec<u64>),
    GetData(Vec<u64>),
    GetBlocks { start_id: u64, stop_id: u64 },
    Block { block_id: u64, prev_id: u64, payload: Vec<u8> },
}

const TYPE_INV: u8 = 0;
const TYPE_GETHEADERS: u8 = 1;
const TYPE_HEADERS: u8 = 2;
const TYPE_GETDATA: u8 = 3;
const TYPE_GETBLOCKS: u8 = 4;
const TYPE_BLOCK: u8 = 5;

fn encode_id_list(ids: &[u64]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + ids.len() * 8);
    body.extend_from_slice(&(ids.len() as u32).to_be_bytes());
    for id in ids {
        body.extend_from_slice(&id.to_be_bytes());
    }
    body
}

fn decode_id_list(body: &[u8]) -> Result<Vec<u64>, DecodeError> {
    if body.len() < 4 {
        return Err(DecodeError::Truncated { need: 4, have: body.len() });
    }
    let count = u32::from_be_bytes(body[0..4].try_into().unwrap()) as usize;
    let need = 4 + count * 8;
    if body.len() != need {
        return Err(DecodeError::LengthMismatch { declared: need as u32, actual: body.len() });
    }
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let off = 4 + i * 8;
        ids.push(u64::from_be_bytes(body[off..off + 8].try_into().unwrap()));
    }
    Ok(ids)
}

impl Message {
    /// Encode the full frame, including the leading `length:u32`.
    pub fn encode_frame(&self) -> Vec<u8> {
        let (ty, body) = self.encode_body();
        let mut frame = Vec::with_capacity(5 + body.len());
        let length = (1 + body.len()) as u32;
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(ty);
        frame.extend_from_slice(&body);
        frame
    }

    fn encode_body(&self) -> (u8, Vec<u8>) {
        match self {
            Message::Inv(ids) => (TYPE_INV, encode_id_list(ids)),
            Message::GetHeaders { start_id, stop_id } => {
                let mut b = Vec::with_capacity(16);
                b.extend_from_slice(&start_id.to_be_bytes());
                b.extend_from_slice(&stop_id.to_be_bytes());
                (TYPE_GETHEADERS, b)
            }
            Message::Headers(ids) => (TYPE_HEADERS, encode_id_list(ids)),
            Message::GetData(ids) => (TYPE_GETDATA, encode_id_list(ids)),
            Message::GetBlocks { start_id, stop_id } => {
                let mut b = Vec::with_capacity(16);
                b.extend_from_slice(&start_id.to_be_bytes());
                b.extend_from_slice(&stop_id.to_be_bytes());
                (TYPE_GETBLOCKS, b)
            }
            Message::Block { block_id, prev_id, payload } => {
                let mut b = Vec::with_capacity(16 + payload.len());
                b.extend_from_slice(&block_id.to_be_bytes());
                b.extend_from_slice(&prev_id.to_be_bytes());
                b.extend_from_slice(payload);
                (TYPE_BLOCK, b)
            }
        }
    }

    /// Byte length of the frame this message would encode to, without
    /// allocating — used by the send pipeline to size the transmit window.
    pub fn encoded_len(&self) -> usize {
        4 + match self {
            Message::Inv(ids) | Message::Headers(ids) | Message::GetData(ids) => 1 + 4 + ids.len() * 8,
            Message::GetHeaders { .. } | Message::GetBlocks { .. } => 1 + 16,
            Message::Block { payload, .. } => 1 + 16 + payload.len(),
        }
    }

    /// Decode a single frame's `type+body` slice (the caller has already
    /// split on the `length` prefix via [`FrameReassembler`]).
    pub fn decode_body(ty: u8, body: &[u8]) -> Result<Message, DecodeError> {
        match ty {
            TYPE_INV => Ok(Message::Inv(decode_id_list(body)?)),
            TYPE_GETHEADERS | TYPE_GETBLOCKS => {
                if body.len() != 16 {
                    return Err(DecodeError::LengthMismatch { declared: 16, actual: body.len() });
                }
                let start_id = u64::from_be_bytes(body[0..8].try_into().unwrap());
                let stop_id = u64::from_be_bytes(body[8..16].try_into().unwrap());
                Ok(if ty == TYPE_GETHEADERS {
                    Message::GetHeaders { start_id, stop_id }
                } else {
                    Message::GetBlocks { start_id, stop_id }
                })
            }
            TYPE_HEADERS => Ok(Message::Headers(decode_id_list(body)?)),
            TYPE_GETDATA => Ok(Message::GetData(decode_id_list(body)?)),
            TYPE_BLOCK => {
                if body.len() < 16 {
                    return Err(DecodeError::Truncated { need: 16, have: body.len() });
                }
                let block_id = u64::from_be_bytes(body[0..8].try_into().unwrap());
                let prev_id = u64::from_be_bytes(body[8..16].try_into().unwrap());
                Ok(Message::Block { block_id, prev_id, payload: body[16..].to_vec() })
            }
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

/// Accumulates inbound bytes for one peer and yields complete frames as
/// they become available, receive pipeline.
#[derive(Default)]
pub struct FrameReassembler {
    buf: Vec<u8>,
}

impl FrameReassembler {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if the buffer holds one. Returns
    /// `Ok(None)` when more bytes are needed, `Err` on a malformed frame
    /// (the caller logs and drops , then should keep draining).
    pub fn pop_message(&mut self) -> Result<Option<Message>, DecodeError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
        if self.buf.len() < 4 + length {
            return Ok(None);
        }
        if length == 0 {
            return Err(DecodeError::Truncated { need: 1, have: 0 });
        }
        let ty = self.buf[4];
        let body = self.buf[5..4 + length].to_vec();
        self.buf.drain(0..4 + length);
        Ok(Some(Message::decode_body(ty, &body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(m: Message) {
        let frame = m.encode_frame();
        let mut r = FrameReassembler::default();
        r.push(&frame);
        let decoded = r.pop_message().unwrap().unwrap();
        assert_eq!(decoded, m);
        assert!(r.pop_message().unwrap().is_none());
    }

    #[test]
    fn round_trips_every_variant() {
        round_trip(Message::Inv(vec![1, 2, 3]));
        round_trip(Message::GetHeaders { start_id: 0, stop_id: 42 });
        round_trip(Message::Headers(vec![]));
        round_trip(Message::GetData(vec![7]));
        round_trip(Message::GetBlocks { start_id: 1, stop_id: 2 });
        round_trip(Message::Block { block_id: 9, prev_id: 8, payload: vec![0xab; 37] });
    }

    #[test]
    fn reassembler_handles_split_writes() {
        let frame = Message::Inv(vec![1, 2]).encode_frame();
        let mut r = FrameReassembler::default();
        r.push(&frame[0..3]);
        assert!(r.pop_message().unwrap().is_none());
        r.push(&frame[3..]);
        assert_eq!(r.pop_message().unwrap(), Some(Message::Inv(vec![1, 2])));
    }

    #[test]
    fn reassembler_handles_two_frames_in_one_write() {
        let mut frame = Message::Inv(vec![1]).encode_frame();
        frame.extend(Message::Inv(vec![2]).encode_frame());
        let mut r = FrameReassembler::default();
        r.push(&frame);
        assert_eq!(r.pop_message().unwrap(), Some(Message::Inv(vec![1])));
        assert_eq!(r.pop_message().unwrap(), Some(Message::Inv(vec![2])));
        assert_eq!(r.pop_message().unwrap(), None);
    }

    #[test]
    fn unknown_type_byte_is_reported() {
        let err = Message::decode_body(0xee, &[]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType(0xee));
    }
}
