//! Kadcast/Mincast datagram protocol.
//!
//! Datagram envelope: `[type:u8][body]`, no length prefix — each message is
//! one self-contained packet bounded by [`PACKET_SIZE`].

use crate::error::DecodeError;

/// Target UDP packet size in bytes, matching the original's MTU budget for
/// a chunk datagram plus IPv4/UDP headroom.
pub const PACKET_SIZE: usize = 1433;

/// Per-chunk payload budget once the `CHUNK` header (30 bytes) is
/// subtracted from [`PACKET_SIZE`].
pub const CHUNK_PAYLOAD_SIZE: usize = PACKET_SIZE - CHUNK_HEADER_SIZE;
// type byte + sender,block_id,chunk_id,prev_id,block_size,n_chunks,height
const CHUNK_HEADER_SIZE: usize = 1 + 8 + 8 + 2 + 8 + 4 + 2 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeContact {
    pub node_id: u64,
    pub addr: [u8; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KadMessage {
    Ping { sender: u64 },
    Pong { sender: u64 },
    FindNode { sender: u64, target: u64 },
    Nodes { sender: u64, target: u64, contacts: Vec<NodeContact> },
    Chunk {
        sender: u64,
        block_id: u64,
        chunk_id: u16,
        prev_id: u64,
        block_size: u32,
        n_chunks: u16,
        height: u16,
    },
    Request { sender: u64, block_id: u64 },
    Inform { sender: u64, block_id: u64 },
}

const TYPE_PING: u8 = 0;
const TYPE_PONG: u8 = 1;
const TYPE_FINDNODE: u8 = 2;
const TYPE_NODES: u8 = 3;
const TYPE_CHUNK: u8 = 4;
const TYPE_REQUEST: u8 = 5;
const TYPE_INFORM: u8 = 6;

impl KadMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PACKET_SIZE);
        match self {
            KadMessage::Ping { sender } => {
                out.push(TYPE_PING);
                out.extend_from_slice(&sender.to_be_bytes());
            }
            KadMessage::Pong { sender } => {
                out.push(TYPE_PONG);
                out.extend_from_slice(&sender.to_be_bytes());
            }
            KadMessage::FindNode { sender, target } => {
                out.push(TYPE_FINDNODE);
                out.extend_from_slice(&sender.to_be_bytes());
                out.extend_from_slice(&target.to_be_bytes());
            }
            KadMessage::Nodes { sender, target, contacts } => {
                out.push(TYPE_NODES);
                out.extend_from_slice(&sender.to_be_bytes());
                out.extend_from_slice(&target.to_be_bytes());
                out.extend_from_slice(&(contacts.len() as u16).to_be_bytes());
                for c in contacts {
                    out.extend_from_slice(&c.node_id.to_be_bytes());
                    out.extend_from_slice(&c.addr);
                }
            }
            KadMessage::Chunk { sender, block_id, chunk_id, prev_id, block_size, n_chunks, height } => {
                out.push(TYPE_CHUNK);
                out.extend_from_slice(&sender.to_be_bytes());
                out.extend_from_slice(&block_id.to_be_bytes());
                out.extend_from_slice(&chunk_id.to_be_bytes());
                out.extend_from_slice(&prev_id.to_be_bytes());
                out.extend_from_slice(&block_size.to_be_bytes());
                out.extend_from_slice(&n_chunks.to_be_bytes());
                out.extend_from_slice(&height.to_be_bytes());
            }
            KadMessage::Request { sender, block_id } => {
                out.push(TYPE_REQUEST);
                out.extend_from_slice(&sender.to_be_bytes());
                out.extend_from_slice(&block_id.to_be_bytes());
            }
            KadMessage::Inform { sender, block_id } => {
                out.push(TYPE_INFORM);
                out.extend_from_slice(&sender.to_be_bytes());
                out.extend_from_slice(&block_id.to_be_bytes());
            }
        }
        out
    }

    /// Wire size this message would occupy — used to size `CHUNK`s against
    /// [`CHUNK_PAYLOAD_SIZE`] and for overhead-ratio accounting.
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }

    pub fn decode(bytes: &[u8]) -> Result<KadMessage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Truncated { need: 1, have: 0 });
        }
        let ty = bytes[0];
        let body = &bytes[1..];
        let need_u64 = |b: &[u8], off: usize| -> Result<u64, DecodeError> {
            b.get(off..off + 8)
                .map(|s| u64::from_be_bytes(s.try_into().unwrap()))
                .ok_or(DecodeError::Truncated { need: off + 8, have: b.len() })
        };
        match ty {
            TYPE_PING => Ok(KadMessage::Ping { sender: need_u64(body, 0)? }),
            TYPE_PONG => Ok(KadMessage::Pong { sender: need_u64(body, 0)? }),
            TYPE_FINDNODE => Ok(KadMessage::FindNode {
                sender: need_u64(body, 0)?,
                target: need_u64(body, 8)?,
            }),
            TYPE_NODES => {
                let sender = need_u64(body, 0)?;
                let target = need_u64(body, 8)?;
                if body.len() < 18 {
                    return Err(DecodeError::Truncated { need: 18, have: body.len() });
                }
                let count = u16::from_be_bytes(body[16..18].try_into().unwrap()) as usize;
                let need = 18 + count * 12;
                if body.len() != need {
                    return Err(DecodeError::LengthMismatch { declared: need as u32, actual: body.len() });
                }
                let mut contacts = Vec::with_capacity(count);
                for i in 0..count {
                    let off = 18 + i * 12;
                    let node_id = u64::from_be_bytes(body[off..off + 8].try_into().unwrap());
                    let addr = [body[off + 8], body[off + 9], body[off + 10], body[off + 11]];
                    contacts.push(NodeContact { node_id, addr });
                }
                Ok(KadMessage::Nodes { sender, target, contacts })
            }
            TYPE_CHUNK => {
                if body.len() != 8 + 8 + 2 + 8 + 4 + 2 + 2 {
                    return Err(DecodeError::LengthMismatch {
                        declared: (8 + 8 + 2 + 8 + 4 + 2 + 2) as u32,
                        actual: body.len(),
                    });
                }
                let sender = need_u64(body, 0)?;
                let block_id = need_u64(body, 8)?;
                let chunk_id = u16::from_be_bytes(body[16..18].try_into().unwrap());
                let prev_id = need_u64(body, 18)?;
                let block_size = u32::from_be_bytes(body[26..30].try_into().unwrap());
                let n_chunks = u16::from_be_bytes(body[30..32].try_into().unwrap());
                let height = u16::from_be_bytes(body[32..34].try_into().unwrap());
                Ok(KadMessage::Chunk { sender, block_id, chunk_id, prev_id, block_size, n_chunks, height })
            }
            TYPE_REQUEST => Ok(KadMessage::Request {
                sender: need_u64(body, 0)?,
                block_id: need_u64(body, 8)?,
            }),
            TYPE_INFORM => Ok(KadMessage::Inform {
                sender: need_u64(body, 0)?,
                block_id: need_u64(body, 8)?,
            }),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

/// XOR distance between two node ids, the metric k-buckets partition on.
pub fn xor_distance(a: u64, b: u64) -> u64 {
    a ^ b
}

/// Index of the k-bucket holding a contact at `distance` (i.e. `i` such
/// that `distance ∈ [2^i, 2^(i+1))`), or `None` for distance 0 (self).
pub fn bucket_index(distance: u64) -> Option<u32> {
    if distance == 0 {
        None
    } else {
        Some(63 - distance.leading_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(m: KadMessage) {
        let bytes = m.encode();
        assert_eq!(KadMessage::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn round_trips_every_variant() {
        round_trip(KadMessage::Ping { sender: 1 });
        round_trip(KadMessage::Pong { sender: 2 });
        round_trip(KadMessage::FindNode { sender: 3, target: 4 });
        round_trip(KadMessage::Nodes {
            sender: 5,
            target: 6,
            contacts: vec![NodeContact { node_id: 7, addr: [10, 0, 0, 1] }],
        });
        round_trip(KadMessage::Chunk {
            sender: 1,
            block_id: 2,
            chunk_id: 3,
            prev_id: 4,
            block_size: 500,
            n_chunks: 10,
            height: 6,
        });
        round_trip(KadMessage::Request { sender: 1, block_id: 2 });
        round_trip(KadMessage::Inform { sender: 1, block_id: 2 });
    }

    #[test]
    fn bucket_index_matches_distance_shell() {
        assert_eq!(bucket_index(0), None);
        assert_eq!(bucket_index(1), Some(0));
        assert_eq!(bucket_index(2), Some(1));
        assert_eq!(bucket_index(3), Some(1));
        assert_eq!(bucket_index(4), Some(2));
        assert_eq!(bucket_index(u64::MAX), Some(63));
    }

    #[test]
    fn chunk_message_fits_packet_budget() {
        let m = KadMessage::Chunk {
            sender: 1,
            block_id: 2,
            chunk_id: 3,
            prev_id: 4,
            block_size: 500,
            n_chunks: 10,
            height: 6,
        };
        assert!(m.encoded_len() + CHUNK_PAYLOAD_SIZE <= PACKET_SIZE);
    }
}
