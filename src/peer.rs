//! Common per-peer state and the tagged protocol sum (`ProtocolState::Vanilla`,
//! `Kadcast`, `Mincast`) sharing a base peer struct.

use std::collections::{HashMap, HashSet};

use crate::blockchain::Blockchain;
use crate::message::FrameReassembler;
use crate::miner::Miner;
use crate::routing::RoutingTable;
use crate::scheduler::EventHandle;
use crate::time::VirtualTime;
use crate::topology::PeerId;

/// Outbound/inbound connection caps for the vanilla gossip mesh.
pub const VANILLA_OUT_CAP: usize = 8;
pub const VANILLA_IN_CAP: usize = 117;

#[derive(Default)]
pub struct VanillaState {
    pub in_peers: HashSet<PeerId>,
    pub out_peers: HashSet<PeerId>,
    /// Per-neighbor "already knows this block" marks, so `init_broadcast`
    /// and relay handlers never resend to a peer known to hold the block.
    pub peer_knows: HashMap<PeerId, HashSet<u64>>,
    pub requested_blocks: HashSet<u64>,
    /// Per-neighbor link-free timestamp: the FIFO send queue collapses to
    /// this single watermark because every send is modeled as occupying
    /// the link for its full bandwidth-limited transmit time with no
    /// partial sends, so queued messages simply serialize behind it.
    pub busy_until: HashMap<PeerId, VirtualTime>,
    pub reassemblers: HashMap<PeerId, FrameReassembler>,
    pub outbound_loop: Option<EventHandle>,
}

impl VanillaState {
    pub fn peer_count(&self) -> usize {
        self.in_peers.len() + self.out_peers.len()
    }
}

pub struct KadState {
    pub routing: RoutingTable,
    pub done_blocks: HashSet<u64>,
    pub seen_chunks: HashSet<(u64, u16)>,
    pub chunk_counts: HashMap<u64, usize>,
    pub max_seen_height: HashMap<u64, u16>,
    pub recovering: HashMap<u64, EventHandle>,
    pub bucket_refresh: Option<EventHandle>,
    pub pending_lookup: Option<crate::routing::LookupState>,
}

impl KadState {
    pub fn new(self_node_id: u64, k: usize) -> Self {
        KadState {
            routing: RoutingTable::new(self_node_id, k),
            done_blocks: HashSet::new(),
            seen_chunks: HashSet::new(),
            chunk_counts: HashMap::new(),
            max_seen_height: HashMap::new(),
            recovering: HashMap::new(),
            bucket_refresh: None,
            pending_lookup: None,
        }
    }
}

pub struct MincastState {
    pub kad: KadState,
    /// block_id -> event handle for the retry loop re-requesting from the
    /// informing peer until the block is acquired.
    pub inform_retry: HashMap<u64, EventHandle>,
}

impl MincastState {
    pub fn new(self_node_id: u64, k: usize) -> Self {
        MincastState {
            kad: KadState::new(self_node_id, k),
            inform_retry: HashMap::new(),
        }
    }
}

pub enum ProtocolState {
    Vanilla(VanillaState),
    Kadcast(KadState),
    Mincast(MincastState),
}

#[derive(Default)]
pub struct PeerStats {
    /// Populated only on peers holding a miner: block_id -> time mined.
    pub mining_time: HashMap<u64, VirtualTime>,
    pub ttfb: HashMap<u64, VirtualTime>,
    pub ttlb: HashMap<u64, VirtualTime>,
}

pub struct Peer {
    pub id: PeerId,
    pub node_id: u64,
    pub blockchain: Blockchain,
    pub byzantine: bool,
    pub miner: Option<Miner>,
    pub protocol: ProtocolState,
    pub stats: PeerStats,
    pub known_addresses: Vec<PeerId>,
}

impl Peer {
    pub fn new(id: PeerId, node_id: u64, byzantine: bool, protocol: ProtocolState) -> Self {
        Peer {
            id,
            node_id,
            blockchain: Blockchain::new(0),
            byzantine,
            miner: None,
            protocol,
            stats: PeerStats::default(),
            known_addresses: Vec::new(),
        }
    }

    pub fn is_miner(&self) -> bool {
        self.miner.is_some()
    }

    pub fn record_ttfb(&mut self, block_id: u64, when: VirtualTime) {
        self.stats.ttfb.entry(block_id).or_insert(when);
    }

    pub fn record_ttlb(&mut self, block_id: u64, when: VirtualTime) {
        self.stats.ttlb.entry(block_id).or_insert(when);
    }
}
