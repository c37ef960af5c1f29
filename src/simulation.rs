//! Simulation context: owns every peer, the network fabric, the shared RNG
//! stream, and run-wide counters.

use std::time::Duration;

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::{NetProtocol, Params};
use crate::kad_message::KadMessage;
use crate::kadcast;
use crate::message::Message;
use crate::miner::{sample_block_size, Miner};
use crate::mincast;
use crate::peer::{KadState, MincastState, Peer, ProtocolState, VanillaState};
use crate::rng::RngService;
use crate::scheduler::Scheduler;
use crate::topology::{PeerId, Topology};
use crate::vanilla;

pub const GENESIS_ID: u64 = 0;

pub struct Simulation {
    pub peers: Vec<Peer>,
    pub topology: Topology,
    pub rng: RngService,
    pub config: Params,
    pub total_bytes_on_wire: u64,
    pub total_mined_blocks: u64,
    pub next_block_event_guard: u64,
}

impl Simulation {
    pub fn new(config: Params) -> Self {
        let mut rng = RngService::new(config.seed);
        let topology = match config.topo {
            crate::config::Topo::Star => {
                Topology::star(config.star_leaf_data_rate, config.star_hub_data_rate)
            }
            crate::config::Topo::Geo => Topology::geo(config.n_peers as usize, &mut rng),
        };

        let n_byzantine = ((config.n_peers as f64) * config.byzantine_factor).round() as usize;
        let mut byzantine_flags = vec![false; config.n_peers as usize];
        for &idx in rng.choose_unique(&(0..config.n_peers as usize).collect::<Vec<_>>(), n_byzantine) {
            byzantine_flags[idx] = true;
        }

        let mut peers = Vec::with_capacity(config.n_peers as usize);
        for id in 0..config.n_peers as usize {
            let node_id = rng.uniform_u64();
            let protocol = match config.net {
                NetProtocol::Vanilla => ProtocolState::Vanilla(VanillaState::default()),
                NetProtocol::Kadcast => {
                    ProtocolState::Kadcast(KadState::new(node_id, config.kad_k as usize))
                }
                NetProtocol::Mincast => {
                    ProtocolState::Mincast(MincastState::new(node_id, config.kad_k as usize))
                }
            };
            peers.push(Peer::new(id, node_id, byzantine_flags[id], protocol));
        }

        // Every peer knows every other peer's address. The topologies model
        // link bandwidth/latency, not address discovery; the DHT protocols
        // still have to route through buckets even though the "address
        // book" itself is fully known up front (matches the source's static
        // bootstrap list of all other node addresses).
        let all_ids: Vec<PeerId> = (0..peers.len()).collect();
        for p in &mut peers {
            p.known_addresses = all_ids.iter().copied().filter(|&a| a != p.id).collect();
        }

        let n_miners = config.n_miners as usize;
        let miner_ids = rng.choose_unique(&all_ids, n_miners).into_iter().copied().collect::<Vec<_>>();
        for (i, peer_id) in miner_ids.iter().enumerate() {
            let pool = i % config.num_pools.max(1) as usize;
            let hash_rate = crate::config::pool_hash_rate_share(pool, config.num_pools) * n_miners as f64;
            peers[*peer_id].miner = Some(Miner::new(
                hash_rate,
                config.difficulty,
                config.block_interval_factor,
                config.block_size_factor,
            ));
        }

        Simulation {
            peers,
            topology,
            rng,
            config,
            total_bytes_on_wire: 0,
            total_mined_blocks: 0,
            next_block_event_guard: 0,
        }
    }

    pub fn n_peers(&self) -> usize {
        self.peers.len()
    }

    /// Reached when `n_blocks_target` is nonzero and every currently-mined
    /// block count has met it; the caller stops the scheduler.
    pub fn block_target_reached(&self) -> bool {
        self.config.n_blocks > 0 && self.total_mined_blocks >= self.config.n_blocks as u64
    }
}

/// Start mining on every peer configured with a [`Miner`]; called once at
/// t=0 to seed the run.
pub fn start_all_miners(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>) {
    let miner_ids: Vec<PeerId> = sim
        .peers
        .iter()
        .filter(|p| p.is_miner())
        .map(|p| p.id)
        .collect();
    for id in miner_ids {
        start_mining(sim, scheduler, id);
    }
}

pub fn start_mining(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId) {
    let prev = sim.peers[peer_id].blockchain.top_id();
    let delay = {
        let miner = sim.peers[peer_id].miner.as_mut().expect("start_mining on non-miner");
        miner.stop_mining(scheduler);
        miner.set_mining();
        miner.draw_interval(&mut sim.rng)
    };
    let handle = scheduler.schedule(delay, move |sim, scheduler| {
        mine_block(sim, scheduler, peer_id, prev);
    });
    sim.peers[peer_id].miner.as_mut().unwrap().set_event(handle);
}

pub fn stop_mining(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId) {
    if let Some(miner) = sim.peers[peer_id].miner.as_mut() {
        miner.stop_mining(scheduler);
    }
}

fn mine_block(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, prev: u64) {
    let still_mining = sim.peers[peer_id]
        .miner
        .as_ref()
        .map(|m| m.is_mining())
        .unwrap_or(false);
    if !still_mining {
        return; // cancellation race: stop_mining fired before this event did
    }
    let block_id = sim.rng.uniform_u64();
    let size = sample_block_size(&mut sim.rng, sim.config.block_size_factor, sim.config.block_interval_factor);
    sim.peers[peer_id].miner.as_mut().unwrap().clear_event();

    let now = scheduler.now();
    sim.total_mined_blocks += 1;
    sim.peers[peer_id].stats.mining_time.insert(block_id, now);

    tracing::debug!(peer_id, block_id, virtual_time_ms = now.as_millis_f64(), size, "block mined");
    let block = Block::new(block_id, prev, size);
    notify_new_block(sim, scheduler, peer_id, block, true);

    if !sim.block_target_reached() {
        let new_prev = sim.peers[peer_id].blockchain.top_id();
        let delay = {
            let miner = sim.peers[peer_id].miner.as_mut().unwrap();
            miner.set_mining();
            miner.draw_interval(&mut sim.rng)
        };
        let handle = scheduler.schedule(delay, move |sim, scheduler| {
            mine_block(sim, scheduler, peer_id, new_prev);
        });
        sim.peers[peer_id].miner.as_mut().unwrap().set_event(handle);
    } else {
        // Broadcast the last mined block before halting further mining —
        // the source's bounded-blocks variant could race StopMining ahead
        // of the final block's own broadcast depending on callback order;
        // here `notify_new_block` above has already run to completion, so
        // the final broadcast is guaranteed to have started before we stop.
        stop_mining(sim, scheduler, peer_id);
        if sim.block_target_reached() {
            scheduler.stop();
        }
    }
}

/// A block arrived at `peer_id`, either freshly mined or received over the
/// wire. Runs `Blockchain::add_block` and fires `new_valid_block` for every
/// id whose height newly resolved, in resolution order.
pub fn notify_new_block(
    sim: &mut Simulation,
    scheduler: &mut Scheduler<Simulation>,
    peer_id: PeerId,
    block: Block,
    mined: bool,
) {
    let _ = mined;
    let (_, resolved) = sim.peers[peer_id].blockchain.add_block(block);
    for id in resolved {
        new_valid_block(sim, scheduler, peer_id, id);
    }
}

fn new_valid_block(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, block_id: u64) {
    if sim.peers[peer_id].byzantine {
        return; // accepts the block, never rebroadcasts
    }
    match &sim.peers[peer_id].protocol {
        ProtocolState::Vanilla(_) => vanilla::init_broadcast(sim, scheduler, peer_id, block_id),
        ProtocolState::Kadcast(_) => kadcast::init_broadcast(sim, scheduler, peer_id, block_id),
        ProtocolState::Mincast(_) => mincast::init_broadcast(sim, scheduler, peer_id, block_id),
    }
}

/// Validation delay: linear in block size.
pub fn validation_delay(block_size: u32) -> Duration {
    const VALIDATE_BYTES_PER_SEC: f64 = 200_000_000.0;
    Duration::from_secs_f64(block_size as f64 / VALIDATE_BYTES_PER_SEC)
}

/// Send framed bytes over the vanilla stream link `from -> to`, serialized
/// behind any prior send still occupying that link. Byte accounting happens at delivery,
/// matching the fabric's role as the on-wire counter of record.
pub fn send_vanilla(
    sim: &mut Simulation,
    scheduler: &mut Scheduler<Simulation>,
    from: PeerId,
    to: PeerId,
    msg: Message,
) {
    let bytes = msg.encode_frame();
    let delay = sim.topology.transmit_delay(from, to, bytes.len());
    let now = scheduler.now();
    let start = {
        let vs = vanilla_state_mut(sim, from);
        let busy = vs.busy_until.get(&to).copied().unwrap_or(now).max(now);
        vs.busy_until.insert(to, busy + delay);
        busy
    };
    let deliver_at = start + delay;
    scheduler.schedule_at(deliver_at, move |sim, scheduler| {
        sim.total_bytes_on_wire += bytes.len() as u64;
        vanilla::on_bytes_received(sim, scheduler, to, from, bytes);
    });
}

fn vanilla_state_mut(sim: &mut Simulation, peer_id: PeerId) -> &mut VanillaState {
    match &mut sim.peers[peer_id].protocol {
        ProtocolState::Vanilla(v) => v,
        _ => unreachable!("vanilla_state_mut called on non-vanilla peer"),
    }
}

/// Send one DHT datagram `from -> to`. Datagrams have no
/// queueing discipline in the source beyond the periodic send-queue drain
/// timer, which is modeled inside the kadcast/mincast engines themselves;
/// the fabric here only contributes transmit delay and byte accounting.
pub fn send_kad(
    sim: &mut Simulation,
    scheduler: &mut Scheduler<Simulation>,
    from: PeerId,
    to: PeerId,
    msg: KadMessage,
) {
    let bytes = msg.encode();
    let delay = sim.topology.transmit_delay(from, to, bytes.len());
    let len = bytes.len() as u64;
    scheduler.schedule(delay, move |sim, scheduler| {
        sim.total_bytes_on_wire += len;
        let decoded = match KadMessage::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(to, from, error = %e, "dropping malformed datagram");
                return;
            }
        };
        match &sim.peers[to].protocol {
            ProtocolState::Kadcast(_) => kadcast::handle_incoming(sim, scheduler, to, from, decoded),
            ProtocolState::Mincast(_) => mincast::handle_incoming(sim, scheduler, to, from, decoded),
            ProtocolState::Vanilla(_) => unreachable!("send_kad targeted a vanilla peer"),
        }
    });
}

pub fn blockchain_of(sim: &Simulation, peer_id: PeerId) -> &Blockchain {
    &sim.peers[peer_id].blockchain
}
