//! Kadcast propagation engine: Kademlia-structured recursive broadcast.

use crate::block::Block;
use crate::kad_message::{KadMessage, NodeContact, CHUNK_PAYLOAD_SIZE};
use crate::peer::{KadState, ProtocolState};
use crate::routing::{LookupState, ID_LEN};
use crate::scheduler::Scheduler;
use crate::simulation::{notify_new_block, send_kad, validation_delay, Simulation};
use crate::topology::PeerId;

const BOOTSTRAP_PING_MEAN: f64 = 10.0;
const BOOTSTRAP_PING_VAR: f64 = 5.0;
const SELF_LOOKUP_MEAN: f64 = 30.0;
const SELF_LOOKUP_VAR: f64 = 10.0;
const BUCKET_REFRESH_MEAN: f64 = 100.0;
const BUCKET_REFRESH_VAR: f64 = 30.0;
const RECOVERY_RETRY_MEAN: f64 = 5.0;
const RECOVERY_RETRY_STDDEV: f64 = 3.0;
const SEND_DRAIN_MEAN_SECS: f64 = 0.1;
const SEND_DRAIN_VAR_SECS2: f64 = 25e-6; // sigma = 5ms

pub(crate) fn kad_mut(sim: &mut Simulation, peer_id: PeerId) -> &mut KadState {
    match &mut sim.peers[peer_id].protocol {
        ProtocolState::Kadcast(k) => k,
        ProtocolState::Mincast(m) => &mut m.kad,
        ProtocolState::Vanilla(_) => unreachable!("kadcast handler invoked on vanilla peer"),
    }
}

fn self_contact(sim: &Simulation, peer_id: PeerId) -> NodeContact {
    NodeContact { node_id: sim.peers[peer_id].node_id, addr: local_addr(peer_id) }
}

pub(crate) fn local_addr(peer_id: PeerId) -> [u8; 4] {
    let b = (peer_id as u32).to_be_bytes();
    [10, b[1], b[2], b[3]]
}

/// Send a datagram after the per-peer queue-drain jitter. Models the
/// periodic send-queue drain timer (`Normal(100ms, 25)`) as a
/// one-shot delay per message rather than a literal shared queue object —
/// equivalent for the non-contending case this simulator models.
pub(crate) fn queue_send(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, from: PeerId, to: PeerId, msg: KadMessage) {
    let jitter = sim.rng.normal_duration_nonneg(SEND_DRAIN_MEAN_SECS, SEND_DRAIN_VAR_SECS2);
    scheduler.schedule(jitter, move |sim, scheduler| {
        send_kad(sim, scheduler, from, to, msg);
    });
}

pub fn start_all(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>) {
    let ids: Vec<PeerId> = sim
        .peers
        .iter()
        .filter(|p| matches!(p.protocol, ProtocolState::Kadcast(_) | ProtocolState::Mincast(_)))
        .map(|p| p.id)
        .collect();
    for id in ids {
        bootstrap(sim, scheduler, id);
    }
}

pub(crate) fn bootstrap(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId) {
    let n_bootstrap = sim.config.n_bootstrap as usize;
    let known = sim.peers[peer_id].known_addresses.clone();
    let picks = sim.rng.choose_unique(&known, n_bootstrap.min(known.len())).into_iter().copied().collect::<Vec<_>>();
    for addr in picks {
        let delay = sim.rng.normal_duration_nonneg(BOOTSTRAP_PING_MEAN, BOOTSTRAP_PING_VAR);
        scheduler.schedule(delay, move |sim, scheduler| {
            let sender = self_contact(sim, peer_id);
            queue_send(sim, scheduler, peer_id, addr, KadMessage::Ping { sender: sender.node_id });
        });
    }

    let self_lookup_delay = sim.rng.normal_duration_nonneg(SELF_LOOKUP_MEAN, SELF_LOOKUP_VAR);
    let self_target = sim.peers[peer_id].node_id;
    scheduler.schedule(self_lookup_delay, move |sim, scheduler| {
        start_lookup(sim, scheduler, peer_id, self_target);
    });

    schedule_bucket_refresh(sim, scheduler, peer_id);
}

fn schedule_bucket_refresh(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId) {
    let delay = sim.rng.normal_duration_nonneg(BUCKET_REFRESH_MEAN, BUCKET_REFRESH_VAR);
    let handle = scheduler.schedule(delay, move |sim, scheduler| {
        let target = sim.rng.uniform_u64();
        start_lookup(sim, scheduler, peer_id, target);
        schedule_bucket_refresh(sim, scheduler, peer_id);
    });
    kad_mut(sim, peer_id).bucket_refresh = Some(handle);
}

fn start_lookup(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, target: u64) {
    let now = scheduler.now();
    let k = kad_mut(sim, peer_id).routing.k();
    let alpha = sim.config.kad_alpha as usize;
    let mut lookup = LookupState::new(target, k, alpha, now);
    let seed_contacts = kad_mut(sim, peer_id).routing.closest_to(target, k);
    lookup.seed(seed_contacts);
    kad_mut(sim, peer_id).pending_lookup = Some(lookup);
    lookup_step(sim, scheduler, peer_id);
}

fn lookup_step(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId) {
    let now = scheduler.now();
    let Some(lookup) = kad_mut(sim, peer_id).pending_lookup.as_mut() else { return };
    if lookup.is_converged() || now >= lookup.deadline {
        kad_mut(sim, peer_id).pending_lookup = None;
        return;
    }
    let target = lookup.target;
    let mut batch = lookup.next_to_query();
    if batch.is_empty() {
        batch = lookup.all_unqueried();
    }
    if batch.is_empty() {
        kad_mut(sim, peer_id).pending_lookup = None;
        return;
    }
    for contact in batch {
        if let Some(to) = find_peer_by_node_id(sim, contact.node_id) {
            queue_send(sim, scheduler, peer_id, to, KadMessage::FindNode { sender: sim.peers[peer_id].node_id, target });
        }
    }
}

pub(crate) fn find_peer_by_node_id(sim: &Simulation, node_id: u64) -> Option<PeerId> {
    sim.peers.iter().find(|p| p.node_id == node_id).map(|p| p.id)
}

pub fn handle_incoming(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, from: PeerId, msg: KadMessage) {
    match msg {
        KadMessage::Ping { sender } => {
            kad_mut(sim, peer_id).routing.observe(NodeContact { node_id: sender, addr: local_addr(from) });
            let self_id = sim.peers[peer_id].node_id;
            queue_send(sim, scheduler, peer_id, from, KadMessage::Pong { sender: self_id });
        }
        KadMessage::Pong { sender } => {
            kad_mut(sim, peer_id).routing.observe(NodeContact { node_id: sender, addr: local_addr(from) });
        }
        KadMessage::FindNode { sender, target } => {
            kad_mut(sim, peer_id).routing.observe(NodeContact { node_id: sender, addr: local_addr(from) });
            let k = kad_mut(sim, peer_id).routing.k();
            let contacts = kad_mut(sim, peer_id).routing.closest_to(target, k);
            let self_id = sim.peers[peer_id].node_id;
            queue_send(sim, scheduler, peer_id, from, KadMessage::Nodes { sender: self_id, target, contacts });
        }
        KadMessage::Nodes { sender, contacts, .. } => {
            kad_mut(sim, peer_id).routing.observe(NodeContact { node_id: sender, addr: local_addr(from) });
            for c in &contacts {
                kad_mut(sim, peer_id).routing.observe(*c);
            }
            if let Some(lookup) = kad_mut(sim, peer_id).pending_lookup.as_mut() {
                lookup.seed(contacts);
            }
            lookup_step(sim, scheduler, peer_id);
        }
        KadMessage::Chunk { sender, block_id, chunk_id, prev_id, block_size, n_chunks, height } => {
            on_chunk(sim, scheduler, peer_id, from, sender, block_id, chunk_id, prev_id, block_size, n_chunks, height);
        }
        KadMessage::Request { block_id, .. } => {
            on_request(sim, scheduler, peer_id, from, block_id);
        }
        KadMessage::Inform { .. } => unreachable!("plain Kadcast peers never receive INFORM"),
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn on_chunk(
    sim: &mut Simulation,
    scheduler: &mut Scheduler<Simulation>,
    peer_id: PeerId,
    from: PeerId,
    sender: u64,
    block_id: u64,
    chunk_id: u16,
    prev_id: u64,
    block_size: u32,
    n_chunks: u16,
    height: u16,
) {
    if block_id == 0 {
        return;
    }
    kad_mut(sim, peer_id).routing.observe(NodeContact { node_id: sender, addr: local_addr(from) });

    let now = scheduler.now();
    sim.peers[peer_id].record_ttfb(block_id, now);

    let already_has_prev = prev_id == 0 || sim.peers[peer_id].blockchain.contains(prev_id);
    let prev_done = kad_mut(sim, peer_id).done_blocks.contains(&prev_id);
    if !already_has_prev && !prev_done && !kad_mut(sim, peer_id).recovering.contains_key(&prev_id) {
        start_recovery(sim, scheduler, peer_id, from, prev_id);
    }

    let kstate = kad_mut(sim, peer_id);
    if kstate.done_blocks.contains(&block_id) {
        return;
    }
    if !kstate.seen_chunks.insert((block_id, chunk_id)) {
        return; // duplicate chunk
    }
    let seen_height = kstate.max_seen_height.entry(block_id).or_insert(0);
    *seen_height = (*seen_height).max(height);
    let count = kstate.chunk_counts.entry(block_id).or_insert(0);
    *count += 1;
    let complete = *count as u16 >= n_chunks;

    if complete {
        kad_mut(sim, peer_id).done_blocks.insert(block_id);
        kad_mut(sim, peer_id).chunk_counts.remove(&block_id);
        kad_mut(sim, peer_id).seen_chunks.retain(|(b, _)| *b != block_id);
        if let Some(handle) = kad_mut(sim, peer_id).recovering.remove(&block_id) {
            scheduler.cancel(handle);
        }
        // TTLB is the wire-arrival time of the last chunk, stamped here —
        // not after the validation delay scheduled below, which models
        // local processing time and is not part of "time to last byte".
        sim.peers[peer_id].record_ttlb(block_id, now);
        tracing::debug!(peer_id, block_id, virtual_time_ms = now.as_millis_f64(), "block chunks complete");
        let block = Block::new(block_id, prev_id, block_size);
        let delay = validation_delay(block_size);
        scheduler.schedule(delay, move |sim, scheduler| {
            notify_new_block(sim, scheduler, peer_id, block, false);
        });
    }
}

pub(crate) fn start_recovery(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, from: PeerId, missing_id: u64) {
    tracing::debug!(peer_id, missing_id, "starting block recovery");
    let self_id = sim.peers[peer_id].node_id;
    queue_send(sim, scheduler, peer_id, from, KadMessage::Request { sender: self_id, block_id: missing_id });
    schedule_recovery_retry(sim, scheduler, peer_id, from, missing_id);
}

fn schedule_recovery_retry(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, from: PeerId, missing_id: u64) {
    let var = RECOVERY_RETRY_STDDEV * RECOVERY_RETRY_STDDEV;
    let delay = sim.rng.normal_duration_nonneg(RECOVERY_RETRY_MEAN, var);
    let handle = scheduler.schedule(delay, move |sim, scheduler| {
        let acquired = sim.peers[peer_id].blockchain.contains(missing_id)
            || kad_mut(sim, peer_id).done_blocks.contains(&missing_id);
        if acquired {
            kad_mut(sim, peer_id).recovering.remove(&missing_id);
            return;
        }
        let self_id = sim.peers[peer_id].node_id;
        queue_send(sim, scheduler, peer_id, from, KadMessage::Request { sender: self_id, block_id: missing_id });
        schedule_recovery_retry(sim, scheduler, peer_id, from, missing_id);
    });
    kad_mut(sim, peer_id).recovering.insert(missing_id, handle);
}

pub(crate) fn on_request(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, from: PeerId, block_id: u64) {
    if let Some(block) = sim.peers[peer_id].blockchain.get(block_id).cloned() {
        send_chunks(sim, scheduler, peer_id, from, &block, 0);
    }
}

/// Broadcast root entry point: mark done,
/// seed `max_seen_height` at the full ID space, and recurse into the tree.
pub fn init_broadcast(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, block_id: u64) {
    kad_mut(sim, peer_id).done_blocks.insert(block_id);
    // Only seed the origin height if chunk reception hasn't already recorded
    // one: a freshly-mined block has no prior entry and starts the tree at
    // the root (ID_LEN); a forwarded block keeps the height captured when
    // its chunks arrived, which is what makes the recursive descent actually
    // descend instead of every relay re-broadcasting as if it were the root.
    kad_mut(sim, peer_id).max_seen_height.entry(block_id).or_insert(ID_LEN as u16);
    broadcast_block(sim, scheduler, peer_id, block_id);
}

/// Recursive descent: forward the block into every non-empty bucket below
/// the height captured when it arrived (or `ID_LEN` at the origin),
/// selecting up to `β` random recipients per bucket.
fn broadcast_block(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, block_id: u64) {
    let Some(h) = kad_mut(sim, peer_id).max_seen_height.remove(&block_id) else { return };
    let Some(block) = sim.peers[peer_id].blockchain.get(block_id).cloned() else { return };
    let beta = sim.config.kad_beta as usize;

    for i in (0..h as u32).rev() {
        let bucket_contacts: Vec<NodeContact> = kad_mut(sim, peer_id).routing.bucket(i).to_vec();
        if bucket_contacts.is_empty() {
            continue;
        }
        let picks = sim.rng.choose_unique(&bucket_contacts, beta.min(bucket_contacts.len()));
        let picks: Vec<NodeContact> = picks.into_iter().copied().collect();
        for contact in picks {
            if let Some(to) = find_peer_by_node_id(sim, contact.node_id) {
                send_chunks(sim, scheduler, peer_id, to, &block, i as u16);
            }
        }
    }
}

/// Fragment `block` into MTU-bounded chunks plus decorative FEC overhead
/// chunks, and enqueue them (and any FEC padding) in random order, all
/// tagged with `height`.
pub(crate) fn send_chunks(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, from: PeerId, to: PeerId, block: &Block, height: u16) {
    let n_data_chunks = block.block_size.div_ceil(CHUNK_PAYLOAD_SIZE as u32).max(1);
    let fec_overhead = sim.config.kad_fec_overhead;
    let n_fec = (n_data_chunks as f64 * fec_overhead).round() as u32;
    let n_chunks = n_data_chunks + n_fec;

    let mut order: Vec<u16> = (0..n_chunks as u16).collect();
    sim.rng.shuffle(&mut order);

    let sender = sim.peers[from].node_id;
    for chunk_id in order {
        let msg = KadMessage::Chunk {
            sender,
            block_id: block.block_id,
            chunk_id,
            prev_id: block.prev_id,
            block_size: block.block_size,
            n_chunks: n_chunks as u16,
            height,
        };
        queue_send(sim, scheduler, from, to, msg);
    }
}

