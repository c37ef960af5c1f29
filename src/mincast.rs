//! Mincast propagation engine: Kadcast with the last per-bucket recipient
//! replaced by a lightweight `INFORM` hint instead of a full chunk stream.

use crate::kad_message::{KadMessage, NodeContact};
use crate::kadcast::{self, kad_mut, local_addr};
use crate::peer::ProtocolState;
use crate::routing::ID_LEN;
use crate::scheduler::Scheduler;
use crate::simulation::Simulation;
use crate::topology::PeerId;

const INFORM_RETRY_MEAN: f64 = 3.0;
const INFORM_RETRY_STDDEV: f64 = 1.0;

fn mincast_mut(sim: &mut Simulation, peer_id: PeerId) -> &mut crate::peer::MincastState {
    match &mut sim.peers[peer_id].protocol {
        ProtocolState::Mincast(m) => m,
        _ => unreachable!("mincast handler invoked on non-mincast peer"),
    }
}

pub fn start_all(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>) {
    let ids: Vec<PeerId> = sim
        .peers
        .iter()
        .filter(|p| matches!(p.protocol, ProtocolState::Mincast(_)))
        .map(|p| p.id)
        .collect();
    for id in ids {
        kadcast::bootstrap(sim, scheduler, id);
    }
}

pub fn handle_incoming(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, from: PeerId, msg: KadMessage) {
    match msg {
        KadMessage::Inform { sender, block_id } => on_inform(sim, scheduler, peer_id, from, sender, block_id),
        KadMessage::Chunk { sender, block_id, chunk_id, prev_id, block_size, n_chunks, height } => {
            suppress_inform_retry(sim, scheduler, peer_id, block_id);
            kadcast::on_chunk(sim, scheduler, peer_id, from, sender, block_id, chunk_id, prev_id, block_size, n_chunks, height);
        }
        KadMessage::Request { block_id, .. } => kadcast::on_request(sim, scheduler, peer_id, from, block_id),
        other => kadcast::handle_incoming(sim, scheduler, peer_id, from, other),
    }
}

fn on_inform(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, from: PeerId, sender: u64, block_id: u64) {
    kad_mut(sim, peer_id).routing.observe(NodeContact { node_id: sender, addr: local_addr(from) });

    let have_it = sim.peers[peer_id].blockchain.contains(block_id) || kad_mut(sim, peer_id).done_blocks.contains(&block_id);
    if have_it {
        return;
    }
    let already_downloading = mincast_mut(sim, peer_id).inform_retry.contains_key(&block_id);
    if already_downloading {
        return;
    }
    request_from_informer(sim, scheduler, peer_id, from, block_id);
}

fn request_from_informer(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, informer: PeerId, block_id: u64) {
    let self_id = sim.peers[peer_id].node_id;
    kadcast::queue_send(sim, scheduler, peer_id, informer, KadMessage::Request { sender: self_id, block_id });

    let var = INFORM_RETRY_STDDEV * INFORM_RETRY_STDDEV;
    let delay = sim.rng.normal_duration_nonneg(INFORM_RETRY_MEAN, var);
    let handle = scheduler.schedule(delay, move |sim, scheduler| {
        let have_it = sim.peers[peer_id].blockchain.contains(block_id) || kad_mut(sim, peer_id).done_blocks.contains(&block_id);
        if have_it {
            mincast_mut(sim, peer_id).inform_retry.remove(&block_id);
            return;
        }
        request_from_informer(sim, scheduler, peer_id, informer, block_id);
    });
    mincast_mut(sim, peer_id).inform_retry.insert(block_id, handle);
}

/// Any chunk arriving for `block_id` (from any source) suppresses a
/// pending INFORM-driven request loop, 
fn suppress_inform_retry(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, block_id: u64) {
    if let Some(handle) = mincast_mut(sim, peer_id).inform_retry.remove(&block_id) {
        scheduler.cancel(handle);
    }
}

pub fn init_broadcast(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, block_id: u64) {
    kad_mut(sim, peer_id).done_blocks.insert(block_id);
    // See kadcast::init_broadcast: only seed the root height when chunk
    // reception hasn't already recorded one, so forwarding descends the
    // tree instead of restarting every relay at the root.
    kad_mut(sim, peer_id).max_seen_height.entry(block_id).or_insert(ID_LEN as u16);
    broadcast_block(sim, scheduler, peer_id, block_id);
}

/// Same recursive descent as Kadcast, except within each bucket's selected
/// `β` recipients the last one gets only an `INFORM`, not the chunk stream.
fn broadcast_block(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, block_id: u64) {
    let Some(h) = kad_mut(sim, peer_id).max_seen_height.remove(&block_id) else { return };
    let Some(block) = sim.peers[peer_id].blockchain.get(block_id).cloned() else { return };
    let beta = sim.config.kad_beta as usize;

    for i in (0..h as u32).rev() {
        let bucket_contacts: Vec<NodeContact> = kad_mut(sim, peer_id).routing.bucket(i).to_vec();
        if bucket_contacts.is_empty() {
            continue;
        }
        let n = beta.min(bucket_contacts.len());
        let picks: Vec<NodeContact> = sim.rng.choose_unique(&bucket_contacts, n).into_iter().copied().collect();
        if picks.is_empty() {
            continue;
        }
        let (chunked, informed) = picks.split_at(picks.len() - 1);
        for contact in chunked {
            if let Some(to) = find_peer(sim, contact.node_id) {
                kadcast::send_chunks(sim, scheduler, peer_id, to, &block, i as u16);
            }
        }
        for contact in informed {
            if let Some(to) = find_peer(sim, contact.node_id) {
                let self_id = sim.peers[peer_id].node_id;
                kadcast::queue_send(sim, scheduler, peer_id, to, KadMessage::Inform { sender: self_id, block_id });
            }
        }
    }
}

fn find_peer(sim: &Simulation, node_id: u64) -> Option<PeerId> {
    sim.peers.iter().find(|p| p.node_id == node_id).map(|p| p.id)
}
