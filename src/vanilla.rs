//! Vanilla (Bitcoin-style) gossip propagation engine.

use std::time::Duration;

use crate::block::Block;
use crate::message::Message;
use crate::peer::{ProtocolState, VanillaState, VANILLA_IN_CAP, VANILLA_OUT_CAP};
use crate::scheduler::Scheduler;
use crate::simulation::{notify_new_block, send_vanilla, validation_delay, Simulation};
use crate::topology::PeerId;

const OUTBOUND_LOOP_PERIOD: Duration = Duration::from_millis(100);

fn vanilla_mut(sim: &mut Simulation, peer_id: PeerId) -> &mut VanillaState {
    match &mut sim.peers[peer_id].protocol {
        ProtocolState::Vanilla(v) => v,
        _ => unreachable!("vanilla handler invoked on non-vanilla peer"),
    }
}

/// Kick off the outbound-connection loop for every vanilla peer. Called
/// once at t=0.
pub fn start_all(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>) {
    let ids: Vec<PeerId> = sim
        .peers
        .iter()
        .filter(|p| matches!(p.protocol, ProtocolState::Vanilla(_)))
        .map(|p| p.id)
        .collect();
    for id in ids {
        outbound_tick(sim, scheduler, id);
    }
}

fn outbound_tick(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId) {
    {
        let vs = vanilla_mut(sim, peer_id);
        if vs.out_peers.len() < VANILLA_OUT_CAP {
            let candidates = sim.peers[peer_id].known_addresses.clone();
            if !candidates.is_empty() {
                let pick = candidates[sim.rng.uniform_int(0, candidates.len() as u64) as usize];
                try_connect(sim, peer_id, pick);
            }
        }
    }
    let handle = scheduler.schedule(OUTBOUND_LOOP_PERIOD, move |sim, scheduler| {
        outbound_tick(sim, scheduler, peer_id);
    });
    vanilla_mut(sim, peer_id).outbound_loop = Some(handle);
}

/// Attempt a connection `from -> to`. Accept policy: refuse if
/// self, duplicate, or the acceptor's IN cap is reached.
fn try_connect(sim: &mut Simulation, from: PeerId, to: PeerId) {
    if from == to {
        return;
    }
    if vanilla_mut(sim, from).out_peers.contains(&to) {
        return;
    }
    let to_in_cap_ok = vanilla_mut(sim, to).in_peers.len() < VANILLA_IN_CAP;
    if !to_in_cap_ok {
        return;
    }
    vanilla_mut(sim, from).out_peers.insert(to);
    vanilla_mut(sim, to).in_peers.insert(from);
}

fn marks_knows(vs: &mut VanillaState, peer: PeerId, block_id: u64) -> bool {
    let set = vs.peer_knows.entry(peer).or_default();
    !set.insert(block_id) // returns true if it was already known
}

pub fn init_broadcast(sim: &mut Simulation, scheduler: &mut Scheduler<Simulation>, peer_id: PeerId, block_id: u64) {
    let neighbors: Vec<PeerId> = {
        let vs = vanilla_mut(sim, peer_id);
        vs.in_peers.iter().chain(vs.out_peers.iter()).copied().collect()
    };
    let block = sim.peers[peer_id].blockchain.get(block_id).cloned();
    let Some(block) = block else { return };
    let unsolicited = sim.config.unsolicited;

    for to in neighbors {
        let already_known = marks_knows(vanilla_mut(sim, peer_id), to, block_id);
        if already_known {
            continue;
        }
        let msg = if unsolicited {
            Message::Block {
                block_id: block.block_id,
                prev_id: block.prev_id,
                payload: vec![0u8; block.block_size as usize],
            }
        } else {
            Message::Headers(vec![block_id])
        };
        send_vanilla(sim, scheduler, peer_id, to, msg);
    }
}

pub fn on_bytes_received(
    sim: &mut Simulation,
    scheduler: &mut Scheduler<Simulation>,
    peer_id: PeerId,
    from: PeerId,
    bytes: Vec<u8>,
) {
    let messages = {
        let vs = vanilla_mut(sim, peer_id);
        let reassembler = vs.reassemblers.entry(from).or_default();
        reassembler.push(&bytes);
        let mut out = Vec::new();
        loop {
            match reassembler.pop_message() {
                Ok(Some(m)) => out.push(m),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer_id, from, error = %e, "dropping malformed frame");
                    break;
                }
            }
        }
        out
    };
    for msg in messages {
        handle_message(sim, scheduler, peer_id, from, msg);
    }
}

fn ancestor_chain(sim: &Simulation, peer_id: PeerId, start: u64, stop: u64) -> Vec<u64> {
    let bc = &sim.peers[peer_id].blockchain;
    let mut chain = Vec::new();
    let mut cur = stop;
    let mut guard = 0u32;
    loop {
        if cur == start || guard > 1_000_000 {
            break;
        }
        chain.push(cur);
        let Some(block) = bc.get(cur) else { break };
        if block.prev_id == cur {
            break;
        }
        cur = block.prev_id;
        guard += 1;
    }
    chain.reverse();
    chain
}

fn handle_message(
    sim: &mut Simulation,
    scheduler: &mut Scheduler<Simulation>,
    peer_id: PeerId,
    from: PeerId,
    msg: Message,
) {
    match msg {
        Message::Inv(ids) => on_announce(sim, scheduler, peer_id, from, ids, true),
        Message::Headers(ids) => on_announce(sim, scheduler, peer_id, from, ids, false),
        Message::GetHeaders { start_id, stop_id } => {
            let bc = &sim.peers[peer_id].blockchain;
            let start = if bc.contains(start_id) { start_id } else { 0 };
            let stop = if bc.contains(stop_id) { stop_id } else { bc.top_id() };
            let chain = ancestor_chain(sim, peer_id, start, stop);
            send_vanilla(sim, scheduler, peer_id, from, Message::Headers(chain));
        }
        Message::GetBlocks { start_id, stop_id } => {
            let bc = &sim.peers[peer_id].blockchain;
            let start = if bc.contains(start_id) { start_id } else { 0 };
            let stop = if bc.contains(stop_id) { stop_id } else { bc.top_id() };
            let chain = ancestor_chain(sim, peer_id, start, stop);
            send_vanilla(sim, scheduler, peer_id, from, Message::Inv(chain));
        }
        Message::GetData(ids) => {
            for id in ids {
                if let Some(block) = sim.peers[peer_id].blockchain.get(id).cloned() {
                    marks_knows(vanilla_mut(sim, peer_id), from, id);
                    send_vanilla(
                        sim,
                        scheduler,
                        peer_id,
                        from,
                        Message::Block {
                            block_id: block.block_id,
                            prev_id: block.prev_id,
                            payload: vec![0u8; block.block_size as usize],
                        },
                    );
                }
            }
        }
        Message::Block { block_id, prev_id, payload } => {
            // A BLOCK frame carries the whole block in one shot (no partial
            // chunks in the vanilla protocol), so TTFB and TTLB are the same
            // wire-arrival timestamp — stamped here, before the validation
            // delay scheduled below, which models local processing and is
            // not part of either "time to byte" metric.
            let now = scheduler.now();
            sim.peers[peer_id].record_ttfb(block_id, now);
            sim.peers[peer_id].record_ttlb(block_id, now);
            vanilla_mut(sim, peer_id).requested_blocks.remove(&block_id);
            marks_knows(vanilla_mut(sim, peer_id), from, block_id);
            let size = payload.len() as u32;
            let block = Block::new(block_id, prev_id, size);
            let delay = validation_delay(size);
            scheduler.schedule(delay, move |sim, scheduler| {
                notify_new_block(sim, scheduler, peer_id, block, false);
            });
        }
    }
}

fn on_announce(
    sim: &mut Simulation,
    scheduler: &mut Scheduler<Simulation>,
    peer_id: PeerId,
    from: PeerId,
    ids: Vec<u64>,
    via_inv: bool,
) {
    let mut wanted: Vec<u64> = Vec::new();
    for id in ids {
        marks_knows(vanilla_mut(sim, peer_id), from, id);
        let already_have = sim.peers[peer_id].blockchain.contains(id);
        let already_requested = vanilla_mut(sim, peer_id).requested_blocks.contains(&id);
        if !already_have && !already_requested {
            wanted.push(id);
        }
    }
    if wanted.is_empty() {
        return;
    }
    wanted.sort_unstable();
    if via_inv {
        let start = *wanted.first().unwrap();
        let stop = *wanted.last().unwrap();
        send_vanilla(sim, scheduler, peer_id, from, Message::GetHeaders { start_id: start, stop_id: stop });
    }
    for id in &wanted {
        vanilla_mut(sim, peer_id).requested_blocks.insert(*id);
    }
    send_vanilla(sim, scheduler, peer_id, from, Message::GetData(wanted));
}
