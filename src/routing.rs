//! Kademlia-style routing table shared by the Kadcast and Mincast engines.
//!
//! Node ids are 64-bit, so there are `ID_LEN` possible bucket shells.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::kad_message::{bucket_index, NodeContact};
use crate::scheduler::EventHandle;
use crate::time::VirtualTime;

pub const ID_LEN: u32 = 64;

/// Iterative α-parallel node-lookup converging to the `k` closest known
/// peers to `target`.
pub struct LookupState {
    pub target: u64,
    /// distance-from-target -> (contact, already queried)
    pub candidates: BTreeMap<u64, (NodeContact, bool)>,
    pub k: usize,
    pub alpha: usize,
    pub deadline: VirtualTime,
    pub retry_handle: Option<EventHandle>,
}

/// Bootstrap/lookup timeout: give up on an unconverged lookup after this long.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

impl LookupState {
    pub fn new(target: u64, k: usize, alpha: usize, now: VirtualTime) -> Self {
        LookupState {
            target,
            candidates: BTreeMap::new(),
            k,
            alpha,
            deadline: now + LOOKUP_TIMEOUT,
            retry_handle: None,
        }
    }

    pub fn seed(&mut self, contacts: impl IntoIterator<Item = NodeContact>) {
        for c in contacts {
            let d = c.node_id ^ self.target;
            self.candidates.entry(d).or_insert((c, false));
        }
        self.trim();
    }

    fn trim(&mut self) {
        while self.candidates.len() > self.k {
            let last_key = *self.candidates.keys().next_back().unwrap();
            self.candidates.remove(&last_key);
        }
    }

    /// Up to `alpha` closest unqueried candidates, marking them queried.
    pub fn next_to_query(&mut self) -> Vec<NodeContact> {
        let mut picked = Vec::new();
        for (_, (contact, queried)) in self.candidates.iter_mut() {
            if picked.len() >= self.alpha {
                break;
            }
            if !*queried {
                *queried = true;
                picked.push(*contact);
            }
        }
        picked
    }

    /// All remaining unqueried candidates, used as a fallback when a round
    /// makes no progress ("if no progress... fall back to querying
    /// all remaining unqueried").
    pub fn all_unqueried(&mut self) -> Vec<NodeContact> {
        let mut picked = Vec::new();
        for (_, (contact, queried)) in self.candidates.iter_mut() {
            if !*queried {
                *queried = true;
                picked.push(*contact);
            }
        }
        picked
    }

    pub fn queried_count(&self) -> usize {
        self.candidates.values().filter(|(_, q)| *q).count()
    }

    pub fn is_converged(&self) -> bool {
        self.queried_count() >= self.k
    }
}

/// One k-bucket: an LRU list bounded to `k` entries. Hits move their entry
/// to the tail; overflow evicts the head (the least-recently-seen
/// contact), not the new arrival — this favors long-lived nodes, matching
/// standard Kademlia bucket eviction policy.
#[derive(Default, Clone)]
struct Bucket {
    contacts: Vec<NodeContact>,
}

impl Bucket {
    fn touch(&mut self, contact: NodeContact, k: usize) {
        if let Some(pos) = self.contacts.iter().position(|c| c.node_id == contact.node_id) {
            self.contacts.remove(pos);
            self.contacts.push(contact);
            return;
        }
        if self.contacts.len() >= k {
            self.contacts.remove(0);
        }
        self.contacts.push(contact);
    }
}

pub struct RoutingTable {
    self_id: u64,
    k: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(self_id: u64, k: usize) -> Self {
        RoutingTable {
            self_id,
            k,
            buckets: vec![Bucket::default(); ID_LEN as usize],
        }
    }

    pub fn self_id(&self) -> u64 {
        self.self_id
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Record a sighting of `contact`, placing/refreshing it in the bucket
    /// for its XOR-distance shell from `self_id`. A contact equal to
    /// `self_id` is ignored.
    pub fn observe(&mut self, contact: NodeContact) {
        if contact.node_id == self.self_id {
            return;
        }
        let distance = self.self_id ^ contact.node_id;
        if let Some(i) = bucket_index(distance) {
            self.buckets[i as usize].touch(contact, self.k);
        }
    }

    pub fn bucket(&self, i: u32) -> &[NodeContact] {
        &self.buckets[i as usize].contacts
    }

    pub fn is_bucket_empty(&self, i: u32) -> bool {
        self.buckets[i as usize].contacts.is_empty()
    }

    /// All known contacts, closest-bucket first, for bootstrap-time
    /// broadcast-tree traversal and lookup seeding.
    pub fn all_contacts(&self) -> Vec<NodeContact> {
        self.buckets.iter().flat_map(|b| b.contacts.iter().copied()).collect()
    }

    /// The `limit` known contacts closest to `target` by XOR distance.
    pub fn closest_to(&self, target: u64, limit: usize) -> Vec<NodeContact> {
        let mut all = self.all_contacts();
        all.sort_by_key(|c| c.node_id ^ target);
        all.truncate(limit);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: u64) -> NodeContact {
        NodeContact { node_id: id, addr: [127, 0, 0, 1] }
    }

    #[test]
    fn observe_places_contact_in_correct_shell() {
        let mut rt = RoutingTable::new(0, 4);
        rt.observe(contact(1)); // distance 1 -> bucket 0
        rt.observe(contact(2)); // distance 2 -> bucket 1
        assert_eq!(rt.bucket(0).len(), 1);
        assert_eq!(rt.bucket(1).len(), 1);
    }

    #[test]
    fn self_id_is_never_added() {
        let mut rt = RoutingTable::new(42, 4);
        rt.observe(contact(42));
        assert!(rt.all_contacts().is_empty());
    }

    #[test]
    fn bucket_overflow_evicts_oldest() {
        let mut rt = RoutingTable::new(0, 2);
        // All of 1,2,3 land in bucket 1 (distance in [2,4)): ids 2 and 3.
        rt.observe(contact(2));
        rt.observe(contact(3));
        rt.observe(contact(1)); // distance 1 -> bucket 0, different shell
        assert_eq!(rt.bucket(1).len(), 2);
        assert_eq!(rt.bucket(0).len(), 1);
    }

    #[test]
    fn touch_on_known_contact_moves_to_tail_without_growing() {
        let mut rt = RoutingTable::new(0, 4);
        rt.observe(contact(5));
        rt.observe(contact(5));
        assert_eq!(rt.bucket(bucket_for(0, 5)).len(), 1);
    }

    fn bucket_for(self_id: u64, other: u64) -> u32 {
        bucket_index(self_id ^ other).unwrap()
    }

    #[test]
    fn closest_to_sorts_by_xor_distance() {
        let mut rt = RoutingTable::new(0, 20);
        rt.observe(contact(0b1000));
        rt.observe(contact(0b0001));
        rt.observe(contact(0b0010));
        let closest = rt.closest_to(0b0011, 2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].node_id, 0b0010); // distance 1
        assert_eq!(closest[1].node_id, 0b0001); // distance 2
    }
}
