//! XOR-distance routing table: a binary tree of k-buckets rather than the
//! teacher's flat 256-bucket array, since a flat array cannot express the
//! tree-split/`noSplit` invariant this protocol needs. Nodes live in an
//! arena and are addressed by `NodeIndex` so the tree never needs parent
//! pointers or `Rc`/`RefCell`.

use std::net::IpAddr;
use std::time::Instant;

use ethereum_types::H512;

/// Bucket size, the Kademlia "K" parameter.
const K: usize = 16;
/// Bound on the waiting-candidate queue kept behind a full, unsplittable bucket.
const REPLACEMENT_CAP: usize = K;
/// `H512` is 64 bytes wide, so the tree has at most this many levels.
const ID_BITS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: H512,
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub vector_clock: u32,
}

#[derive(Debug, Clone, Copy)]
struct NodeIndex(usize);

enum Node {
    Inner { zero: NodeIndex, one: NodeIndex },
    Leaf(KBucket),
}

#[derive(Default)]
struct KBucket {
    contacts: Vec<(PeerRecord, Instant)>,
    replacements: Vec<PeerRecord>,
    no_split: bool,
}

impl KBucket {
    fn find(&self, id: H512) -> Option<usize> {
        self.contacts.iter().position(|(peer, _)| peer.id == id)
    }
}

/// What the caller must do in response to an `add`.
#[derive(Debug)]
pub enum AddOutcome {
    /// The candidate is now in the table.
    Added,
    /// An existing entry for the same id was refreshed (or left alone, per
    /// the arbiter rule: the contact with the larger `vectorClock` wins).
    Updated,
    /// The candidate's bucket is full and unsplittable. The caller should
    /// ping `ping_candidates` and call `resolve_full` once liveness is known;
    /// until then the candidate sits in the bucket's replacement queue.
    Full { ping_candidates: Vec<PeerRecord> },
}

pub struct RoutingTable {
    local_id: H512,
    arena: Vec<Node>,
}

fn bit_at(id: &H512, index: usize) -> bool {
    let byte = id.as_bytes()[index / 8];
    (byte >> (7 - (index % 8))) & 1 == 1
}

fn xor_distance(a: &H512, b: &H512) -> [u8; 64] {
    let mut out = [0u8; 64];
    for (o, (x, y)) in out.iter_mut().zip(a.as_bytes().iter().zip(b.as_bytes().iter())) {
        *o = x ^ y;
    }
    out
}

impl RoutingTable {
    pub fn new(local_id: H512) -> Self {
        Self {
            local_id,
            arena: vec![Node::Leaf(KBucket::default())],
        }
    }

    pub fn local_id(&self) -> H512 {
        self.local_id
    }

    pub fn count(&self) -> usize {
        self.arena
            .iter()
            .map(|node| match node {
                Node::Leaf(bucket) => bucket.contacts.len(),
                Node::Inner { .. } => 0,
            })
            .sum()
    }

    /// Inserts or refreshes a contact. See `AddOutcome` for how callers
    /// should react.
    pub fn add(&mut self, candidate: PeerRecord) -> AddOutcome {
        self.add_at(NodeIndex(0), 0, true, candidate)
    }

    fn add_at(
        &mut self,
        node_idx: NodeIndex,
        depth: usize,
        on_local_path: bool,
        candidate: PeerRecord,
    ) -> AddOutcome {
        match &self.arena[node_idx.0] {
            Node::Inner { zero, one } => {
                let (zero, one) = (*zero, *one);
                let next = if bit_at(&candidate.id, depth) { one } else { zero };
                let still_on_path = on_local_path && bit_at(&candidate.id, depth) == bit_at(&self.local_id, depth);
                self.add_at(next, depth + 1, still_on_path, candidate)
            }
            Node::Leaf(_) => self.add_leaf(node_idx, depth, on_local_path, candidate),
        }
    }

    fn add_leaf(
        &mut self,
        node_idx: NodeIndex,
        depth: usize,
        on_local_path: bool,
        candidate: PeerRecord,
    ) -> AddOutcome {
        let Node::Leaf(bucket) = &mut self.arena[node_idx.0] else {
            unreachable!("add_leaf called on a non-leaf node");
        };

        if let Some(existing_idx) = bucket.find(candidate.id) {
            let (existing, _) = bucket.contacts[existing_idx];
            if candidate.vector_clock >= existing.vector_clock {
                bucket.contacts[existing_idx] = (candidate, Instant::now());
            }
            return AddOutcome::Updated;
        }

        if bucket.contacts.len() < K {
            bucket.contacts.push((candidate, Instant::now()));
            return AddOutcome::Added;
        }

        let splittable = on_local_path && !bucket.no_split && depth < ID_BITS;
        if !splittable {
            if !bucket.replacements.iter().any(|peer| peer.id == candidate.id) {
                bucket.replacements.push(candidate);
                if bucket.replacements.len() > REPLACEMENT_CAP {
                    bucket.replacements.remove(0);
                }
            }
            let ping_candidates = bucket
                .contacts
                .iter()
                .map(|(peer, _)| *peer)
                .collect();
            return AddOutcome::Full { ping_candidates };
        }

        self.split(node_idx, depth);
        self.add_at(node_idx, depth, on_local_path, candidate)
    }

    /// Splits the leaf at `node_idx` (known to be on the path to `local_id`
    /// and full) into two child leaves, redistributing its contacts by the
    /// bit at `depth`. The child that stays on the local path remains
    /// splittable; its sibling is marked `noSplit`.
    fn split(&mut self, node_idx: NodeIndex, depth: usize) {
        let Node::Leaf(old) = std::mem::replace(&mut self.arena[node_idx.0], Node::Leaf(KBucket::default()))
        else {
            unreachable!("split called on a non-leaf node");
        };

        let mut zero_bucket = KBucket::default();
        let mut one_bucket = KBucket::default();
        for (peer, seen_at) in old.contacts {
            if bit_at(&peer.id, depth) {
                one_bucket.contacts.push((peer, seen_at));
            } else {
                zero_bucket.contacts.push((peer, seen_at));
            }
        }

        let local_bit = bit_at(&self.local_id, depth);
        zero_bucket.no_split = local_bit;
        one_bucket.no_split = !local_bit;

        let zero_idx = NodeIndex(self.arena.len());
        self.arena.push(Node::Leaf(zero_bucket));
        let one_idx = NodeIndex(self.arena.len());
        self.arena.push(Node::Leaf(one_bucket));

        self.arena[node_idx.0] = Node::Inner {
            zero: zero_idx,
            one: one_idx,
        };
    }

    /// Replaces an unresponsive contact with the best waiting candidate for
    /// its bucket, if any. Called by the discovery driver once a
    /// `Full { ping_candidates }` ping round resolves.
    pub fn evict_and_promote(&mut self, bucket_member: H512) {
        for node in &mut self.arena {
            if let Node::Leaf(bucket) = node {
                if let Some(idx) = bucket.find(bucket_member) {
                    bucket.contacts.remove(idx);
                    if let Some(replacement) = bucket.replacements.pop() {
                        bucket.contacts.push((replacement, Instant::now()));
                    }
                    return;
                }
            }
        }
    }

    /// The `n` contacts closest to `target` by XOR distance, ascending.
    pub fn closest(&self, target: H512, n: usize) -> Vec<PeerRecord> {
        let mut all: Vec<PeerRecord> = self
            .arena
            .iter()
            .filter_map(|node| match node {
                Node::Leaf(bucket) => Some(bucket.contacts.iter().map(|(peer, _)| *peer)),
                Node::Inner { .. } => None,
            })
            .flatten()
            .collect();
        all.sort_by_key(|peer| xor_distance(&peer.id, &target));
        all.truncate(n);
        all
    }

    /// Every contact currently in the table, in no particular order; used to
    /// snapshot the table for `peerstore.json`.
    pub fn all_contacts(&self) -> Vec<PeerRecord> {
        self.arena
            .iter()
            .filter_map(|node| match node {
                Node::Leaf(bucket) => Some(bucket.contacts.iter().map(|(peer, _)| *peer)),
                Node::Inner { .. } => None,
            })
            .flatten()
            .collect()
    }

    /// The `count` least-recently-seen contacts in each bucket, across the
    /// whole table; used by the 30s revalidation sweep.
    pub fn stalest_contacts(&self, per_bucket: usize) -> Vec<PeerRecord> {
        let mut out = Vec::new();
        for node in &self.arena {
            if let Node::Leaf(bucket) = node {
                let mut entries: Vec<_> = bucket.contacts.iter().collect();
                entries.sort_by_key(|(_, seen_at)| *seen_at);
                out.extend(entries.into_iter().take(per_bucket).map(|(peer, _)| *peer));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_peer() -> PeerRecord {
        PeerRecord {
            id: H512::random(),
            ip: "127.0.0.1".parse().unwrap(),
            udp_port: 30301,
            tcp_port: 30303,
            vector_clock: 1,
        }
    }

    #[test]
    fn fills_table_and_returns_closest_in_nondecreasing_distance() {
        let local_id = H512::random();
        let mut table = RoutingTable::new(local_id);
        for _ in 0..1000 {
            table.add(random_peer());
        }
        // Only the bucket on the path to `local_id` keeps splitting; every
        // sibling bucket caps at K, so a table fed 1000 random ids holds far
        // fewer than 1000 contacts, but at least a full bucket's worth.
        assert!(table.count() >= K);
        assert!(table.count() < 1000);

        let closest = table.closest(local_id, 16);
        assert_eq!(closest.len(), 16);
        let mut last = [0u8; 64];
        for peer in &closest {
            let distance = xor_distance(&peer.id, &local_id);
            assert!(distance >= last);
            last = distance;
        }
    }

    #[test]
    fn splits_full_bucket_on_local_path() {
        let local_id = H512::random();
        let mut table = RoutingTable::new(local_id);

        // K contacts sharing `local_id`'s bit 0 (so after the split they
        // land in the same, still-splittable child), each unique via a
        // distinct low-order byte.
        for i in 0..K as u8 {
            let mut peer = random_peer();
            peer.id = local_id;
            peer.id.as_bytes_mut()[63] ^= i + 1;
            table.add(peer);
        }
        assert_eq!(table.count(), K);

        // Differs from `local_id` only at bit 0 (the MSB): after the split
        // this lands in the sibling leaf, which gets marked `noSplit`.
        let mut differs_at_bit0 = local_id;
        differs_at_bit0.as_bytes_mut()[0] ^= 0x80;
        let candidate = PeerRecord {
            id: differs_at_bit0,
            ip: "127.0.0.1".parse().unwrap(),
            udp_port: 30301,
            tcp_port: 30303,
            vector_clock: 1,
        };
        let outcome = table.add(candidate);
        assert!(matches!(outcome, AddOutcome::Added));
        assert_eq!(table.count(), K + 1);
    }
}
