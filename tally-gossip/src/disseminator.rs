use std::collections::{HashSet, VecDeque};

use rand::{seq::SliceRandom, Rng};
use tracing::{debug, info, warn};

use tally_common::{
    env::{Digest, PeerUpdate, PendingEntry},
    utils::NodeId,
};

use crate::{
    peer::PeerGossipState,
    scuttle::{self, PeerMap, Scuttle},
};

/// Hashes kept after commit so late deltas cannot resurrect them.
pub const COMMITTED_CACHE_LIMIT: usize = 50_000;

#[derive(Debug)]
pub struct CommittedCache {
    hashes: HashSet<String>,
    order: VecDeque<String>,
    limit: usize,
}

impl CommittedCache {
    pub fn new(limit: usize) -> Self {
        Self { hashes: HashSet::new(), order: VecDeque::new(), limit }
    }

    pub fn insert(&mut self, hash: &str) {
        if self.hashes.insert(hash.to_string()) {
            self.order.push_back(hash.to_string());
        }
        while self.order.len() > self.limit {
            if let Some(old) = self.order.pop_front() {
                self.hashes.remove(&old);
            }
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for CommittedCache {
    fn default() -> Self {
        Self::new(COMMITTED_CACHE_LIMIT)
    }
}

/// Anti-entropy store of pending commands, one [`PeerGossipState`] per member.
#[derive(Debug)]
pub struct GossipDisseminator {
    local: NodeId,
    peers: PeerMap,
    committed: CommittedCache,
    liveness_timeout: u64,
}

impl GossipDisseminator {
    pub fn new(local: NodeId, now: u64, liveness_timeout: u64) -> Self {
        let mut peers = PeerMap::new();
        peers.insert(local.clone(), PeerGossipState::new(now));
        Self { local, peers, committed: CommittedCache::default(), liveness_timeout }
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    pub fn add_peer(&mut self, peer: NodeId, now: u64) -> bool {
        if self.peers.contains_key(&peer) {
            return false;
        }
        self.peers.insert(peer, PeerGossipState::new(now));
        true
    }

    pub fn remove_peer(&mut self, peer: &NodeId) -> bool {
        if *peer == self.local {
            return false;
        }
        self.peers.remove(peer).is_some()
    }

    pub fn is_alive(&self, peer: &NodeId) -> bool {
        self.peers.get(peer).map(|p| p.alive).unwrap_or(false)
    }

    /// Adds a locally pushed command under the next local version.
    pub fn push(&mut self, entry: PendingEntry) -> bool {
        if self.committed.contains(&entry.hash) || self.contains(&entry.hash) {
            return false;
        }
        let Some(state) = self.peers.get_mut(&self.local) else {
            return false;
        };
        state.max_version += 1;
        let version = state.max_version;
        debug!("Gossip push {} at version {}", entry.hash, version);
        state.records.insert(entry.hash.clone(), (entry, version));
        true
    }

    /// Bumps the local liveness counter and re-evaluates everyone else's.
    pub fn tick(&mut self, now: u64) {
        let timeout = self.liveness_timeout;
        for (id, state) in self.peers.iter_mut() {
            if *id == self.local {
                let next = state.heartbeat + 1;
                state.observe_heartbeat(next, now);
                continue;
            }
            if state.check_liveness(now, timeout) {
                if state.alive {
                    info!("Peer {} is alive again", id.short());
                } else {
                    warn!("Peer {} stopped gossiping", id.short());
                }
            }
        }
    }

    /// A gossip target, preferring peers currently considered alive.
    pub fn random_peer<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<NodeId> {
        let others: Vec<&NodeId> = self.peers.keys().filter(|id| **id != self.local).collect();
        let alive: Vec<&NodeId> = others.iter().copied().filter(|id| self.is_alive(id)).collect();
        let pool = if alive.is_empty() { others } else { alive };
        pool.choose(rng).map(|id| (*id).clone())
    }

    /// Digest opening a scuttle round.
    pub fn request(&self) -> Digest {
        scuttle::digest(&self.peers)
    }

    /// First leg on the receiving side: what to send and what to ask for.
    pub fn handle_request(&self, remote: &Digest) -> Scuttle {
        scuttle::scuttle(&self.peers, remote)
    }

    /// Second leg on the opening side: merge, then answer the requests.
    pub fn handle_first_response<F>(
        &mut self,
        requests: &Digest,
        updates: Vec<PeerUpdate>,
        now: u64,
        verify: F,
    ) -> Vec<PeerUpdate>
    where
        F: Fn(&NodeId, &PendingEntry) -> bool,
    {
        self.apply(updates, now, verify);
        scuttle::answer(&self.peers, requests)
    }

    /// Merges deltas peer by peer. Only versions newer than what is known
    /// for that peer are taken, so re-delivery is a no-op. Updates about
    /// peers outside the current membership are dropped.
    ///
    /// Returns the number of records merged.
    pub fn apply<F>(&mut self, updates: Vec<PeerUpdate>, now: u64, verify: F) -> usize
    where
        F: Fn(&NodeId, &PendingEntry) -> bool,
    {
        let mut merged = 0;
        for update in updates {
            if update.peer == self.local {
                // After a restart others may remember versions we have forgotten.
                if let Some(state) = self.peers.get_mut(&self.local) {
                    state.max_version = state.max_version.max(update.max_version);
                }
                continue;
            }

            let known: HashSet<String> = self.all_hashes();
            let Some(state) = self.peers.get_mut(&update.peer) else {
                debug!("Ignoring gossip about non-member {}", update.peer.short());
                continue;
            };
            state.observe_heartbeat(update.heartbeat, now);
            if update.max_version <= state.max_version {
                continue;
            }

            let floor = state.max_version;
            for record in update.records {
                if record.version <= floor
                    || self.committed.contains(&record.entry.hash)
                    || known.contains(&record.entry.hash)
                {
                    continue;
                }
                if !verify(&update.peer, &record.entry) {
                    warn!("Dropping gossip record {} from {}: bad signature", record.entry.hash, update.peer.short());
                    continue;
                }
                state.records.insert(record.entry.hash.clone(), (record.entry, record.version));
                merged += 1;
            }
            state.max_version = update.max_version;
        }
        merged
    }

    /// Pending records oldest first, ordered by `(version, owner)`.
    pub fn pending(&self) -> Vec<PendingEntry> {
        let mut all: Vec<(u64, &NodeId, &PendingEntry)> = self
            .peers
            .iter()
            .flat_map(|(id, state)| state.records.values().map(move |(entry, v)| (*v, id, entry)))
            .collect();
        all.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        all.into_iter().map(|(_, _, entry)| entry.clone()).collect()
    }

    pub fn next_pending(&self) -> Option<PendingEntry> {
        self.pending().into_iter().next()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.peers.values().any(|state| state.records.contains_key(hash))
    }

    pub fn is_committed(&self, hash: &str) -> bool {
        self.committed.contains(hash)
    }

    /// Forgets `hash` everywhere and remembers it as committed.
    pub fn pull_pending(&mut self, hash: &str) -> bool {
        let mut removed = false;
        for state in self.peers.values_mut() {
            removed |= state.records.remove(hash).is_some();
        }
        self.committed.insert(hash);
        removed
    }

    fn all_hashes(&self) -> HashSet<String> {
        self.peers.values().flat_map(|state| state.records.keys().cloned()).collect()
    }
}
