#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};

use tally_common::{
    auth::{Authenticator, Secp256k1Authenticator},
    env::{NodeState, Packet},
    utils::NodeId,
};
use tally_consensus::{Cluster, ClusterBuilder, ClusterEvent, ClusterSettings, Outgoing};

pub const STEP_MS: u64 = 10;

pub fn test_settings() -> ClusterSettings {
    ClusterSettings {
        heartbeat_ms: 50,
        election_min_ms: 300,
        election_max_ms: 600,
        gossip_interval_ms: 50,
        proof_expiration_ms: 60_000,
        batch_limit: 100,
        liveness_timeout_ms: 1_000,
        ..Default::default()
    }
}

/// In-process cluster driven by a virtual clock. Packets travel through
/// the wire codec and are delivered in FIFO order.
pub struct Sim {
    pub nodes: Vec<Cluster>,
    pub down: HashSet<usize>,
    pub now: u64,
    pub events: Vec<Vec<ClusterEvent>>,
    queue: VecDeque<(usize, Vec<u8>)>,
    next_gossip: u64,
    settings: ClusterSettings,
}

impl Sim {
    pub fn new(n: usize) -> Self {
        Self::with_settings(n, test_settings())
    }

    pub fn with_settings(n: usize, settings: ClusterSettings) -> Self {
        let mut auths: Vec<Secp256k1Authenticator> = (0..n).map(|_| Secp256k1Authenticator::generate()).collect();
        auths.sort_by_key(|a| a.public_key());
        let ids: Vec<NodeId> = auths.iter().map(|a| a.public_key()).collect();
        let signers: Vec<Secp256k1Authenticator> = (0..n).map(|_| Secp256k1Authenticator::generate()).collect();
        let command_keys: Vec<(NodeId, NodeId)> =
            ids.iter().cloned().zip(signers.iter().map(|s| s.public_key())).collect();

        let now = 1_000;
        let nodes: Vec<Cluster> = auths
            .into_iter()
            .zip(signers)
            .enumerate()
            .map(|(i, (auth, signer))| {
                let mut builder = ClusterBuilder::new(auth).settings(settings.clone()).command_signer(signer);
                for (member, key) in &command_keys {
                    builder = builder.command_key(member.clone(), key.clone());
                }
                let mut node = builder.seed(i as u64 + 1).build(now).unwrap();
                node.start(now);
                node
            })
            .collect();

        Self {
            events: vec![Vec::new(); nodes.len()],
            nodes,
            down: HashSet::new(),
            now,
            queue: VecDeque::new(),
            next_gossip: now,
            settings,
        }
    }

    pub fn id(&self, i: usize) -> NodeId {
        self.nodes[i].id().clone()
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == id)
    }

    pub fn send(&mut self, out: Vec<Outgoing>) {
        for o in out {
            if let Some(to) = self.position(&o.to) {
                self.queue.push_back((to, o.packet.encode().unwrap()));
            }
        }
    }

    /// Delivers until the network is quiet.
    pub fn flush(&mut self) {
        let mut budget = 200_000;
        while let Some((to, bytes)) = self.queue.pop_front() {
            budget -= 1;
            assert!(budget > 0, "message storm");
            let packet = Packet::decode(&bytes).unwrap();
            let from_down = self.position(&packet.public_key).map_or(false, |i| self.down.contains(&i));
            if self.down.contains(&to) || from_down {
                continue;
            }
            let out = self.nodes[to].handle(packet, self.now);
            self.collect(to);
            self.send(out);
        }
    }

    fn collect(&mut self, i: usize) {
        let drained = self.nodes[i].drain_events();
        self.events[i].extend(drained);
    }

    /// Advances the clock by `ms`, ticking every live node each step.
    pub fn advance(&mut self, ms: u64) {
        let end = self.now + ms;
        while self.now < end {
            self.now += STEP_MS;
            let gossip = self.now >= self.next_gossip;
            if gossip {
                self.next_gossip = self.now + self.settings.gossip_interval_ms;
            }
            for i in 0..self.nodes.len() {
                if self.down.contains(&i) {
                    continue;
                }
                let mut out = self.nodes[i].tick(self.now);
                if gossip {
                    out.extend(self.nodes[i].gossip_tick(self.now));
                }
                self.collect(i);
                self.send(out);
            }
            self.flush();
        }
    }

    /// Advances until `done` holds, up to `limit` ms.
    pub fn run_until(&mut self, limit: u64, mut done: impl FnMut(&Sim) -> bool) -> bool {
        let end = self.now + limit;
        while self.now < end {
            if done(self) {
                return true;
            }
            self.advance(STEP_MS);
        }
        done(self)
    }

    pub fn live(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|i| !self.down.contains(i))
    }

    pub fn leaders(&self) -> Vec<usize> {
        self.live().filter(|&i| self.nodes[i].state() == NodeState::Leader).collect()
    }

    /// Exactly one live leader, followed by every other live node.
    pub fn stable_leader(&self) -> Option<usize> {
        let leaders = self.leaders();
        if leaders.len() != 1 {
            return None;
        }
        let leader = leaders[0];
        let id = self.id(leader);
        let followed = self.live().filter(|&i| i != leader).all(|i| {
            let node = &self.nodes[i];
            node.state() == NodeState::Follower && node.leader() == Some(&id)
        });
        followed.then_some(leader)
    }

    pub fn elect(&mut self) -> usize {
        assert!(self.run_until(20_000, |s| s.stable_leader().is_some()), "no leader elected");
        self.stable_leader().unwrap()
    }

    pub fn committed(&self, i: usize) -> u64 {
        self.nodes[i].log().committed_index()
    }

    pub fn all_committed(&self, index: u64) -> bool {
        self.live().all(|i| self.committed(i) >= index)
    }
}
