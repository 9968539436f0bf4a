use std::collections::{BTreeMap, BTreeSet};

use rand::{rngs::StdRng, Rng};
use tracing::{debug, error, info};

use tally_common::{
    auth::{Authenticator, Secp256k1Authenticator},
    env::{Body, NodeState, Packet, StatePointer},
    error::TallyError,
    utils::NodeId,
};
use tally_gossip::GossipDisseminator;
use tally_ledger::{Applier, ReplicatedLog, StateView};

use crate::{
    election::{proof, CombinationIndex, Proof, VoteSession},
    event::{ClusterEvent, Outgoing},
    settings::ClusterSettings,
};

use super::voting::Eligibility;

/// A leadership proof together with where and when it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRecord {
    pub proof: String,
    pub term: u64,
    pub leader: NodeId,
    /// Minted (own proof) or first verified (accepted proof), millis.
    pub since: u64,
}

impl ProofRecord {
    pub fn expired(&self, now: u64, expiration: u64) -> bool {
        now.saturating_sub(self.since) >= expiration
    }
}

/// Point-in-time summary for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStatus {
    pub id: NodeId,
    pub state: NodeState,
    pub term: u64,
    pub leader: Option<NodeId>,
    pub last: StatePointer,
    pub members: usize,
    pub quorum: usize,
}

/// One member of the replicated log cluster.
///
/// All mutation goes through `&mut self`, which serialises the leader's
/// drain of pending commands against incoming appends and acks.
pub struct Cluster {
    /// Identity key. Its scalar feeds election partial signatures, whose
    /// nonces are public, so it never signs commands.
    pub(crate) auth: Secp256k1Authenticator,
    pub(crate) signer: Secp256k1Authenticator,
    /// Member id to the public key its commands are signed with.
    pub(crate) command_keys: BTreeMap<NodeId, NodeId>,
    pub(crate) id: NodeId,
    pub(crate) settings: ClusterSettings,
    pub(crate) members: BTreeSet<NodeId>,
    pub(crate) index: CombinationIndex,
    pub(crate) log: ReplicatedLog,
    pub(crate) gossip: GossipDisseminator,
    pub(crate) applier: Box<dyn Applier>,
    pub(crate) eligibility: Box<dyn Eligibility>,

    pub(crate) state: NodeState,
    pub(crate) shut_down: bool,
    pub(crate) term: u64,
    pub(crate) leader: Option<NodeId>,
    pub(crate) session: Option<VoteSession>,
    pub(crate) own_proof: Option<ProofRecord>,
    pub(crate) accepted_proof: Option<ProofRecord>,

    pub(crate) election_deadline: u64,
    pub(crate) heartbeat_deadline: u64,
    pub(crate) last_append_at: u64,
    pub(crate) last_reappend_at: u64,
    /// Highest local index known to match the current leader's chain.
    pub(crate) verified_index: u64,
    pub(crate) last_nonce: u64,

    pub(crate) rng: StdRng,
    pub(crate) events: Vec<ClusterEvent>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("term", &self.term)
            .field("leader", &self.leader)
            .field("last", self.log.last())
            .finish()
    }
}

impl Cluster {
    /// Enters the follower state. A node that was stopped stays stopped.
    pub fn start(&mut self, now: u64) {
        if self.shut_down {
            debug!("Ignoring start of a stopped node");
            return;
        }
        if self.state != NodeState::Stopped {
            return;
        }
        info!("Node {} starting at term {} with {} members", self.id.short(), self.term, self.members.len());
        self.become_follower(self.term, None, now);
    }

    pub fn stop(&mut self) {
        if self.state == NodeState::Stopped && self.shut_down {
            return;
        }
        info!("Node {} stopping", self.id.short());
        self.state = NodeState::Stopped;
        self.shut_down = true;
        self.leader = None;
        self.session = None;
        self.own_proof = None;
        self.accepted_proof = None;
        self.emit_state();
    }

    /// Routes one inbound packet.
    pub fn handle(&mut self, packet: Packet, now: u64) -> Vec<Outgoing> {
        if self.state == NodeState::Stopped {
            return Vec::new();
        }
        let sender = packet.public_key.clone();
        if sender == self.id {
            return Vec::new();
        }
        if !self.members.contains(&sender) {
            debug!("Dropping {} from non-member {}", packet.message_type(), sender.short());
            return Vec::new();
        }

        let from_leader = packet.state == NodeState::Leader;
        if from_leader && !self.accept_leader(&packet, now) {
            return Vec::new();
        }

        if !from_leader && self.state == NodeState::Leader && packet.term > self.term {
            info!(target: "consensus", "EVENT:STEP_DOWN term={} node={} reason=higher_term from={}", packet.term, self.id.short(), sender.short());
            self.become_follower(packet.term, None, now);
        }

        let Packet { term, body, last, .. } = packet;
        match body {
            Body::Vote { nonce } => self.on_vote(&sender, term, nonce, &last, now),
            Body::Voted { signature } => self.on_voted(&sender, term, signature, now),
            Body::Append { entries } if from_leader => self.on_append(&sender, entries, &last, now),
            Body::Append { .. } => Vec::new(),
            Body::AppendAck { index, hash } => self.on_append_ack(&sender, index, &hash),
            Body::AppendFail { index, reason } => self.on_append_fail(&sender, index, &reason, now),
            Body::ReAppend => self.on_reappend(&sender, &last, now),
            Body::GossipRequest { digest } => self.on_gossip_request(&sender, &digest, now),
            Body::GossipFirstResponse { digest, updates } => {
                self.on_gossip_first_response(&sender, &digest, updates, now)
            }
            Body::GossipSecondResponse { updates } => self.on_gossip_second_response(updates, now),
            Body::Ack if from_leader => self.follow_leader(&sender, &last, now),
            Body::Ack => Vec::new(),
            Body::Error { message } => {
                debug!("Peer {} reported: {}", sender.short(), message);
                Vec::new()
            }
        }
    }

    /// Validates a packet claiming leadership and adopts its sender.
    pub(crate) fn accept_leader(&mut self, packet: &Packet, now: u64) -> bool {
        let sender = &packet.public_key;
        if packet.term < self.term {
            debug!("Stale leader {} at term {} (ours {})", sender.short(), packet.term, self.term);
            return false;
        }
        let Some(claimed) = packet.proof.as_deref() else {
            debug!("Leader packet from {} without proof", sender.short());
            return false;
        };
        if self.state == NodeState::Leader && packet.term <= self.term {
            debug!("Ignoring rival leader {} at term {}", sender.short(), packet.term);
            return false;
        }

        if let Some(cached) = &self.accepted_proof {
            let same = cached.proof == claimed && cached.term == packet.term && cached.leader == *sender;
            if same && self.state == NodeState::Follower && self.term == packet.term {
                if cached.expired(now, self.settings.proof_expiration_ms) {
                    debug!("Leadership proof of {} expired", sender.short());
                    return false;
                }
                self.reset_election_deadline(now);
                return true;
            }
        }

        let parsed: Proof = match claimed.parse() {
            Ok(proof) => proof,
            Err(e) => {
                debug!("Malformed proof from {}: {}", sender.short(), e);
                return false;
            }
        };
        if let Err(e) = proof::verify(&self.index, packet.term, sender, &parsed) {
            debug!("Rejected proof from {}: {}", sender.short(), e);
            return false;
        }

        info!(target: "consensus", "EVENT:ACCEPT_LEADER term={} leader={} node={}", packet.term, sender.short(), self.id.short());
        self.become_follower(packet.term, Some(sender.clone()), now);
        self.accepted_proof = Some(ProofRecord {
            proof: claimed.to_string(),
            term: packet.term,
            leader: sender.clone(),
            since: now,
        });
        true
    }

    pub(crate) fn become_follower(&mut self, term: u64, leader: Option<NodeId>, now: u64) {
        let changed = self.state != NodeState::Follower || self.term != term || self.leader != leader;
        if term > self.term {
            self.set_term(term);
        }
        if self.leader != leader {
            self.verified_index = self.log.committed_index();
        }
        self.state = NodeState::Follower;
        self.leader = leader;
        self.session = None;
        self.own_proof = None;
        if self.leader.is_none() {
            self.accepted_proof = None;
        }
        self.reset_election_deadline(now);
        if changed {
            self.emit_state();
        }
    }

    pub(crate) fn become_leader(&mut self, proof: Proof, now: u64) -> Vec<Outgoing> {
        let proof = proof.to_string();
        info!(target: "consensus", "EVENT:LEADER term={} node={} proof={}", self.term, self.id.short(), proof);
        self.state = NodeState::Leader;
        self.leader = Some(self.id.clone());
        self.session = None;
        self.accepted_proof = None;
        self.own_proof = Some(ProofRecord { proof, term: self.term, leader: self.id.clone(), since: now });
        self.emit_state();
        self.heartbeat(now)
    }

    pub(crate) fn set_term(&mut self, term: u64) {
        self.term = term;
        if let Err(e) = self.log.persist_term(term) {
            self.report(e);
        }
    }

    pub(crate) fn reset_election_deadline(&mut self, now: u64) {
        let min = self.settings.election_min_ms;
        let max = self.settings.election_max_ms.max(min);
        self.election_deadline = now + self.rng.gen_range(min..=max);
    }

    pub(crate) fn packet(&self, body: Body, now: u64) -> Packet {
        let proof = match self.state {
            NodeState::Leader => self.own_proof.as_ref().map(|p| p.proof.clone()),
            _ => None,
        };
        Packet {
            state: self.state,
            term: self.term,
            public_key: self.id.clone(),
            proof,
            body,
            last: self.log.last().clone(),
            timestamp: now,
        }
    }

    pub(crate) fn send(&self, to: &NodeId, body: Body, now: u64) -> Outgoing {
        Outgoing { to: to.clone(), packet: self.packet(body, now) }
    }

    pub(crate) fn broadcast(&self, body: Body, now: u64) -> Vec<Outgoing> {
        let packet = self.packet(body, now);
        self.peers().map(|to| Outgoing { to: to.clone(), packet: packet.clone() }).collect()
    }

    pub(crate) fn peers(&self) -> impl Iterator<Item = &NodeId> {
        self.members.iter().filter(move |m| **m != self.id)
    }

    pub(crate) fn quorum(&self) -> usize {
        self.index.quorum()
    }

    /// Counts only current members.
    pub(crate) fn quorum_reached(&self, responses: &BTreeSet<NodeId>) -> bool {
        let votes = responses.iter().filter(|r| self.members.contains(*r)).count();
        votes >= self.quorum()
    }

    pub(crate) fn emit(&mut self, event: ClusterEvent) {
        self.events.push(event);
    }

    fn emit_state(&mut self) {
        let event = ClusterEvent::State { state: self.state, term: self.term, leader: self.leader.clone() };
        self.emit(event);
    }

    pub(crate) fn report(&mut self, err: TallyError) {
        error!("Node {}: {}", self.id.short(), err);
        self.emit(ClusterEvent::Error { message: err.to_string() });
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Public key verifying this node's commands.
    pub fn command_key(&self) -> NodeId {
        self.signer.public_key()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn leader(&self) -> Option<&NodeId> {
        self.leader.as_ref()
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn log(&self) -> &ReplicatedLog {
        &self.log
    }

    pub fn gossip(&self) -> &GossipDisseminator {
        &self.gossip
    }

    pub fn own_proof(&self) -> Option<&ProofRecord> {
        self.own_proof.as_ref()
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            id: self.id.clone(),
            state: self.state,
            term: self.term,
            leader: self.leader.clone(),
            last: self.log.last().clone(),
            members: self.members.len(),
            quorum: self.quorum(),
        }
    }

    /// Reads the applied value of `key`.
    pub fn get_value(&self, key: &str) -> tally_common::error::Result<Option<String>> {
        self.log.state_view().get(key)
    }

    /// Drops applied entries superseded by a later write to the same key.
    /// Members missing a compacted prefix can no longer be replayed to.
    pub fn compact(&mut self) -> tally_common::error::Result<usize> {
        let removed = self.log.compact()?;
        debug!("Compaction on {} removed {} entries", self.id.short(), removed);
        Ok(removed)
    }

    pub fn drain_events(&mut self) -> Vec<ClusterEvent> {
        std::mem::take(&mut self.events)
    }
}
