use tracing::{debug, info, warn};

use tally_common::{
    env::{Body, NodeState, StatePointer},
    utils::NodeId,
};

use crate::{
    election::{
        musig::{parse_scalar_hex, scalar_hex},
        proof, SessionContext, VoteSession,
    },
    event::{ClusterEvent, Outgoing},
};

use super::core::Cluster;

/// Decides whether this node endorses a candidate.
pub trait Eligibility: Send + Sync {
    fn is_eligible(&self, candidate: &NodeId, candidate_last: &StatePointer, local_last: &StatePointer) -> bool;
}

/// Endorses candidates whose log is at least as fresh as ours, comparing
/// the term of the last entry first and then its index.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFreshness;

impl Eligibility for LogFreshness {
    fn is_eligible(&self, _candidate: &NodeId, candidate_last: &StatePointer, local_last: &StatePointer) -> bool {
        (candidate_last.term, candidate_last.index) >= (local_last.term, local_last.index)
    }
}

impl Cluster {
    /// Starts a candidacy for the next term.
    pub fn promote(&mut self, now: u64) -> Vec<Outgoing> {
        if self.state != NodeState::Follower {
            return Vec::new();
        }
        let Some(position) = self.index.position(&self.id) else {
            warn!("Node {} is not a member, cannot run for leader", self.id.short());
            return Vec::new();
        };

        let nonce = now.max(self.last_nonce + 1);
        self.last_nonce = nonce;
        let term = self.term + 1;
        self.set_term(term);
        self.state = NodeState::Candidate;
        self.leader = None;
        self.own_proof = None;
        self.accepted_proof = None;

        let context = SessionContext::new(&self.index, term, nonce, &self.id);
        let own = context.partial_sign(&self.index, position, &self.auth.secret_scalar());
        let mut session = VoteSession::for_candidate(&self.index, context);
        session.replies.insert(self.id.clone(), own);
        self.session = Some(session);
        self.reset_election_deadline(now);

        info!(target: "consensus", "EVENT:PROMOTE term={} nonce={} node={}", term, nonce, self.id.short());
        self.emit(ClusterEvent::State { state: self.state, term, leader: None });

        if self.quorum() <= 1 {
            return self.finalize(now);
        }
        self.broadcast(Body::Vote { nonce: Some(nonce) }, now)
    }

    pub(crate) fn on_vote(
        &mut self,
        candidate: &NodeId,
        term: u64,
        nonce: Option<u64>,
        candidate_last: &StatePointer,
        now: u64,
    ) -> Vec<Outgoing> {
        let Some(nonce) = nonce else {
            debug!("Vote request from {} without nonce", candidate.short());
            return self.refuse_vote(candidate, now);
        };
        if term <= self.term {
            debug!("Refusing {} for term {}, already at {}", candidate.short(), term, self.term);
            return self.refuse_vote(candidate, now);
        }
        if !self.eligibility.is_eligible(candidate, candidate_last, self.log.last()) {
            info!("Refusing {}: log at {} is behind ours at {}", candidate.short(), candidate_last.index, self.log.last().index);
            return self.refuse_vote(candidate, now);
        }
        let Some(position) = self.index.position(&self.id) else {
            return self.refuse_vote(candidate, now);
        };

        let context = SessionContext::new(&self.index, term, nonce, candidate);
        let partial = context.partial_sign(&self.index, position, &self.auth.secret_scalar());
        self.become_follower(term, None, now);
        self.session = Some(VoteSession::for_voter(context));

        info!(target: "consensus", "EVENT:VOTE term={} candidate={} voter={}", term, candidate.short(), self.id.short());
        vec![self.send(candidate, Body::Voted { signature: Some(scalar_hex(&partial)) }, now)]
    }

    fn refuse_vote(&self, candidate: &NodeId, now: u64) -> Vec<Outgoing> {
        vec![self.send(candidate, Body::Voted { signature: None }, now)]
    }

    pub(crate) fn on_voted(&mut self, voter: &NodeId, term: u64, signature: Option<String>, now: u64) -> Vec<Outgoing> {
        if self.state != NodeState::Candidate || term != self.term {
            return Vec::new();
        }
        let Some(signature) = signature else {
            debug!("{} declined to vote in term {}", voter.short(), term);
            return Vec::new();
        };
        let Some(position) = self.index.position(voter) else {
            return Vec::new();
        };
        let Ok(partial) = parse_scalar_hex(&signature) else {
            debug!("Unreadable partial signature from {}", voter.short());
            return Vec::new();
        };

        let votes = {
            let Some(session) = self.session.as_mut() else {
                return Vec::new();
            };
            if session.context.candidate != self.id || !session.context.verify_partial(&self.index, position, &partial) {
                debug!("Invalid partial signature from {}", voter.short());
                return Vec::new();
            }
            session.replies.insert(voter.clone(), partial);
            session.replies.len()
        };

        debug!("Term {}: {} of {} votes", term, votes, self.quorum());
        if votes >= self.quorum() {
            return self.finalize(now);
        }
        Vec::new()
    }

    /// Aggregates the collected partials and, if the proof checks out,
    /// takes leadership.
    fn finalize(&mut self, now: u64) -> Vec<Outgoing> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let outcome = proof::aggregate(&self.index, session)
            .and_then(|p| proof::verify(&self.index, self.term, &self.id, &p).map(|_| p));
        match outcome {
            Ok(p) => self.become_leader(p, now),
            Err(e) => {
                warn!("Election for term {} failed: {}", self.term, e);
                self.become_follower(self.term, None, now);
                Vec::new()
            }
        }
    }
}
