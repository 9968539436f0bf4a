use tracing::{debug, info};

use tally_common::env::{Body, NodeState};

use crate::event::Outgoing;

use super::{append::append_bodies, core::Cluster};

impl Cluster {
    /// Drives timers. Call at least every `heartbeat_ms`.
    pub fn tick(&mut self, now: u64) -> Vec<Outgoing> {
        match self.state {
            NodeState::Stopped => Vec::new(),
            NodeState::Follower => {
                if now >= self.election_deadline {
                    debug!("Election timeout on {} at term {}", self.id.short(), self.term);
                    return self.promote(now);
                }
                Vec::new()
            }
            NodeState::Candidate => {
                if now >= self.election_deadline {
                    info!("Election for term {} timed out on {}", self.term, self.id.short());
                    self.become_follower(self.term, None, now);
                }
                Vec::new()
            }
            NodeState::Leader => {
                let expiration = self.settings.proof_expiration_ms;
                let expired = self.own_proof.as_ref().map_or(true, |p| p.expired(now, expiration));
                if expired {
                    info!(target: "consensus", "EVENT:STEP_DOWN term={} node={} reason=proof_expired", self.term, self.id.short());
                    self.become_follower(self.term, None, now);
                    return Vec::new();
                }
                let mut out = self.drain_pending(now);
                if now >= self.heartbeat_deadline {
                    out.extend(self.heartbeat(now));
                }
                out
            }
        }
    }

    /// Leader: `ACK` to every peer, plus a resend of the uncommitted
    /// entries each peer has not acknowledged yet.
    pub(crate) fn heartbeat(&mut self, now: u64) -> Vec<Outgoing> {
        self.heartbeat_deadline = now + self.settings.heartbeat_ms;
        let mut out = self.broadcast(Body::Ack, now);

        let uncommitted = match self.log.entries_after(self.log.committed_index(), self.settings.batch_limit) {
            Ok(entries) => entries,
            Err(e) => {
                self.report(e);
                return out;
            }
        };
        if uncommitted.is_empty() {
            return out;
        }
        for peer in self.peers() {
            if let Some(start) = uncommitted.iter().position(|e| !e.responses.contains(peer)) {
                out.extend(append_bodies(&uncommitted[start..]).into_iter().map(|body| self.send(peer, body, now)));
            }
        }
        out
    }
}
