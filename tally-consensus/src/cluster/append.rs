use tracing::{debug, error, info, warn};

use tally_common::{
    env::{Body, LogEntry, NodeState, StatePointer},
    error::TallyError,
    utils::NodeId,
};
use tally_ledger::EntryDraft;

use crate::event::{ClusterEvent, Outgoing};

use super::{core::Cluster, gossip::verify_entry};

/// Splits consecutive entries into one `APPEND` body per term.
pub(crate) fn append_bodies(entries: &[LogEntry]) -> Vec<Body> {
    let mut bodies = Vec::new();
    let mut batch: Vec<LogEntry> = Vec::new();
    for entry in entries {
        if batch.last().is_some_and(|prev| prev.term != entry.term) {
            bodies.push(Body::Append { entries: std::mem::take(&mut batch) });
        }
        batch.push(entry.clone());
    }
    if !batch.is_empty() {
        bodies.push(Body::Append { entries: batch });
    }
    bodies
}

impl Cluster {
    /// Leader: folds pending gossip commands into the log, oldest first.
    pub(crate) fn drain_pending(&mut self, now: u64) -> Vec<Outgoing> {
        let mut appended: Vec<LogEntry> = Vec::new();
        while appended.len() < self.settings.batch_limit {
            let Some(pending) = self.gossip.next_pending() else {
                break;
            };
            match self.log.content_index(&pending.hash) {
                Ok(Some(index)) => {
                    debug!("Pending {} already at index {}", pending.hash, index);
                    self.gossip.pull_pending(&pending.hash);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    self.report(e);
                    break;
                }
            }
            if !self.members.contains(&pending.author) || !verify_entry(&self.auth, &self.command_keys, &pending.author, &pending) {
                warn!("Dropping pending {} from {}: invalid signature", pending.hash, pending.author.short());
                self.gossip.pull_pending(&pending.hash);
                continue;
            }

            let mut draft = EntryDraft::from_pending(&pending, self.term);
            draft.responses.insert(self.id.clone());
            match self.log.save(draft) {
                Ok(entry) => {
                    self.gossip.pull_pending(&pending.hash);
                    info!(target: "consensus", "EVENT:APPEND index={} term={} hash={}", entry.index, entry.term, entry.hash);
                    self.emit(ClusterEvent::Log { entry: entry.clone() });
                    appended.push(entry);
                }
                Err(e) => {
                    self.report(e);
                    break;
                }
            }
        }

        let Some(last) = appended.last().cloned() else {
            return Vec::new();
        };
        self.maybe_commit(&last);
        append_bodies(&appended).into_iter().flat_map(|body| self.broadcast(body, now)).collect()
    }

    /// Follower: replicates entries from the accepted leader.
    pub(crate) fn on_append(
        &mut self,
        leader: &NodeId,
        entries: Vec<LogEntry>,
        leader_last: &StatePointer,
        now: u64,
    ) -> Vec<Outgoing> {
        if self.state != NodeState::Follower || self.leader.as_ref() != Some(leader) {
            return Vec::new();
        }
        self.last_append_at = now;

        let mut out = Vec::new();
        for entry in entries {
            let tail = self.log.last().index;
            if entry.index <= tail {
                match self.log.get(entry.index) {
                    Ok(Some(local)) if local.hash == entry.hash => {
                        self.verified_index = self.verified_index.max(entry.index);
                        out.push(self.ack(leader, &entry, now));
                        continue;
                    }
                    // Compacted away, so committed and settled.
                    Ok(None) if entry.index <= self.log.committed_index() => {
                        out.push(self.ack(leader, &entry, now));
                        continue;
                    }
                    Ok(_) => {
                        out.push(self.reject_append(leader, entry.index, "conflicting entry", now));
                        break;
                    }
                    Err(e) => {
                        self.report(e);
                        break;
                    }
                }
            }
            if entry.index > tail + 1 {
                debug!("Gap before {} (local tail {}), waiting for replay", entry.index, tail);
                break;
            }

            let mut draft = EntryDraft::replica(&entry);
            draft.responses.insert(self.id.clone());
            match self.log.save(draft) {
                Ok(saved) => {
                    self.gossip.pull_pending(&saved.content_hash);
                    self.verified_index = self.verified_index.max(saved.index);
                    debug!(target: "consensus", "EVENT:REPLICATE index={} term={} node={}", saved.index, saved.term, self.id.short());
                    out.push(self.ack(leader, &saved, now));
                    self.emit(ClusterEvent::Log { entry: saved });
                }
                Err(TallyError::WrongHash { .. }) => {
                    out.push(self.reject_append(leader, entry.index, "hash mismatch", now));
                    break;
                }
                Err(e) => {
                    debug!("Could not store entry {}: {}", entry.index, e);
                    break;
                }
            }
        }

        out.extend(self.follow_leader(leader, leader_last, now));
        out
    }

    fn ack(&self, leader: &NodeId, entry: &LogEntry, now: u64) -> Outgoing {
        self.send(leader, Body::AppendAck { index: entry.index, hash: entry.hash.clone() }, now)
    }

    /// Drops the uncommitted suffix and asks the leader to replay from the
    /// committed index.
    fn reject_append(&mut self, leader: &NodeId, index: u64, reason: &str, now: u64) -> Outgoing {
        let committed = self.log.committed_index();
        if index <= committed {
            error!("Leader {} disagrees with committed entry {}", leader.short(), index);
            self.emit(ClusterEvent::Error { message: format!("conflict at committed index {index}") });
        } else {
            match self.log.truncate_after(committed) {
                Ok(removed) if !removed.is_empty() => {
                    info!("Discarded {} uncommitted entries after {}", removed.len(), committed);
                }
                Ok(_) => {}
                Err(e) => self.report(e),
            }
        }
        self.verified_index = self.verified_index.min(committed);
        self.send(leader, Body::AppendFail { index: committed, reason: reason.to_string() }, now)
    }

    /// Follower: tracks the leader's tail, commits what both sides agree on
    /// and asks for a replay when left behind or diverged.
    pub(crate) fn follow_leader(&mut self, leader: &NodeId, leader_last: &StatePointer, now: u64) -> Vec<Outgoing> {
        if self.leader.as_ref() != Some(leader) {
            return Vec::new();
        }
        let tail = self.log.last().clone();
        let mut diverged = false;
        if leader_last.index <= tail.index && leader_last.index > self.verified_index {
            match self.log.get(leader_last.index) {
                Ok(Some(local)) if local.hash == leader_last.hash => self.verified_index = leader_last.index,
                // Below the committed index the entry is either verified or compacted.
                Ok(_) => diverged = leader_last.index > self.log.committed_index(),
                Err(e) => self.report(e),
            }
        }

        let target = leader_last.committed_index.min(self.verified_index);
        if target > self.log.committed_index() {
            self.commit_through(target);
        }

        let heartbeat = self.settings.heartbeat_ms;
        let idle = now.saturating_sub(self.last_append_at) > heartbeat;
        let quiet = now.saturating_sub(self.last_reappend_at) > heartbeat;
        if diverged && quiet {
            self.last_reappend_at = now;
            warn!("Entry {} differs from leader {}, dropping uncommitted tail", leader_last.index, leader.short());
            return vec![self.reject_append(leader, leader_last.index, "diverged from leader", now)];
        }
        if leader_last.index > tail.index && idle && quiet {
            self.last_reappend_at = now;
            debug!("Behind leader ({} < {}), requesting replay", tail.index, leader_last.index);
            return vec![self.send(leader, Body::ReAppend, now)];
        }
        Vec::new()
    }

    /// Leader: records a follower's acknowledgement.
    pub(crate) fn on_append_ack(&mut self, from: &NodeId, index: u64, hash: &str) -> Vec<Outgoing> {
        if self.state != NodeState::Leader {
            return Vec::new();
        }
        match self.log.get(index) {
            Ok(Some(entry)) if entry.hash == hash => {}
            Ok(_) => {
                debug!("Ack from {} for unknown entry {}", from.short(), index);
                return Vec::new();
            }
            Err(e) => {
                self.report(e);
                return Vec::new();
            }
        }
        match self.log.add_response(index, from) {
            Ok(Some(entry)) => {
                let responses = entry.responses.len();
                self.emit(ClusterEvent::LogAck { index, from: from.clone(), responses });
                self.maybe_commit(&entry);
            }
            Ok(None) => {}
            Err(e) => self.report(e),
        }
        Vec::new()
    }

    pub(crate) fn on_append_fail(&mut self, from: &NodeId, index: u64, reason: &str, now: u64) -> Vec<Outgoing> {
        if self.state != NodeState::Leader {
            return Vec::new();
        }
        warn!("{} rejected append ({}), replaying after {}", from.short(), reason, index);
        self.obtain(from, index, now)
    }

    pub(crate) fn on_reappend(&mut self, from: &NodeId, follower_last: &StatePointer, now: u64) -> Vec<Outgoing> {
        if self.state != NodeState::Leader {
            return Vec::new();
        }
        let after = follower_last.index.min(self.log.last().index);
        self.obtain(from, after, now)
    }

    /// Replays up to `batch_limit` entries after `after` to one peer.
    fn obtain(&mut self, peer: &NodeId, after: u64, now: u64) -> Vec<Outgoing> {
        let entries = match self.log.entries_after(after, self.settings.batch_limit) {
            Ok(entries) => entries,
            Err(e) => {
                self.report(e);
                return Vec::new();
            }
        };
        if let Some(first) = entries.first() {
            if first.index != after + 1 {
                warn!("Cannot replay to {}: entries after {} were compacted", peer.short(), after);
                return Vec::new();
            }
        }
        append_bodies(&entries).into_iter().map(|body| self.send(peer, body, now)).collect()
    }

    /// Commits `entry` and everything before it once a quorum holds it.
    /// Only entries of the current term are counted.
    pub(crate) fn maybe_commit(&mut self, entry: &LogEntry) {
        if entry.index <= self.log.committed_index() || entry.term != self.term {
            return;
        }
        if self.quorum_reached(&entry.responses) {
            self.commit_through(entry.index);
        }
    }

    pub(crate) fn commit_through(&mut self, index: u64) {
        match self.log.commit_to(index) {
            Ok(entries) => {
                for entry in entries {
                    info!(target: "consensus", "EVENT:COMMIT index={} hash={} node={}", entry.index, entry.hash, self.id.short());
                    self.emit(ClusterEvent::Commit { entry });
                }
            }
            Err(e) => {
                self.report(e);
                return;
            }
        }
        if let Err(e) = self.log.apply_committed(self.applier.as_ref()) {
            self.report(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tally_common::env::Command;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry {
            index,
            term,
            hash: format!("h{index}"),
            content_hash: format!("c{index}"),
            command: Command::new("k", "v"),
            signature: String::new(),
            author: NodeId::from("02aa"),
            created_at: 0,
            responses: BTreeSet::new(),
        }
    }

    #[test]
    fn test_append_bodies_split_by_term() {
        let entries = vec![entry(1, 1), entry(2, 1), entry(3, 2), entry(4, 3), entry(5, 3)];
        let sizes: Vec<usize> = append_bodies(&entries)
            .into_iter()
            .map(|body| match body {
                Body::Append { entries } => entries.len(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![2, 1, 2]);
        assert!(append_bodies(&[]).is_empty());
    }
}
