use std::collections::BTreeMap;

use tracing::{debug, info};

use tally_common::{
    auth::{Authenticator, Secp256k1Authenticator},
    env::{Body, Command, Digest, NodeState, PeerUpdate, PendingEntry},
    error::{Result, TallyError},
    utils::NodeId,
};

use crate::event::Outgoing;

use super::core::Cluster;

/// A pending command is accepted only from its author, with a content hash
/// that recomputes and a valid signature by the author's command key.
pub(crate) fn verify_entry(
    auth: &Secp256k1Authenticator,
    command_keys: &BTreeMap<NodeId, NodeId>,
    owner: &NodeId,
    entry: &PendingEntry,
) -> bool {
    if entry.author != *owner {
        return false;
    }
    let Some(command_key) = command_keys.get(&entry.author) else {
        return false;
    };
    match PendingEntry::content_hash(&entry.command, &entry.author, entry.created_at) {
        Ok(hash) if hash == entry.hash => {}
        _ => return false,
    }
    let Ok(signature) = hex::decode(&entry.signature) else {
        return false;
    };
    auth.verify_with_key(entry.hash.as_bytes(), &signature, command_key).unwrap_or(false)
}

impl Cluster {
    /// Signs a command with the command key and hands it to gossip. Any
    /// member may push; the leader picks it up on its next tick.
    pub fn push_command(&mut self, key: &str, value: &str, now: u64) -> Result<PendingEntry> {
        if self.state == NodeState::Stopped {
            return Err(TallyError::Other("node is stopped".to_string()));
        }
        let command = Command::new(key, value);
        let hash = PendingEntry::content_hash(&command, &self.id, now)?;
        let signature = hex::encode(self.signer.sign(hash.as_bytes())?);
        let entry = PendingEntry { hash, command, signature, author: self.id.clone(), created_at: now };
        if self.gossip.push(entry.clone()) {
            info!("Queued command {} as {}", key, entry.hash);
        } else {
            debug!("Command {} already queued", entry.hash);
        }
        Ok(entry)
    }

    /// Opens a scuttle round with one random member.
    pub fn gossip_tick(&mut self, now: u64) -> Vec<Outgoing> {
        if self.state == NodeState::Stopped {
            return Vec::new();
        }
        self.gossip.tick(now);
        let Some(peer) = self.gossip.random_peer(&mut self.rng) else {
            return Vec::new();
        };
        if !self.members.contains(&peer) {
            return Vec::new();
        }
        let digest = self.gossip.request();
        vec![self.send(&peer, Body::GossipRequest { digest }, now)]
    }

    pub(crate) fn on_gossip_request(&mut self, from: &NodeId, digest: &Digest, now: u64) -> Vec<Outgoing> {
        let scuttle = self.gossip.handle_request(digest);
        if !scuttle.new_peers.is_empty() {
            debug!("{} knows {} peers we do not", from.short(), scuttle.new_peers.len());
        }
        vec![self.send(from, Body::GossipFirstResponse { digest: scuttle.requests, updates: scuttle.deltas }, now)]
    }

    pub(crate) fn on_gossip_first_response(
        &mut self,
        from: &NodeId,
        requests: &Digest,
        updates: Vec<PeerUpdate>,
        now: u64,
    ) -> Vec<Outgoing> {
        let (auth, keys) = (&self.auth, &self.command_keys);
        let answer =
            self.gossip.handle_first_response(requests, updates, now, |owner, entry| verify_entry(auth, keys, owner, entry));
        if answer.is_empty() {
            return Vec::new();
        }
        vec![self.send(from, Body::GossipSecondResponse { updates: answer }, now)]
    }

    pub(crate) fn on_gossip_second_response(&mut self, updates: Vec<PeerUpdate>, now: u64) -> Vec<Outgoing> {
        let (auth, keys) = (&self.auth, &self.command_keys);
        let merged = self.gossip.apply(updates, now, |owner, entry| verify_entry(auth, keys, owner, entry));
        if merged > 0 {
            debug!("Merged {} gossip records", merged);
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_entry() {
        let member = Secp256k1Authenticator::generate();
        let signer = Secp256k1Authenticator::generate();
        let other = Secp256k1Authenticator::generate();
        let keys = BTreeMap::from([(member.public_key(), signer.public_key())]);

        let command = Command::new("k", "v");
        let hash = PendingEntry::content_hash(&command, &member.public_key(), 7).unwrap();
        let signature = hex::encode(signer.sign(hash.as_bytes()).unwrap());
        let entry = PendingEntry { hash, command, signature, author: member.public_key(), created_at: 7 };

        assert!(verify_entry(&other, &keys, &member.public_key(), &entry));
        assert!(!verify_entry(&other, &keys, &other.public_key(), &entry));
        assert!(!verify_entry(&other, &BTreeMap::new(), &member.public_key(), &entry));

        let mut altered = entry.clone();
        altered.command.value = "w".to_string();
        assert!(!verify_entry(&other, &keys, &member.public_key(), &altered));
    }

    #[test]
    fn test_identity_key_signature_is_not_a_command_signature() {
        let member = Secp256k1Authenticator::generate();
        let signer = Secp256k1Authenticator::generate();
        let keys = BTreeMap::from([(member.public_key(), signer.public_key())]);

        let command = Command::new("k", "v");
        let hash = PendingEntry::content_hash(&command, &member.public_key(), 1).unwrap();
        let signature = hex::encode(member.sign(hash.as_bytes()).unwrap());
        let entry = PendingEntry { hash, command, signature, author: member.public_key(), created_at: 1 };

        assert!(!verify_entry(&signer, &keys, &member.public_key(), &entry));
    }
}
