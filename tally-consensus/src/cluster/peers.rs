use tracing::info;

use tally_common::{
    env::NodeState,
    error::{Result, TallyError},
    utils::NodeId,
};

use crate::election::CombinationIndex;

use super::{builder::check_command_key, core::Cluster};

impl Cluster {
    pub fn members(&self) -> impl Iterator<Item = &NodeId> {
        self.members.iter()
    }

    pub fn is_member(&self, id: &NodeId) -> bool {
        self.members.contains(id)
    }

    /// Adds a member whose commands verify against `command_key`. Returns
    /// `false` if it was already known.
    pub fn join(&mut self, id: NodeId, command_key: NodeId, now: u64) -> Result<bool> {
        if self.members.contains(&id) {
            return Ok(false);
        }
        tally_common::auth::parse_public_key(&id)?;
        let mut members = self.members.clone();
        members.insert(id.clone());
        check_command_key(&members, &id, &command_key)?;
        if self.command_keys.values().any(|k| *k == command_key || *k == id) {
            return Err(TallyError::Config(format!("keys of {} clash with an existing command key", id.short())));
        }
        self.reconfigure(members, now)?;
        self.command_keys.insert(id.clone(), command_key);
        self.gossip.add_peer(id.clone(), now);
        info!("Member {} joined, {} members", id.short(), self.members.len());
        Ok(true)
    }

    /// Removes a member. The local node cannot leave its own cluster.
    pub fn leave(&mut self, id: &NodeId, now: u64) -> Result<bool> {
        if *id == self.id {
            return Err(TallyError::Config("cannot remove the local node".to_string()));
        }
        if !self.members.contains(id) {
            return Ok(false);
        }
        let mut members = self.members.clone();
        members.remove(id);
        self.reconfigure(members, now)?;
        self.command_keys.remove(id);
        self.gossip.remove_peer(id);
        info!("Member {} left, {} members", id.short(), self.members.len());
        Ok(true)
    }

    /// Proofs and sessions are bound to the member set, so any election
    /// state is dropped when it changes.
    fn reconfigure(&mut self, members: std::collections::BTreeSet<NodeId>, now: u64) -> Result<()> {
        let quorum = self.settings.quorum.size(members.len());
        self.index = CombinationIndex::build(&members, quorum)?;
        self.members = members;
        if self.state != NodeState::Stopped {
            self.become_follower(self.term, None, now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tally_common::auth::{Authenticator, Secp256k1Authenticator};

    use crate::ClusterBuilder;

    #[test]
    fn test_join_records_command_key_and_leave_drops_it() {
        let mut node = ClusterBuilder::new(Secp256k1Authenticator::generate()).build(0).unwrap();
        let peer = Secp256k1Authenticator::generate().public_key();
        let peer_signer = Secp256k1Authenticator::generate().public_key();

        assert!(node.join(peer.clone(), peer_signer.clone(), 0).unwrap());
        assert!(!node.join(peer.clone(), peer_signer.clone(), 0).unwrap());
        assert_eq!(node.command_keys.get(&peer), Some(&peer_signer));

        assert!(node.leave(&peer, 0).unwrap());
        assert!(!node.command_keys.contains_key(&peer));
        assert!(!node.gossip().peers().contains_key(&peer));
    }

    #[test]
    fn test_join_rejects_reused_keys() {
        let mut node = ClusterBuilder::new(Secp256k1Authenticator::generate()).build(0).unwrap();
        let peer = Secp256k1Authenticator::generate().public_key();

        assert!(node.join(peer.clone(), peer.clone(), 0).is_err());
        assert!(node.join(peer.clone(), node.command_key(), 0).is_err());
        assert!(node.join(node.command_key(), peer.clone(), 0).is_err());
        assert!(!node.is_member(&peer));
    }
}
