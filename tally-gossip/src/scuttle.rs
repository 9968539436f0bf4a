//! Scuttlebutt reconciliation: pure functions comparing digests with local
//! peer state.

use std::collections::BTreeMap;

use tally_common::{
    env::{Digest, PeerUpdate},
    utils::NodeId,
};

use crate::peer::PeerGossipState;

pub type PeerMap = BTreeMap<NodeId, PeerGossipState>;

pub fn digest(peers: &PeerMap) -> Digest {
    peers.iter().map(|(id, state)| (id.clone(), state.digest())).collect()
}

/// Deltas of `peer` newer than `after`, with its current counters.
pub fn update_for(peer: &NodeId, state: &PeerGossipState, after: u64) -> PeerUpdate {
    PeerUpdate {
        peer: peer.clone(),
        max_version: state.max_version,
        heartbeat: state.heartbeat,
        records: state.deltas_after(after),
    }
}

/// Result of comparing a remote digest with local state.
#[derive(Debug, Default)]
pub struct Scuttle {
    /// What the remote side is missing.
    pub deltas: Vec<PeerUpdate>,
    /// What we are missing, as our own version per peer.
    pub requests: Digest,
    /// Peers we know that the remote digest did not mention.
    pub new_peers: Vec<NodeId>,
}

pub fn scuttle(peers: &PeerMap, remote: &Digest) -> Scuttle {
    let mut out = Scuttle::default();

    for (peer, theirs) in remote {
        match peers.get(peer) {
            Some(local) => {
                if local.max_version > theirs.max_version || local.heartbeat > theirs.heartbeat {
                    out.deltas.push(update_for(peer, local, theirs.max_version));
                }
                if local.max_version < theirs.max_version {
                    out.requests.insert(peer.clone(), local.digest());
                }
            }
            // Membership changes go through consensus, never through gossip.
            None => {}
        }
    }

    for (peer, local) in peers {
        if !remote.contains_key(peer) {
            out.new_peers.push(peer.clone());
            out.deltas.push(update_for(peer, local, 0));
        }
    }

    out
}

/// Deltas answering `requests`, the remote's version per peer.
pub fn answer(peers: &PeerMap, requests: &Digest) -> Vec<PeerUpdate> {
    requests
        .iter()
        .filter_map(|(peer, theirs)| {
            let local = peers.get(peer)?;
            (local.max_version > theirs.max_version || local.heartbeat > theirs.heartbeat)
                .then(|| update_for(peer, local, theirs.max_version))
        })
        .collect()
}
