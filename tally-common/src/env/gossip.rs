use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entry::PendingEntry;
use crate::utils::NodeId;

/// What a node knows about one peer: highest version and liveness counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDigest {
    pub max_version: u64,
    pub heartbeat: u64,
}

/// Scuttle digest: `peer → highest version known`.
pub type Digest = BTreeMap<NodeId, PeerDigest>;

/// A pending record tagged with the version its owner assigned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub version: u64,
    pub entry: PendingEntry,
}

/// Deltas for a single peer, newer than some version the receiver reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUpdate {
    pub peer: NodeId,
    pub max_version: u64,
    pub heartbeat: u64,
    pub records: Vec<VersionedRecord>,
}
