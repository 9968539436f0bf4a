use std::collections::HashMap;

use tally_common::env::{PeerDigest, PendingEntry, VersionedRecord};

/// Everything a node knows about one member's gossip state.
#[derive(Debug, Clone, Default)]
pub struct PeerGossipState {
    pub max_version: u64,
    /// content hash → (record, version).
    pub records: HashMap<String, (PendingEntry, u64)>,
    pub heartbeat: u64,
    pub last_heartbeat_change: u64,
    pub alive: bool,
}

impl PeerGossipState {
    pub fn new(now: u64) -> Self {
        Self {
            last_heartbeat_change: now,
            alive: true,
            ..Default::default()
        }
    }

    pub fn digest(&self) -> PeerDigest {
        PeerDigest { max_version: self.max_version, heartbeat: self.heartbeat }
    }

    /// Records with a version greater than `version`, oldest first.
    pub fn deltas_after(&self, version: u64) -> Vec<VersionedRecord> {
        let mut deltas: Vec<VersionedRecord> = self
            .records
            .values()
            .filter(|(_, v)| *v > version)
            .map(|(entry, v)| VersionedRecord { version: *v, entry: entry.clone() })
            .collect();
        deltas.sort_by_key(|r| r.version);
        deltas
    }

    /// Adopts a newer liveness counter. Returns true if it moved.
    pub fn observe_heartbeat(&mut self, heartbeat: u64, now: u64) -> bool {
        if heartbeat <= self.heartbeat {
            return false;
        }
        self.heartbeat = heartbeat;
        self.last_heartbeat_change = now;
        self.alive = true;
        true
    }

    /// Flags the peer dead once its counter stalled for `timeout` millis.
    /// Returns true when the flag flipped.
    pub fn check_liveness(&mut self, now: u64, timeout: u64) -> bool {
        let alive = now.saturating_sub(self.last_heartbeat_change) <= timeout;
        let flipped = alive != self.alive;
        self.alive = alive;
        flipped
    }
}
