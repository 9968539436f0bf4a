use serde::{Deserialize, Serialize};

use tally_common::error::{Result, TallyError};

use crate::quorum::QuorumPolicy;

/// Timing and sizing knobs of one cluster node. All durations in millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub heartbeat_ms: u64,
    pub election_min_ms: u64,
    pub election_max_ms: u64,
    pub gossip_interval_ms: u64,
    pub proof_expiration_ms: u64,
    pub batch_limit: usize,
    pub liveness_timeout_ms: u64,
    pub quorum: QuorumPolicy,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            heartbeat_ms: 200,
            election_min_ms: 1_000,
            election_max_ms: 2_000,
            gossip_interval_ms: 200,
            proof_expiration_ms: 60_000,
            batch_limit: 100,
            liveness_timeout_ms: 5_000,
            quorum: QuorumPolicy::default(),
        }
    }
}

impl ClusterSettings {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_ms == 0 || self.gossip_interval_ms == 0 {
            return Err(TallyError::Config("intervals must be non-zero".to_string()));
        }
        if self.heartbeat_ms >= self.election_min_ms {
            return Err(TallyError::Config(format!(
                "heartbeat {}ms must be below the election timeout {}ms",
                self.heartbeat_ms, self.election_min_ms
            )));
        }
        if self.election_min_ms > self.election_max_ms {
            return Err(TallyError::Config("election_min_ms exceeds election_max_ms".to_string()));
        }
        if self.proof_expiration_ms <= self.election_max_ms {
            return Err(TallyError::Config("proof expiration must outlast an election".to_string()));
        }
        if self.batch_limit == 0 {
            return Err(TallyError::Config("batch_limit must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ClusterSettings::default().validate().unwrap();
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_election() {
        let settings = ClusterSettings { heartbeat_ms: 1_500, ..Default::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: ClusterSettings = serde_json::from_str(r#"{"heartbeat_ms": 50, "quorum": {"quorum": 2}}"#).unwrap();
        assert_eq!(settings.heartbeat_ms, 50);
        assert_eq!(settings.batch_limit, 100);
        assert_eq!(settings.quorum, QuorumPolicy::fixed(2));
    }
}
