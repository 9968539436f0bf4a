use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a cluster member by the hex encoding of its compressed
/// secp256k1 public key.
///
/// Ordering is the lexicographic order of the hex string; every node sorts
/// the member list the same way, which keeps MuSig coefficients and subset
/// enumeration identical cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(10);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}
