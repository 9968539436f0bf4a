use serde::{Deserialize, Serialize};

/// How many distinct members must agree.
///
/// Unset means crash-fault majority, `⌈n/2⌉ + 1` capped at `n`. An explicit
/// value is clamped to `1..=n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumPolicy {
    pub quorum: Option<usize>,
}

impl QuorumPolicy {
    pub fn fixed(quorum: usize) -> Self {
        Self { quorum: Some(quorum) }
    }

    pub fn size(&self, members: usize) -> usize {
        if members == 0 {
            return 0;
        }
        match self.quorum {
            Some(q) => q.clamp(1, members),
            None => (members.div_ceil(2) + 1).min(members),
        }
    }

    pub fn reached(&self, votes: usize, members: usize) -> bool {
        members > 0 && votes >= self.size(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_quorum() {
        let policy = QuorumPolicy::default();
        assert_eq!(policy.size(1), 1);
        assert_eq!(policy.size(2), 2);
        assert_eq!(policy.size(3), 3);
        assert_eq!(policy.size(4), 3);
        assert_eq!(policy.size(5), 4);
        assert_eq!(policy.size(7), 5);
    }

    #[test]
    fn test_fixed_quorum_is_clamped() {
        assert_eq!(QuorumPolicy::fixed(2).size(5), 2);
        assert_eq!(QuorumPolicy::fixed(9).size(5), 5);
        assert_eq!(QuorumPolicy::fixed(0).size(5), 1);
    }

    #[test]
    fn test_reached() {
        let policy = QuorumPolicy::default();
        assert!(!policy.reached(2, 4));
        assert!(policy.reached(3, 4));
        assert!(!policy.reached(0, 0));
    }
}
