use std::collections::{BTreeMap, HashMap};

use k256::{ProjectivePoint, Scalar};

use tally_common::utils::NodeId;

use super::{
    combinations::CombinationIndex,
    musig::{has_square_y, hash_to_scalar, point_bytes, point_hex, vote_message, x_bytes},
};

/// Material every member derives identically from `(term, nonce, candidate)`.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub term: u64,
    pub nonce: u64,
    pub candidate: NodeId,
    /// Full-membership combined key, hex.
    pub shared_public_key: String,
    pub message: [u8; 32],
    pub challenge: Scalar,
}

impl SessionContext {
    pub fn new(index: &CombinationIndex, term: u64, nonce: u64, candidate: &NodeId) -> Self {
        let message = vote_message(term, nonce, candidate);
        let full = point_bytes(index.full_key());
        let challenge = hash_to_scalar(&[b"tally/challenge".as_slice(), &full, &message]);
        Self {
            term,
            nonce,
            candidate: candidate.clone(),
            shared_public_key: point_hex(index.full_key()),
            message,
            challenge,
        }
    }

    /// Per-member session nonce `k_i = H(term ‖ nonce ‖ P_i ‖ X)`.
    ///
    /// Anyone can compute it, so a single partial signature reveals `x_i`.
    /// The signing key is only fit for elections among mutually trusted
    /// members and must not double as a command or transport key.
    pub fn member_nonce(&self, index: &CombinationIndex, position: usize) -> Scalar {
        hash_to_scalar(&[
            b"tally/nonce".as_slice(),
            &self.term.to_be_bytes(),
            &self.nonce.to_be_bytes(),
            &point_bytes(index.point(position)),
            self.shared_public_key.as_bytes(),
        ])
    }

    /// `s_i = k_i + e·a_i·x_i`.
    pub fn partial_sign(&self, index: &CombinationIndex, position: usize, secret: &Scalar) -> Scalar {
        self.member_nonce(index, position) + self.challenge * index.coefficient(position) * secret
    }

    /// `s_i·G == k_i·G + e·a_i·P_i`.
    pub fn verify_partial(&self, index: &CombinationIndex, position: usize, partial: &Scalar) -> bool {
        let k = self.member_nonce(index, position);
        let lhs = ProjectivePoint::GENERATOR * partial;
        let rhs = ProjectivePoint::GENERATOR * k + *index.point(position) * (self.challenge * index.coefficient(position));
        lhs == rhs
    }

    /// Aggregate nonce of a subset, negated when its y is not a square.
    pub fn aggregate_nonce(&self, index: &CombinationIndex, subset: &[usize]) -> SubsetNonce {
        let k_sum = subset.iter().fold(Scalar::ZERO, |acc, &i| acc + self.member_nonce(index, i));
        let point = ProjectivePoint::GENERATOR * k_sum;
        let negated = !has_square_y(&point);
        let point = if negated { -point } else { point };
        SubsetNonce { r: x_bytes(&point), negated, k_sum }
    }
}

/// Canonical aggregate nonce of one subset.
#[derive(Debug, Clone, Copy)]
pub struct SubsetNonce {
    /// x coordinate of `R`, `None` if the nonces cancelled out.
    pub r: Option<[u8; 32]>,
    pub negated: bool,
    pub k_sum: Scalar,
}

/// One candidacy, on either side of the vote.
#[derive(Debug, Clone)]
pub struct VoteSession {
    pub context: SessionContext,
    /// Combined key → aggregate nonce, for the subsets the candidate is in.
    pub combinations: HashMap<String, SubsetNonce>,
    /// Verified partial signatures by sender.
    pub replies: BTreeMap<NodeId, Scalar>,
}

impl VoteSession {
    /// Candidate side: precomputes the nonce of every subset it belongs to.
    pub fn for_candidate(index: &CombinationIndex, context: SessionContext) -> Self {
        let combinations = match index.position(&context.candidate) {
            Some(position) => index
                .keys_containing(position)
                .map(|(key, subset)| (key.to_string(), context.aggregate_nonce(index, subset)))
                .collect(),
            None => HashMap::new(),
        };
        Self { context, combinations, replies: BTreeMap::new() }
    }

    /// Voter side: only the shared context is needed.
    pub fn for_voter(context: SessionContext) -> Self {
        Self { context, combinations: HashMap::new(), replies: BTreeMap::new() }
    }
}
