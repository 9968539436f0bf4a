use std::{fmt, str::FromStr};

use k256::Scalar;

use tally_common::{
    auth::parse_public_key,
    error::{Result, TallyError},
    utils::NodeId,
};

use super::{
    combinations::CombinationIndex,
    musig::{parse_scalar, verify_schnorr},
    session::{SessionContext, VoteSession},
};

/// Leadership proof: `"{nonce}:{combinedKey}:{hex(r ‖ s)}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub nonce: u64,
    pub combined_key: String,
    pub r: [u8; 32],
    pub s: Scalar,
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut signature = self.r.to_vec();
        signature.extend_from_slice(&self.s.to_bytes());
        write!(f, "{}:{}:{}", self.nonce, self.combined_key, hex::encode(signature))
    }
}

impl FromStr for Proof {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| TallyError::InvalidProof(why.to_string());

        let mut parts = s.splitn(3, ':');
        let nonce = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| invalid("bad nonce"))?;
        let combined_key = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| invalid("missing key"))?;
        let signature = parts
            .next()
            .and_then(|p| hex::decode(p).ok())
            .filter(|bytes| bytes.len() == 64)
            .ok_or_else(|| invalid("bad signature"))?;

        let mut r = [0u8; 32];
        r.copy_from_slice(&signature[..32]);
        let s = parse_scalar(&signature[32..])?;
        Ok(Self { nonce, combined_key: combined_key.to_string(), r, s })
    }
}

/// Sums the collected partials into a proof for the subset of repliers.
///
/// Expects at least `quorum` replies including the candidate's own.
pub fn aggregate(index: &CombinationIndex, session: &VoteSession) -> Result<Proof> {
    let context = &session.context;
    let candidate = index
        .position(&context.candidate)
        .ok_or_else(|| TallyError::NotMember(context.candidate.to_string()))?;

    let mut others: Vec<usize> = session
        .replies
        .keys()
        .filter_map(|id| index.position(id))
        .filter(|&p| p != candidate)
        .collect();
    others.sort_unstable();
    others.truncate(index.quorum().saturating_sub(1));

    let mut subset = others;
    subset.push(candidate);
    subset.sort_unstable();
    if subset.len() != index.quorum() {
        return Err(TallyError::InvalidProof(format!("{} signers, quorum is {}", subset.len(), index.quorum())));
    }

    let combined_key = index
        .key_for(&subset)
        .ok_or_else(|| TallyError::InvalidProof("no combined key for signer set".to_string()))?
        .to_string();

    let nonce = match session.combinations.get(&combined_key) {
        Some(nonce) => *nonce,
        None => context.aggregate_nonce(index, &subset),
    };
    let r = nonce.r.ok_or_else(|| TallyError::InvalidProof("degenerate nonce".to_string()))?;

    let mut s = subset
        .iter()
        .filter_map(|&p| session.replies.get(&index.members()[p]))
        .fold(Scalar::ZERO, |acc, partial| acc + partial);
    if nonce.negated {
        s -= nonce.k_sum + nonce.k_sum;
    }

    Ok(Proof { nonce: context.nonce, combined_key, r, s })
}

/// Checks that `proof` shows a quorum endorsed `candidate` for `term`.
pub fn verify(index: &CombinationIndex, term: u64, candidate: &NodeId, proof: &Proof) -> Result<()> {
    let subset = index
        .subset(&proof.combined_key)
        .ok_or_else(|| TallyError::InvalidProof("unknown combined key".to_string()))?;
    let position = index
        .position(candidate)
        .ok_or_else(|| TallyError::NotMember(candidate.to_string()))?;
    if !subset.contains(&position) {
        return Err(TallyError::InvalidProof("candidate is not among the signers".to_string()));
    }

    let context = SessionContext::new(index, term, proof.nonce, candidate);
    let expected = context.aggregate_nonce(index, subset);
    if expected.r != Some(proof.r) {
        return Err(TallyError::InvalidProof("nonce does not match session".to_string()));
    }

    let key = parse_public_key(&NodeId::from(proof.combined_key.as_str()))?;
    if !verify_schnorr(&proof.r, &proof.s, &context.challenge, &key) {
        return Err(TallyError::InvalidProof("aggregate signature mismatch".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tally_common::auth::{Authenticator, Secp256k1Authenticator};

    struct Fixture {
        auths: Vec<Secp256k1Authenticator>,
        index: CombinationIndex,
    }

    impl Fixture {
        fn new(n: usize, quorum: usize) -> Self {
            let mut auths: Vec<Secp256k1Authenticator> = (0..n).map(|_| Secp256k1Authenticator::generate()).collect();
            auths.sort_by_key(|a| a.public_key());
            let members: BTreeSet<NodeId> = auths.iter().map(|a| a.public_key()).collect();
            let index = CombinationIndex::build(&members, quorum).unwrap();
            Self { auths, index }
        }

        fn session(&self, candidate: usize, term: u64, signers: &[usize]) -> VoteSession {
            let context = SessionContext::new(&self.index, term, 1_000 + term, &self.auths[candidate].public_key());
            let mut session = VoteSession::for_candidate(&self.index, context);
            for &i in signers {
                let partial = session.context.partial_sign(&self.index, i, &self.auths[i].secret_scalar());
                session.replies.insert(self.auths[i].public_key(), partial);
            }
            session
        }
    }

    #[test]
    fn test_quorum_proof_verifies_everywhere() {
        let fx = Fixture::new(4, 3);
        for signers in [[0, 1, 2], [0, 1, 3], [0, 2, 3]] {
            let session = fx.session(0, 5, &signers);
            let proof = aggregate(&fx.index, &session).unwrap();
            let parsed: Proof = proof.to_string().parse().unwrap();
            assert_eq!(parsed, proof);
            verify(&fx.index, 5, &fx.auths[0].public_key(), &parsed).unwrap();
        }
    }

    #[test]
    fn test_proof_is_bound_to_term_and_candidate() {
        let fx = Fixture::new(4, 3);
        let proof = aggregate(&fx.index, &fx.session(1, 3, &[0, 1, 2])).unwrap();

        assert!(verify(&fx.index, 3, &fx.auths[1].public_key(), &proof).is_ok());
        assert!(verify(&fx.index, 4, &fx.auths[1].public_key(), &proof).is_err());
        assert!(verify(&fx.index, 3, &fx.auths[0].public_key(), &proof).is_err());
    }

    #[test]
    fn test_below_quorum_cannot_produce_proof() {
        let fx = Fixture::new(4, 3);
        let session = fx.session(0, 2, &[0, 1]);
        assert!(aggregate(&fx.index, &session).is_err());

        // Claiming a full subset with only two real partials fails verification.
        let mut padded = session.clone();
        padded.replies.insert(fx.auths[2].public_key(), Scalar::ONE);
        let forged = aggregate(&fx.index, &padded).unwrap();
        assert!(verify(&fx.index, 2, &fx.auths[0].public_key(), &forged).is_err());
    }

    #[test]
    fn test_tampered_proof_is_rejected() {
        let fx = Fixture::new(3, 2);
        let mut proof = aggregate(&fx.index, &fx.session(2, 1, &[0, 2])).unwrap();
        proof.s += Scalar::ONE;
        assert!(verify(&fx.index, 1, &fx.auths[2].public_key(), &proof).is_err());

        assert!("1:02ab".parse::<Proof>().is_err());
        assert!("x:02ab:00".parse::<Proof>().is_err());
    }
}
