use std::collections::{BTreeSet, HashMap};

use k256::{ProjectivePoint, Scalar};
use tracing::debug;

use tally_common::{
    auth::parse_public_key,
    error::{Result, TallyError},
    utils::NodeId,
};

use super::musig::{coefficient, combine, key_list_hash, point_hex};

/// Combined key of every quorum-sized member subset.
///
/// Members are kept in `NodeId` order; subsets are ascending position lists.
/// Coefficients are taken over the full membership, so one partial signature
/// from a member counts towards every subset it belongs to.
#[derive(Debug, Clone)]
pub struct CombinationIndex {
    members: Vec<NodeId>,
    points: Vec<ProjectivePoint>,
    coefficients: Vec<Scalar>,
    full_key: ProjectivePoint,
    quorum: usize,
    by_key: HashMap<String, Vec<usize>>,
    by_subset: HashMap<Vec<usize>, String>,
}

impl CombinationIndex {
    pub fn build(members: &BTreeSet<NodeId>, quorum: usize) -> Result<Self> {
        if members.is_empty() {
            return Err(TallyError::Config("membership is empty".to_string()));
        }
        if quorum == 0 || quorum > members.len() {
            return Err(TallyError::Config(format!("quorum {} out of range for {} members", quorum, members.len())));
        }

        let members: Vec<NodeId> = members.iter().cloned().collect();
        let points = members.iter().map(parse_public_key).collect::<Result<Vec<_>>>()?;
        let l = key_list_hash(&points);
        let coefficients: Vec<Scalar> = (0..points.len()).map(|i| coefficient(&l, i)).collect();
        let all: Vec<usize> = (0..points.len()).collect();
        let full_key = combine(&points, &coefficients, &all);

        let mut by_key = HashMap::new();
        let mut by_subset = HashMap::new();
        for subset in subsets(points.len(), quorum) {
            let key = point_hex(&combine(&points, &coefficients, &subset));
            by_key.insert(key.clone(), subset.clone());
            by_subset.insert(subset, key);
        }
        debug!("Built {} combined keys for {} members (quorum {})", by_key.len(), members.len(), quorum);

        Ok(Self { members, points, coefficients, full_key, quorum, by_key, by_subset })
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.members.binary_search(id).ok()
    }

    pub fn point(&self, position: usize) -> &ProjectivePoint {
        &self.points[position]
    }

    pub fn coefficient(&self, position: usize) -> &Scalar {
        &self.coefficients[position]
    }

    /// Combined key of the whole membership.
    pub fn full_key(&self) -> &ProjectivePoint {
        &self.full_key
    }

    pub fn combined_key(&self, subset: &[usize]) -> ProjectivePoint {
        combine(&self.points, &self.coefficients, subset)
    }

    pub fn subset(&self, combined_key: &str) -> Option<&[usize]> {
        self.by_key.get(combined_key).map(Vec::as_slice)
    }

    pub fn key_for(&self, subset: &[usize]) -> Option<&str> {
        self.by_subset.get(subset).map(String::as_str)
    }

    /// Combined keys whose subset includes `position`.
    pub fn keys_containing(&self, position: usize) -> impl Iterator<Item = (&str, &[usize])> {
        self.by_key
            .iter()
            .filter(move |(_, subset)| subset.contains(&position))
            .map(|(key, subset)| (key.as_str(), subset.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// All ascending `k`-combinations of `0..n`.
pub fn subsets(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        let mut i = k;
        while i > 0 && current[i - 1] == n - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            return out;
        }
        current[i - 1] += 1;
        for j in i..k {
            current[j] = current[j - 1] + 1;
        }
    }
}
