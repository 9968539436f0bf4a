//! secp256k1 primitives for MuSig key aggregation and Schnorr signatures.

use k256::{
    elliptic_curve::{ops::Reduce, sec1::ToEncodedPoint, PrimeField},
    FieldBytes, FieldElement, ProjectivePoint, Scalar, U256,
};
use sha2::{Digest, Sha256};

use tally_common::{
    error::{Result, TallyError},
    utils::NodeId,
};

/// SHA-256 of the concatenated parts, reduced modulo the curve order.
pub fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let bytes = FieldBytes::clone_from_slice(&hasher.finalize());
    <Scalar as Reduce<U256>>::reduce_bytes(&bytes)
}

/// Compressed SEC1 bytes.
pub fn point_bytes(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

pub fn point_hex(point: &ProjectivePoint) -> String {
    hex::encode(point_bytes(point))
}

/// Affine x coordinate, `None` for the identity.
pub fn x_bytes(point: &ProjectivePoint) -> Option<[u8; 32]> {
    let encoded = point.to_affine().to_encoded_point(false);
    let x = encoded.x()?;
    let mut out = [0u8; 32];
    out.copy_from_slice(x);
    Some(out)
}

/// Jacobi test: whether the point's y coordinate is a quadratic residue.
pub fn has_square_y(point: &ProjectivePoint) -> bool {
    let encoded = point.to_affine().to_encoded_point(false);
    let Some(y) = encoded.y() else {
        return false;
    };
    match Option::<FieldElement>::from(FieldElement::from_bytes(y)) {
        Some(field) => bool::from(field.sqrt().is_some()),
        None => false,
    }
}

pub fn scalar_hex(scalar: &Scalar) -> String {
    hex::encode(scalar.to_bytes())
}

/// Parses a canonical 32-byte scalar.
pub fn parse_scalar(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != 32 {
        return Err(TallyError::Crypto(format!("scalar must be 32 bytes, got {}", bytes.len())));
    }
    let scalar = Scalar::from_repr(FieldBytes::clone_from_slice(bytes));
    Option::<Scalar>::from(scalar).ok_or_else(|| TallyError::Crypto("scalar out of range".to_string()))
}

pub fn parse_scalar_hex(value: &str) -> Result<Scalar> {
    let bytes = hex::decode(value).map_err(|e| TallyError::Crypto(format!("invalid scalar hex: {e}")))?;
    parse_scalar(&bytes)
}

/// `L = H(P_1 ‖ … ‖ P_n)` over the sorted member keys.
pub fn key_list_hash(points: &[ProjectivePoint]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"tally/musig/keys");
    for point in points {
        hasher.update(point_bytes(point));
    }
    hasher.finalize().into()
}

/// MuSig coefficient `a_i = H(L ‖ i)`.
pub fn coefficient(key_list_hash: &[u8; 32], index: usize) -> Scalar {
    hash_to_scalar(&[key_list_hash.as_slice(), (index as u32).to_be_bytes().as_slice()])
}

/// `Σ a_i·P_i` over the given positions.
pub fn combine(points: &[ProjectivePoint], coefficients: &[Scalar], positions: &[usize]) -> ProjectivePoint {
    positions
        .iter()
        .fold(ProjectivePoint::IDENTITY, |acc, &i| acc + points[i] * coefficients[i])
}

/// Domain-separated vote message for a candidacy.
pub fn vote_message(term: u64, nonce: u64, candidate: &NodeId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"tally/vote");
    hasher.update(nonce.to_be_bytes());
    hasher.update(term.to_be_bytes());
    hasher.update(candidate.as_str().as_bytes());
    hasher.finalize().into()
}

/// Schnorr check `s·G − e·X` has a square y and the x coordinate `r`.
pub fn verify_schnorr(r: &[u8; 32], s: &Scalar, challenge: &Scalar, key: &ProjectivePoint) -> bool {
    let point = ProjectivePoint::GENERATOR * s - *key * challenge;
    if point == ProjectivePoint::IDENTITY || !has_square_y(&point) {
        return false;
    }
    x_bytes(&point).map(|x| x == *r).unwrap_or(false)
}
