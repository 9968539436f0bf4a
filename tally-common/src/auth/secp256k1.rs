use k256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
    ProjectivePoint, PublicKey, Scalar, SecretKey,
};
use rand::rngs::OsRng;

use super::Authenticator;
use crate::{
    error::{Result, TallyError},
    utils::NodeId,
};

/// Node identity: a secp256k1 key pair.
///
/// The same secret signs gossip commands (ECDSA) and produces the node's
/// partial Schnorr signatures during elections.
#[derive(Clone)]
pub struct Secp256k1Authenticator {
    secret: SecretKey,
    public_key: NodeId,
}

impl Secp256k1Authenticator {
    pub fn new(secret: SecretKey) -> Self {
        let public_key = encode_public_key(&secret.public_key());
        Self { secret, public_key }
    }

    pub fn generate() -> Self {
        Self::new(SecretKey::random(&mut OsRng))
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex).map_err(|e| TallyError::Crypto(format!("invalid secret hex: {e}")))?;
        let secret = SecretKey::from_slice(&bytes).map_err(|e| TallyError::Crypto(format!("invalid secret key: {e}")))?;
        Ok(Self::new(secret))
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    /// The private scalar used for partial Schnorr signatures.
    pub fn secret_scalar(&self) -> Scalar {
        *self.secret.to_nonzero_scalar()
    }

    pub fn public_point(&self) -> ProjectivePoint {
        self.secret.public_key().to_projective()
    }
}

impl std::fmt::Debug for Secp256k1Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1Authenticator")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl Authenticator for Secp256k1Authenticator {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(message);
        Ok(signature.to_bytes().to_vec())
    }

    fn verify_with_key(&self, message: &[u8], signature: &[u8], public_key: &NodeId) -> Result<bool> {
        let key_bytes = hex::decode(public_key.as_str())
            .map_err(|e| TallyError::Crypto(format!("invalid public key hex: {e}")))?;
        let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
            .map_err(|e| TallyError::Crypto(format!("invalid public key: {e}")))?;
        let signature = match Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };

        match verifying_key.verify(message, &signature) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    fn public_key(&self) -> NodeId {
        self.public_key.clone()
    }
}

/// Hex of the compressed SEC1 encoding.
pub fn encode_public_key(public_key: &PublicKey) -> NodeId {
    NodeId(hex::encode(public_key.to_encoded_point(true).as_bytes()))
}

/// Decodes a member id back into a curve point.
pub fn parse_public_key(id: &NodeId) -> Result<ProjectivePoint> {
    let bytes = hex::decode(id.as_str()).map_err(|e| TallyError::Crypto(format!("invalid public key hex: {e}")))?;
    let public_key =
        PublicKey::from_sec1_bytes(&bytes).map_err(|e| TallyError::Crypto(format!("invalid public key: {e}")))?;
    Ok(public_key.to_projective())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secp256k1_signing_and_verification() {
        let auth = Secp256k1Authenticator::generate();

        let message = b"hello world";
        let signature = auth.sign(message).expect("Signing failed");
        assert_eq!(signature.len(), 64);

        let valid = auth.verify_with_key(message, &signature, &auth.public_key()).expect("Verification failed");
        assert!(valid, "Signature should be valid");

        let invalid = auth
            .verify_with_key(b"wrong message", &signature, &auth.public_key())
            .expect("Verification failed");
        assert!(!invalid, "Signature should be invalid for wrong message");
    }

    #[test]
    fn test_signature_from_other_key_is_rejected() {
        let alice = Secp256k1Authenticator::generate();
        let bob = Secp256k1Authenticator::generate();

        let signature = alice.sign(b"payload").unwrap();
        assert!(!bob.verify_with_key(b"payload", &signature, &bob.public_key()).unwrap());
    }

    #[test]
    fn test_hex_round_trip_keeps_identity() {
        let auth = Secp256k1Authenticator::generate();
        let restored = Secp256k1Authenticator::from_hex(&auth.secret_hex()).unwrap();
        assert_eq!(auth.public_key(), restored.public_key());
        assert_eq!(auth.public_key().as_str().len(), 66);
    }

    #[test]
    fn test_parse_public_key_matches_point() {
        let auth = Secp256k1Authenticator::generate();
        let point = parse_public_key(&auth.public_key()).unwrap();
        assert_eq!(point, auth.public_point());
        assert!(parse_public_key(&NodeId::from("zz")).is_err());
    }
}
