pub mod secp256k1;

pub use secp256k1::{parse_public_key, Secp256k1Authenticator};

use crate::{error::Result, utils::NodeId};

/// Signs and verifies on behalf of the local node.
pub trait Authenticator: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    fn verify_with_key(&self, message: &[u8], signature: &[u8], public_key: &NodeId) -> Result<bool>;

    fn public_key(&self) -> NodeId;
}
