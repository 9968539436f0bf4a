use sha2::{Digest, Sha256};

/// Hash the chain starts from: the "previous hash" of entry 1.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Computes the SHA-256 digest of the given data and returns it as a hex string.
pub fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Links a serialized command to the previous entry: `H(prev_hash ‖ command)`.
pub fn chain_hash(prev_hash: &str, serialized_command: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(serialized_command);
    hex::encode(hasher.finalize())
}
