pub mod hash;

pub use hash::{chain_hash, digest, GENESIS_HASH};
