pub mod disseminator;
pub mod peer;
pub mod scuttle;

pub use disseminator::{CommittedCache, GossipDisseminator, COMMITTED_CACHE_LIMIT};
pub use peer::PeerGossipState;
