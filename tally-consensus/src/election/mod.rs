//! Threshold leader election: MuSig key aggregation over every quorum-sized
//! subset, partial Schnorr signatures and the resulting leadership proof.

pub mod combinations;
pub mod musig;
pub mod proof;
pub mod session;

pub use combinations::CombinationIndex;
pub use proof::Proof;
pub use session::{SessionContext, VoteSession};
