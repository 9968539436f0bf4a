//! The per-node consensus state machine.
//!
//! [`Cluster`] is synchronous and clock-free: every entry point takes the
//! current time in millis and returns the packets to send. The runtime owns
//! the transport, the timers and the lock around it.

pub mod append;
pub mod builder;
pub mod core;
pub mod gossip;
pub mod heartbeat;
pub mod peers;
pub mod voting;

pub use builder::ClusterBuilder;
pub use core::{Cluster, ClusterStatus, ProofRecord};
pub use voting::{Eligibility, LogFreshness};
