pub mod cluster;
pub mod election;
pub mod event;
pub mod quorum;
pub mod settings;

pub use cluster::{Cluster, ClusterBuilder, ClusterStatus, Eligibility, LogFreshness, ProofRecord};
pub use event::{ClusterEvent, Outgoing};
pub use quorum::QuorumPolicy;
pub use settings::ClusterSettings;
