use tally_common::{
    env::{LogEntry, NodeState, Packet},
    utils::NodeId,
};

/// Observable side effects, drained by the runtime after each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    State { state: NodeState, term: u64, leader: Option<NodeId> },
    /// An entry was written to the local log.
    Log { entry: LogEntry },
    LogAck { index: u64, from: NodeId, responses: usize },
    Commit { entry: LogEntry },
    Error { message: String },
}

/// A packet the caller must deliver.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub to: NodeId,
    pub packet: Packet,
}
