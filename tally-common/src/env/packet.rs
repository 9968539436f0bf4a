use std::fmt;

use serde::{Deserialize, Serialize};

use super::{
    entry::{LogEntry, StatePointer},
    gossip::{Digest, PeerUpdate},
};
use crate::{error::Result, utils::NodeId};

/// Role of a node in the current term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Stopped,
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Stopped => "STOPPED",
            NodeState::Follower => "FOLLOWER",
            NodeState::Candidate => "CANDIDATE",
            NodeState::Leader => "LEADER",
        };
        write!(f, "{}", s)
    }
}

/// Wire tag of a packet, derived from its [`Body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Vote,
    Voted,
    Append,
    AppendAck,
    AppendFail,
    ReAppend,
    GossipRequest,
    GossipFirstResponse,
    GossipSecondResponse,
    Ack,
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Vote => "VOTE",
            MessageType::Voted => "VOTED",
            MessageType::Append => "APPEND",
            MessageType::AppendAck => "APPEND_ACK",
            MessageType::AppendFail => "APPEND_FAIL",
            MessageType::ReAppend => "RE_APPEND",
            MessageType::GossipRequest => "GOSSIP_REQUEST",
            MessageType::GossipFirstResponse => "GOSSIP_FIRST_RESPONSE",
            MessageType::GossipSecondResponse => "GOSSIP_SECOND_RESPONSE",
            MessageType::Ack => "ACK",
            MessageType::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Type-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Vote { nonce: Option<u64> },
    /// `None` is the empty reply of a refused vote.
    Voted { signature: Option<String> },
    Append { entries: Vec<LogEntry> },
    AppendAck { index: u64, hash: String },
    AppendFail { index: u64, reason: String },
    ReAppend,
    GossipRequest { digest: Digest },
    GossipFirstResponse { digest: Digest, updates: Vec<PeerUpdate> },
    GossipSecondResponse { updates: Vec<PeerUpdate> },
    Ack,
    Error { message: String },
}

impl Body {
    pub fn message_type(&self) -> MessageType {
        match self {
            Body::Vote { .. } => MessageType::Vote,
            Body::Voted { .. } => MessageType::Voted,
            Body::Append { .. } => MessageType::Append,
            Body::AppendAck { .. } => MessageType::AppendAck,
            Body::AppendFail { .. } => MessageType::AppendFail,
            Body::ReAppend => MessageType::ReAppend,
            Body::GossipRequest { .. } => MessageType::GossipRequest,
            Body::GossipFirstResponse { .. } => MessageType::GossipFirstResponse,
            Body::GossipSecondResponse { .. } => MessageType::GossipSecondResponse,
            Body::Ack => MessageType::Ack,
            Body::Error { .. } => MessageType::Error,
        }
    }
}

/// Transport-agnostic protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub state: NodeState,
    pub term: u64,
    /// Sender.
    pub public_key: NodeId,
    /// Leadership proof, present while the sender is LEADER.
    pub proof: Option<String>,
    pub body: Body,
    /// Sender's tail pointer at send time.
    pub last: StatePointer,
    pub timestamp: u64,
}

impl Packet {
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
