pub mod entry;
pub mod gossip;
pub mod packet;

pub use entry::{Command, LogEntry, PendingEntry, StatePointer};
pub use gossip::{Digest, PeerDigest, PeerUpdate, VersionedRecord};
pub use packet::{Body, MessageType, NodeState, Packet};
