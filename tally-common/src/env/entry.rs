use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    crypto::hash::{digest, GENESIS_HASH},
    error::Result,
    utils::NodeId,
};

/// An application command carried through the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub key: String,
    pub value: String,
}

impl Command {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Canonical bytes hashed into the chain.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A command accepted by gossip but not yet folded into the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Content hash, see [`PendingEntry::content_hash`].
    pub hash: String,
    pub command: Command,
    /// ECDSA signature of `hash` by `author`.
    pub signature: String,
    pub author: NodeId,
    pub created_at: u64,
}

impl PendingEntry {
    /// `H(serialize(command) ‖ author ‖ created_at)`.
    ///
    /// Author and push time are part of the content so that pushing the same
    /// key/value twice yields two distinct commands.
    pub fn content_hash(command: &Command, author: &NodeId, created_at: u64) -> Result<String> {
        let mut bytes = command.serialize()?;
        bytes.extend_from_slice(author.as_str().as_bytes());
        bytes.extend_from_slice(&created_at.to_be_bytes());
        Ok(digest(&bytes))
    }
}

/// One element of the hash-chained replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    /// `H(prev.hash ‖ serialize(command))`.
    pub hash: String,
    /// Content hash of the pending entry this was folded from.
    pub content_hash: String,
    pub command: Command,
    pub signature: String,
    pub author: NodeId,
    pub created_at: u64,
    /// Members that acknowledged the entry. Grows only.
    pub responses: BTreeSet<NodeId>,
}

/// Tail pointer of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePointer {
    pub index: u64,
    pub term: u64,
    pub hash: String,
    pub created_at: u64,
    pub committed_index: u64,
}

impl Default for StatePointer {
    fn default() -> Self {
        Self {
            index: 0,
            term: 0,
            hash: GENESIS_HASH.to_string(),
            created_at: 0,
            committed_index: 0,
        }
    }
}

impl StatePointer {
    pub fn from_entry(entry: &LogEntry, committed_index: u64) -> Self {
        Self {
            index: entry.index,
            term: entry.term,
            hash: entry.hash.clone(),
            created_at: entry.created_at,
            committed_index,
        }
    }
}
