use std::{collections::BTreeSet, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use tally_common::{
    crypto::chain_hash,
    env::{Command, LogEntry, PendingEntry, StatePointer},
    error::{Result, TallyError},
    utils::NodeId,
};

use crate::{
    keys::{content_key, entry_key, prefix_end, APPLIED_KEY, ENTRY_PREFIX, STATE_KEY, TERM_KEY},
    state::{Applier, StoreView},
    storage::{BatchOp, KvStore, RangeOptions},
};

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Input to [`ReplicatedLog::save`].
///
/// `index` and `hash` are set when replicating a leader's entry and left
/// empty when the leader folds a pending command into its own log.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub index: Option<u64>,
    pub hash: Option<String>,
    pub term: u64,
    pub content_hash: String,
    pub command: Command,
    pub signature: String,
    pub author: NodeId,
    pub created_at: u64,
    pub responses: BTreeSet<NodeId>,
}

impl EntryDraft {
    pub fn from_pending(pending: &PendingEntry, term: u64) -> Self {
        Self {
            index: None,
            hash: None,
            term,
            content_hash: pending.hash.clone(),
            command: pending.command.clone(),
            signature: pending.signature.clone(),
            author: pending.author.clone(),
            created_at: pending.created_at,
            responses: BTreeSet::new(),
        }
    }

    pub fn replica(entry: &LogEntry) -> Self {
        Self {
            index: Some(entry.index),
            hash: Some(entry.hash.clone()),
            term: entry.term,
            content_hash: entry.content_hash.clone(),
            command: entry.command.clone(),
            signature: entry.signature.clone(),
            author: entry.author.clone(),
            created_at: entry.created_at,
            responses: entry.responses.clone(),
        }
    }
}

/// Hash-chained command log over a [`KvStore`].
///
/// The tail pointer is cached in memory and persisted with every write that
/// moves it.
pub struct ReplicatedLog {
    store: Arc<dyn KvStore>,
    pointer: StatePointer,
}

impl std::fmt::Debug for ReplicatedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedLog").field("pointer", &self.pointer).finish()
    }
}

impl ReplicatedLog {
    pub fn open(store: Arc<dyn KvStore>) -> Result<Self> {
        let pointer = match store.get(STATE_KEY)? {
            Some(bytes) => decode(&bytes)?,
            None => StatePointer::default(),
        };
        if pointer.index > 0 {
            info!("Log restored at index {} (committed {})", pointer.index, pointer.committed_index);
        }
        Ok(Self { store, pointer })
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    pub fn state_view(&self) -> StoreView {
        StoreView::new(self.store.clone())
    }

    pub fn last(&self) -> &StatePointer {
        &self.pointer
    }

    pub fn committed_index(&self) -> u64 {
        self.pointer.committed_index
    }

    pub fn get(&self, index: u64) -> Result<Option<LogEntry>> {
        match self.store.get(&entry_key(index))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Index of the entry folded from the pending command `content_hash`.
    pub fn content_index(&self, content_hash: &str) -> Result<Option<u64>> {
        match self.store.get(&content_key(content_hash))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Appends one entry at `last.index + 1`.
    pub fn save(&mut self, draft: EntryDraft) -> Result<LogEntry> {
        let last_index = self.pointer.index;
        if let Some(index) = draft.index {
            if index <= last_index {
                return Err(TallyError::ChainRewrite { index, last: last_index });
            }
            if index > last_index + 1 {
                return Err(TallyError::ChainGap { index, last: last_index });
            }
        }

        let index = last_index + 1;
        let hash = chain_hash(&self.pointer.hash, &draft.command.serialize()?);
        if let Some(expected) = draft.hash {
            if expected != hash {
                return Err(TallyError::WrongHash { expected, got: hash });
            }
        }

        let entry = LogEntry {
            index,
            term: draft.term,
            hash,
            content_hash: draft.content_hash,
            command: draft.command,
            signature: draft.signature,
            author: draft.author,
            created_at: draft.created_at,
            responses: draft.responses,
        };

        let mut ops = vec![
            BatchOp::Put(entry_key(index), encode(&entry)?),
            BatchOp::Put(content_key(&entry.content_hash), encode(&index)?),
        ];
        let mut pointer = self.pointer.clone();
        if index > pointer.index {
            pointer = StatePointer::from_entry(&entry, pointer.committed_index);
            ops.push(BatchOp::Put(STATE_KEY.to_string(), encode(&pointer)?));
        }
        self.store.batch(ops)?;
        self.pointer = pointer;

        debug!("Saved entry {} (term {}) hash={}", entry.index, entry.term, &entry.hash[..8.min(entry.hash.len())]);
        Ok(entry)
    }

    /// Adds `node` to the responses of entry `index`.
    ///
    /// Returns the updated entry only when the set actually grew.
    pub fn add_response(&mut self, index: u64, node: &NodeId) -> Result<Option<LogEntry>> {
        let mut entry = match self.get(index)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if !entry.responses.insert(node.clone()) {
            return Ok(None);
        }
        self.store.put(&entry_key(index), &encode(&entry)?)?;
        Ok(Some(entry))
    }

    /// Marks every entry up to `index` committed and returns the newly
    /// committed entries in index order.
    pub fn commit_to(&mut self, index: u64) -> Result<Vec<LogEntry>> {
        let target = index.min(self.pointer.index);
        let from = self.pointer.committed_index;
        if target <= from {
            return Ok(Vec::new());
        }

        let mut committed = Vec::with_capacity((target - from) as usize);
        for i in (from + 1)..=target {
            match self.get(i)? {
                Some(entry) => committed.push(entry),
                None => warn!("Entry {} missing while committing", i),
            }
        }

        let mut pointer = self.pointer.clone();
        pointer.committed_index = target;
        self.store.put(STATE_KEY, &encode(&pointer)?)?;
        self.pointer = pointer;
        Ok(committed)
    }

    /// Up to `limit` entries with index greater than `index`.
    pub fn entries_after(&self, index: u64, limit: usize) -> Result<Vec<LogEntry>> {
        let options = RangeOptions {
            gt: Some(entry_key(index)),
            lt: Some(prefix_end(ENTRY_PREFIX)),
            limit: Some(limit),
            ..Default::default()
        };
        self.store.range(&options)?.iter().map(|(_, bytes)| decode(bytes)).collect()
    }

    /// Drops every entry after `index`. Committed entries are never removed.
    pub fn truncate_after(&mut self, index: u64) -> Result<Vec<LogEntry>> {
        let committed = self.pointer.committed_index;
        if index < committed {
            return Err(TallyError::ChainRewrite { index: index + 1, last: committed });
        }
        if index >= self.pointer.index {
            return Ok(Vec::new());
        }

        let removed = self.entries_after(index, usize::MAX)?;
        let mut ops = Vec::with_capacity(removed.len() * 2 + 1);
        for entry in &removed {
            ops.push(BatchOp::Del(entry_key(entry.index)));
            if self.content_index(&entry.content_hash)? == Some(entry.index) {
                ops.push(BatchOp::Del(content_key(&entry.content_hash)));
            }
        }

        let mut pointer = match self.get(index)? {
            Some(entry) => StatePointer::from_entry(&entry, committed),
            None => StatePointer::default(),
        };
        pointer.committed_index = committed;
        ops.push(BatchOp::Put(STATE_KEY.to_string(), encode(&pointer)?));

        self.store.batch(ops)?;
        self.pointer = pointer;
        warn!("Truncated {} uncommitted entries after index {}", removed.len(), index);
        Ok(removed)
    }

    pub fn term(&self) -> Result<u64> {
        match self.store.get(TERM_KEY)? {
            Some(bytes) => decode(&bytes),
            None => Ok(0),
        }
    }

    pub fn persist_term(&self, term: u64) -> Result<()> {
        self.store.put(TERM_KEY, &encode(&term)?)
    }

    pub fn applied_index(&self) -> Result<u64> {
        match self.store.get(APPLIED_KEY)? {
            Some(bytes) => decode(&bytes),
            None => Ok(0),
        }
    }

    /// Feeds committed but not yet applied entries to `applier`.
    pub fn apply_committed(&mut self, applier: &dyn Applier) -> Result<Vec<u64>> {
        let applied = self.applied_index()?;
        let committed = self.pointer.committed_index;
        if committed <= applied {
            return Ok(Vec::new());
        }

        let view = self.state_view();
        let mut indices = Vec::new();
        for entry in self.entries_after(applied, (committed - applied) as usize)? {
            if entry.index > committed {
                break;
            }
            applier.apply(&entry.command, &view)?;
            self.store.put(APPLIED_KEY, &encode(&entry.index)?)?;
            indices.push(entry.index);
        }
        Ok(indices)
    }

    /// Last-write-wins compaction over the applied prefix.
    ///
    /// Walks backward from the last applied entry and deletes every entry
    /// whose command key reappears later. Returns the number of deleted
    /// entries.
    pub fn compact(&mut self) -> Result<usize> {
        let bound = self.applied_index()?.min(self.pointer.committed_index);
        let options = RangeOptions {
            gte: Some(entry_key(1)),
            lte: Some(entry_key(bound)),
            reverse: true,
            ..Default::default()
        };

        let mut seen = BTreeSet::new();
        let mut ops = Vec::new();
        for (key, bytes) in self.store.range(&options)? {
            let entry: LogEntry = decode(&bytes)?;
            if !seen.insert(entry.command.key.clone()) {
                ops.push(BatchOp::Del(key));
            }
        }

        let removed = ops.len();
        if removed > 0 {
            self.store.batch(ops)?;
            info!("Compacted {} superseded entries up to index {}", removed, bound);
        }
        Ok(removed)
    }
}
