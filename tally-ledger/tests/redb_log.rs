use std::sync::Arc;

use tally_common::{
    crypto::chain_hash,
    env::{Command, PendingEntry},
    utils::NodeId,
};
use tally_ledger::{EntryDraft, KeyValueApplier, KvStore, RedbStore, ReplicatedLog, StateView};

fn pending(key: &str, value: &str, at: u64) -> PendingEntry {
    let command = Command::new(key, value);
    let author = NodeId::from("02aa");
    let hash = PendingEntry::content_hash(&command, &author, at).unwrap();
    PendingEntry { hash, command, signature: String::new(), author, created_at: at }
}

#[test]
fn test_log_restores_tail_and_state_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let tail_hash = {
        let store: Arc<dyn KvStore> = Arc::new(RedbStore::open(dir.path()).unwrap());
        let mut log = ReplicatedLog::open(store).unwrap();
        log.save(EntryDraft::from_pending(&pending("k1", "v1", 1), 1)).unwrap();
        let second = log.save(EntryDraft::from_pending(&pending("k2", "v2", 2), 1)).unwrap();
        log.commit_to(2).unwrap();
        log.apply_committed(&KeyValueApplier).unwrap();
        log.persist_term(1).unwrap();
        second.hash
    };

    let store: Arc<dyn KvStore> = Arc::new(RedbStore::open(dir.path()).unwrap());
    let mut log = ReplicatedLog::open(store).unwrap();
    assert_eq!(log.last().index, 2);
    assert_eq!(log.last().committed_index, 2);
    assert_eq!(log.last().hash, tail_hash);
    assert_eq!(log.term().unwrap(), 1);
    assert_eq!(log.applied_index().unwrap(), 2);
    assert_eq!(log.state_view().get("k2").unwrap().as_deref(), Some("v2"));

    let third = log.save(EntryDraft::from_pending(&pending("k3", "v3", 3), 2)).unwrap();
    assert_eq!(third.index, 3);
    assert_eq!(third.hash, chain_hash(&tail_hash, &third.command.serialize().unwrap()));
}

#[test]
fn test_replica_follows_leader_chain() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KvStore> = Arc::new(RedbStore::open(dir.path()).unwrap());
    let mut follower = ReplicatedLog::open(store).unwrap();

    let mut leader = ReplicatedLog::open(Arc::new(tally_ledger::MemoryStore::new())).unwrap();
    for i in 1..=3u64 {
        leader.save(EntryDraft::from_pending(&pending("k", &i.to_string(), i), 1)).unwrap();
    }

    for entry in leader.entries_after(0, 10).unwrap() {
        follower.save(EntryDraft::replica(&entry)).unwrap();
    }
    assert_eq!(follower.last().hash, leader.last().hash);
    assert_eq!(follower.content_index(&leader.get(2).unwrap().unwrap().content_hash).unwrap(), Some(2));
}
