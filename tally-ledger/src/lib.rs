pub mod keys;
pub mod log;
pub mod state;
pub mod storage;

pub use log::{EntryDraft, ReplicatedLog};
pub use state::{Applier, KeyValueApplier, StateView, StoreView};
pub use storage::{KvStore, MemoryStore, RangeOptions, RedbStore};
