use std::{collections::BTreeMap, sync::Arc};

use tally_common::{
    env::Command,
    error::{Result, TallyError},
};

use crate::{
    keys::{view_key, VIEW_PREFIX},
    storage::{KvStore, RangeOptions},
};

/// Application state that committed commands are materialized into.
pub trait StateView {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn del(&self, key: &str) -> Result<()>;
}

/// Interprets committed commands. Called once per entry, in index order.
pub trait Applier: Send + Sync {
    fn apply(&self, command: &Command, view: &dyn StateView) -> Result<()>;
}

/// Last write wins per key.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyValueApplier;

impl Applier for KeyValueApplier {
    fn apply(&self, command: &Command, view: &dyn StateView) -> Result<()> {
        view.put(&command.key, &command.value)
    }
}

/// [`StateView`] kept in the same store as the log, under `view:`.
#[derive(Clone)]
pub struct StoreView {
    store: Arc<dyn KvStore>,
}

impl StoreView {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Full materialized state.
    pub fn snapshot(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for (key, value) in self.store.range(&RangeOptions::prefix(VIEW_PREFIX))? {
            let key = key.trim_start_matches(VIEW_PREFIX).to_string();
            out.insert(key, decode_value(value)?);
        }
        Ok(out)
    }
}

fn decode_value(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| TallyError::Codec(format!("state value is not utf-8: {e}")))
}

impl StateView for StoreView {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.store.get(&view_key(key))?.map(decode_value).transpose()
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.store.put(&view_key(key), value.as_bytes())
    }

    fn del(&self, key: &str) -> Result<()> {
        self.store.del(&view_key(key))
    }
}
