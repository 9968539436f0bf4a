use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::RwLock,
};

use tally_common::error::Result;

use super::{BatchOp, KvStore, RangeOptions};

/// Volatile store, used when a node runs without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.remove(key);
        Ok(())
    }

    fn range(&self, options: &RangeOptions) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let rows = data
            .range::<str, _>((options.lower(), Bound::Unbounded))
            .take_while(|(key, _)| options.below_upper(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(options.finish(rows))
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        for op in ops {
            match op {
                BatchOp::Put(key, value) => {
                    data.insert(key, value);
                }
                BatchOp::Del(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}
