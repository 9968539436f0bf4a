pub mod disk;
pub mod memory;

use std::ops::Bound;

use tally_common::error::Result;

use crate::keys::prefix_end;

pub use disk::RedbStore;
pub use memory::MemoryStore;

/// Bounds of an ordered scan. Unset bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeOptions {
    pub gt: Option<String>,
    pub gte: Option<String>,
    pub lt: Option<String>,
    pub lte: Option<String>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl RangeOptions {
    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            gte: Some(prefix.to_string()),
            lt: Some(prefix_end(prefix)),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// `gt` wins over `gte` when both are set.
    pub(crate) fn lower(&self) -> Bound<&str> {
        match (&self.gt, &self.gte) {
            (Some(gt), _) => Bound::Excluded(gt.as_str()),
            (None, Some(gte)) => Bound::Included(gte.as_str()),
            (None, None) => Bound::Unbounded,
        }
    }

    pub(crate) fn below_upper(&self, key: &str) -> bool {
        if let Some(lt) = &self.lt {
            if key >= lt.as_str() {
                return false;
            }
        }
        if let Some(lte) = &self.lte {
            if key > lte.as_str() {
                return false;
            }
        }
        true
    }

    /// Applies direction and limit to keys already sorted ascending.
    pub(crate) fn finish(&self, mut rows: Vec<(String, Vec<u8>)>) -> Vec<(String, Vec<u8>)> {
        if self.reverse {
            rows.reverse();
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Del(String),
}

/// Ordered key-value store backing the log.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn del(&self, key: &str) -> Result<()>;
    fn range(&self, options: &RangeOptions) -> Result<Vec<(String, Vec<u8>)>>;

    /// Applies `ops` in order. Backends with transactions apply them atomically.
    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        for op in ops {
            match op {
                BatchOp::Put(key, value) => self.put(&key, &value)?,
                BatchOp::Del(key) => self.del(&key)?,
            }
        }
        Ok(())
    }
}
