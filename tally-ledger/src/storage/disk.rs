use std::{fmt, ops::Bound, path::Path};

use redb::{Database, ReadableTable, TableDefinition};
use tally_common::error::{Result, TallyError};

use super::{BatchOp, KvStore, RangeOptions};

const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

fn storage_err(e: impl fmt::Display) -> TallyError {
    TallyError::Storage(e.to_string())
}

/// Durable store on a single redb file.
pub struct RedbStore {
    db: Database,
}

impl fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbStore").field("db", &"Redb").finish()
    }
}

impl RedbStore {
    /// Opens (or creates) `<data_dir>/log.redb`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let path = data_dir.as_ref().join("log.redb");
        let db = Database::create(path).map_err(storage_err)?;

        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            let _table = write_txn.open_table(KV_TABLE).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(KV_TABLE).map_err(storage_err)?;
        let value = table.get(key).map_err(storage_err)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.batch(vec![BatchOp::Put(key.to_string(), value.to_vec())])
    }

    fn del(&self, key: &str) -> Result<()> {
        self.batch(vec![BatchOp::Del(key.to_string())])
    }

    fn range(&self, options: &RangeOptions) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(KV_TABLE).map_err(storage_err)?;

        let mut rows = Vec::new();
        let lower: (Bound<&str>, Bound<&str>) = (options.lower(), Bound::Unbounded);
        for item in table.range::<&str>(lower).map_err(storage_err)? {
            let (key, value) = item.map_err(storage_err)?;
            if !options.below_upper(key.value()) {
                break;
            }
            rows.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(options.finish(rows))
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(KV_TABLE).map_err(storage_err)?;
            for op in &ops {
                match op {
                    BatchOp::Put(key, value) => {
                        table.insert(key.as_str(), value.as_slice()).map_err(storage_err)?;
                    }
                    BatchOp::Del(key) => {
                        table.remove(key.as_str()).map_err(storage_err)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract::check_store;

    #[test]
    fn test_redb_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path()).unwrap();
        check_store(&store);
    }

    #[test]
    fn test_redb_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RedbStore::open(dir.path()).unwrap();
            store.put("state", b"persisted").unwrap();
        }
        let store = RedbStore::open(dir.path()).unwrap();
        assert_eq!(store.get("state").unwrap(), Some(b"persisted".to_vec()));
    }
}
