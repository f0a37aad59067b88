/// Read path: `get()`, `len()` and `Snapshot`.
///
/// Each read opens its own redb read transaction, which pins a consistent
/// view of the last committed state. Concurrent readers never block each
/// other and are unaffected by a writer committing meanwhile.
use anyhow::{Context, Result};
use redb::{
    ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableError,
};

use crate::{ReadOnlyStore, Store, DEVICES};

type DeviceTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

/// A point-in-time view of the store.
///
/// Holding a snapshot keeps the pages it references alive, so drop it once
/// the read is done.
pub struct Snapshot {
    txn: ReadTransaction,
}

impl Snapshot {
    fn begin<D: ReadableDatabase>(db: &D) -> Result<Self> {
        let txn = db.begin_read().context("beginning read transaction")?;
        Ok(Self { txn })
    }

    /// Returns the table, or `None` if the store was never initialised.
    fn table(&self) -> Result<Option<DeviceTable>> {
        match self.txn.open_table(DEVICES) {
            Ok(table) => Ok(Some(table)),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Looks up the record stored for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(table) = self.table()? else {
            return Ok(None);
        };
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Number of device records.
    pub fn len(&self) -> Result<u64> {
        match self.table()? {
            Some(table) => Ok(table.len()?),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every `(key, value)` pair in ascending key order.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let Some(table) = self.table()? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for item in table.iter()? {
            let (k, v) = item?;
            out.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(out)
    }
}

impl Store {
    /// Opens a read transaction over the last committed state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::begin(&self.db)
    }

    /// Looks up `key` in a fresh read transaction.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.snapshot()?.get(key)
    }

    /// Number of device records.
    pub fn len(&self) -> Result<u64> {
        self.snapshot()?.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.snapshot()?.is_empty()
    }
}

impl ReadOnlyStore {
    /// Opens a read transaction over the last committed state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::begin(&self.db)
    }

    /// Looks up `key` in a fresh read transaction.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.snapshot()?.get(key)
    }

    /// Number of device records.
    pub fn len(&self) -> Result<u64> {
        self.snapshot()?.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.snapshot()?.is_empty()
    }
}
