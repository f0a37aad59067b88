/// Write path: `update()` and the `RecordWriter` passed to write closures.
///
/// Every mutation happens inside a single redb write transaction. The
/// closure's result decides the outcome: `Ok` commits, `Err` aborts and
/// nothing it wrote becomes visible.
use anyhow::{Context, Result};
use redb::{ReadableTable, Table};

use crate::{Store, DEVICES};

/// Access to the `devices` table inside an open write transaction.
pub struct RecordWriter<'txn> {
    table: Table<'txn, &'static [u8], &'static [u8]>,
    puts: usize,
}

impl RecordWriter<'_> {
    /// Returns the current value for `key`, including writes made earlier in
    /// the same transaction.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Stores `value` under `key`. Empty keys are rejected.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        anyhow::ensure!(!key.is_empty(), "device id must not be empty");
        self.table.insert(key, value)?;
        self.puts += 1;
        Ok(())
    }

    /// Number of `put` calls made through this writer.
    #[must_use]
    pub fn puts(&self) -> usize {
        self.puts
    }
}

impl Store {
    /// Runs `f` in one write transaction and commits if it returns `Ok`.
    ///
    /// Blocks while another write transaction is open. Callers must finish
    /// any file I/O before calling this so the writer slot is not held
    /// across slow reads.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or any storage error from opening or
    /// committing the transaction. A failed abort is logged and does not
    /// replace the closure's error.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut RecordWriter<'_>) -> Result<T>,
    {
        let txn = self.db.begin_write().context("beginning write transaction")?;
        let outcome = {
            let table = txn.open_table(DEVICES)?;
            let mut writer = RecordWriter { table, puts: 0 };
            f(&mut writer)
        };

        match outcome {
            Ok(value) => {
                txn.commit().context("committing write transaction")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(error = %abort, cause = %e, "aborting write transaction failed");
                }
                Err(e)
            }
        }
    }
}
