//! # Store - CohortKV Persistent Store
//!
//! Wraps an embedded [`redb`] database holding a single `devices` table that
//! maps a device identifier to its encoded campaign record.
//!
//! ## Architecture
//!
//! ```text
//! pipelines                               query server
//!   |                                          |
//!   |  update(|w| ...)   batch(|w| ...)        |  get() / snapshot()
//!   v                          |               v
//! ┌────────────────────────────|──────────────────────┐
//! │                 STORE      v                      │
//! │ write.rs  ←──────── batch.rs (group commit)       │
//! │   one write txn per call / per coalesced round    │
//! │                                                   │
//! │ read.rs   point-in-time read transactions         │
//! └───────────────────────────────────────────────────┘
//!                         |
//!                         v
//!                   redb (single writer, MVCC readers)
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | [`lib.rs`]  | `Store`, `ReadOnlyStore`, open modes, `Debug`        |
//! | [`write`]   | `update()` and the `RecordWriter` handed to closures |
//! | [`batch`]   | `batch()`: coalesces concurrent writes into one commit |
//! | [`read`]    | `get()`, `len()`, `Snapshot`                         |
//!
//! ## Concurrency
//!
//! redb admits one write transaction at a time; `begin_write` blocks until
//! the previous one finishes. Readers never block and never see a partially
//! committed transaction.
mod batch;
mod read;
mod write;

use anyhow::{Context, Result};
use redb::{Database, ReadOnlyDatabase, TableDefinition};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use read::Snapshot;
pub use write::RecordWriter;

use batch::Batcher;

/// The single namespace holding device records.
pub(crate) const DEVICES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("devices");

/// Default number of concurrent `batch` calls folded into one commit.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 128;

/// Default time a waiting `batch` caller gives the current leader before
/// trying to commit pending calls itself.
pub const DEFAULT_MAX_BATCH_DELAY: Duration = Duration::from_millis(10);

/// Tuning for [`Store::batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_batch_size: usize,
    pub max_batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_delay: DEFAULT_MAX_BATCH_DELAY,
        }
    }
}

/// Read-write handle. Share it across threads by reference or `Arc`.
pub struct Store {
    pub(crate) db: Database,
    pub(crate) path: PathBuf,
    pub(crate) batcher: Batcher,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("batch", &self.batcher.options())
            .field("pending_batch_calls", &self.batcher.pending())
            .finish()
    }
}

impl Store {
    /// Opens the store at `path`, creating the file and the `devices` table
    /// if they do not exist yet.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with(path, BatchOptions::default())
    }

    /// Like [`Store::create`] with explicit batching options.
    pub fn create_with<P: AsRef<Path>>(path: P, options: BatchOptions) -> Result<Self> {
        anyhow::ensure!(
            options.max_batch_size > 0,
            "max_batch_size must be greater than zero"
        );
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)
            .with_context(|| format!("opening store {}", path.display()))?;

        // Idempotent: opening the table inside a write txn creates it once.
        let txn = db.begin_write()?;
        txn.open_table(DEVICES)?;
        txn.commit()?;

        tracing::debug!(path = %path.display(), "store opened read-write");
        Ok(Self {
            db,
            path,
            batcher: Batcher::new(options),
        })
    }

    /// Opens an existing store for serving. The returned handle has no write
    /// methods and takes a shared lock, so any number of read-only handles
    /// (in this process or others) can be open at once. A read-write handle
    /// still excludes them.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<ReadOnlyStore> {
        let path = path.as_ref().to_path_buf();
        anyhow::ensure!(path.exists(), "store {} does not exist", path.display());
        let db = ReadOnlyDatabase::open(&path)
            .with_context(|| format!("opening store {} read-only", path.display()))?;
        tracing::debug!(path = %path.display(), "store opened read-only");
        Ok(ReadOnlyStore { db, path })
    }

    /// Returns the file backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Handle for serving lookups; only read transactions can be started.
pub struct ReadOnlyStore {
    pub(crate) db: ReadOnlyDatabase,
    pub(crate) path: PathBuf,
}

impl std::fmt::Debug for ReadOnlyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyStore")
            .field("path", &self.path)
            .finish()
    }
}

impl ReadOnlyStore {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests;
