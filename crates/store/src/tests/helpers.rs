use crate::{BatchOptions, Store};
use std::time::Duration;
use tempfile::TempDir;

pub fn temp_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create(dir.path().join("db.redb")).unwrap();
    (dir, store)
}

pub fn temp_store_with(max_batch_size: usize, delay_ms: u64) -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create_with(
        dir.path().join("db.redb"),
        BatchOptions {
            max_batch_size,
            max_batch_delay: Duration::from_millis(delay_ms),
        },
    )
    .unwrap();
    (dir, store)
}
