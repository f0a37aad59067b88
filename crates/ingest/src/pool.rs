/// Free list of line batches, keyed by batch capacity.
///
/// A `PooledBatch` goes back to the pool when dropped, wherever that happens,
/// so a batch handed through a channel to a writer is recycled once the
/// writer is done with it.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::lines::LineBatch;

/// Idle batches kept per capacity; extras are freed.
pub const DEFAULT_MAX_IDLE: usize = 8;

#[derive(Clone)]
pub struct BufferPool {
    free: Arc<Mutex<HashMap<usize, Vec<LineBatch>>>>,
    max_idle: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let free = self.free.lock();
        let idle: usize = free.values().map(Vec::len).sum();
        f.debug_struct("BufferPool")
            .field("size_classes", &free.len())
            .field("idle", &idle)
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

impl BufferPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(HashMap::new())),
            max_idle,
        }
    }

    /// Takes an empty batch of `capacity` lines, reusing an idle one if
    /// available.
    pub fn acquire(&self, capacity: usize) -> PooledBatch {
        let reused = self.free.lock().get_mut(&capacity).and_then(Vec::pop);
        PooledBatch {
            batch: Some(reused.unwrap_or_else(|| LineBatch::with_capacity(capacity))),
            pool: self.clone(),
        }
    }

    /// Idle batches currently held for `capacity`.
    pub fn idle(&self, capacity: usize) -> usize {
        self.free.lock().get(&capacity).map_or(0, Vec::len)
    }

    fn release(&self, mut batch: LineBatch) {
        batch.clear();
        let mut free = self.free.lock();
        let class = free.entry(batch.capacity()).or_default();
        if class.len() < self.max_idle {
            class.push(batch);
        }
    }
}

/// A batch on loan from a [`BufferPool`].
pub struct PooledBatch {
    batch: Option<LineBatch>,
    pool: BufferPool,
}

impl Deref for PooledBatch {
    type Target = LineBatch;

    fn deref(&self) -> &LineBatch {
        // Only `None` after drop has run.
        self.batch.as_ref().unwrap_or_else(|| unreachable!("batch taken"))
    }
}

impl DerefMut for PooledBatch {
    fn deref_mut(&mut self) -> &mut LineBatch {
        self.batch.as_mut().unwrap_or_else(|| unreachable!("batch taken"))
    }
}

impl Drop for PooledBatch {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.pool.release(batch);
        }
    }
}

impl std::fmt::Debug for PooledBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBatch")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
