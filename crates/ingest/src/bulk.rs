/// Bulk load: builds the store from a manifest of per-campaign device files.
///
/// # Threads
///
/// 1. The calling thread walks the manifest and spawns one reader per file,
///    waiting on a [`Semaphore`] so at most `file_concurrency` files are open.
/// 2. Each reader fills pooled `batch_size`-line batches and sends them over
///    a bounded queue of `queue_depth` slots; a full queue blocks the reader.
/// 3. `writer_count` writers receive batches and merge them through
///    [`Store::batch`], which folds concurrent batches into shared commits.
/// 4. Join in two phases: every reader first, which closes the queue, then
///    every writer once it has drained it.
///
/// The first error stops the run: readers stop at their next batch and
/// writers exit, which in turn fails any send still blocked on the queue.
/// Nothing is resumable; a failed load is rerun from scratch.
use anyhow::{anyhow, Context, Result};
use codec::{CampaignId, Operation};
use crossbeam_channel::{Receiver, Sender};
use metrics::MetricsSink;
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use store::Store;

use crate::lines::DeviceReader;
use crate::manifest::{parse_manifest, ManifestEntry};
use crate::pool::{BufferPool, PooledBatch};
use crate::semaphore::Semaphore;
use crate::apply_devices;

/// Sizing of the bulk load pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOptions {
    /// Device files read concurrently.
    pub file_concurrency: usize,
    /// Writer threads committing batches.
    pub writer_count: usize,
    /// Devices per batch.
    pub batch_size: usize,
    /// Batches buffered between readers and writers.
    pub queue_depth: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            file_concurrency: 4,
            writer_count: 4,
            batch_size: 1000,
            queue_depth: 3,
        }
    }
}

/// Summary of a finished load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    /// Device lines committed.
    pub records: u64,
    pub skipped_empty: u64,
    pub elapsed: Duration,
}

struct LoadBatch {
    campaign: CampaignId,
    devices: PooledBatch,
}

/// Shared between every thread of one run.
#[derive(Default)]
struct RunState {
    aborted: AtomicBool,
    records: AtomicU64,
    skipped_empty: AtomicU64,
    first_error: Mutex<Option<anyhow::Error>>,
}

impl RunState {
    fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Keeps the first error and tells every thread to stop.
    fn fail(&self, e: anyhow::Error) {
        tracing::error!(error = %format_args!("{e:#}"), "bulk load failed");
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(e);
        }
        self.aborted.store(true, Ordering::Release);
    }
}

pub struct BulkLoader<'a> {
    store: &'a Store,
    options: BulkOptions,
    metrics: &'a dyn MetricsSink,
    pool: BufferPool,
}

impl<'a> BulkLoader<'a> {
    pub fn new(store: &'a Store, options: BulkOptions, metrics: &'a dyn MetricsSink) -> Result<Self> {
        anyhow::ensure!(options.file_concurrency > 0, "file_concurrency must be greater than zero");
        anyhow::ensure!(options.writer_count > 0, "writer_count must be greater than zero");
        anyhow::ensure!(options.batch_size > 0, "batch_size must be greater than zero");
        anyhow::ensure!(options.queue_depth > 0, "queue_depth must be greater than zero");
        Ok(Self {
            store,
            options,
            metrics,
            pool: BufferPool::new(options.queue_depth + options.file_concurrency + options.writer_count),
        })
    }

    /// Parses `manifest` and loads every file it lists.
    pub fn run<P: AsRef<Path>>(&self, manifest: P) -> Result<LoadReport> {
        let entries = parse_manifest(manifest)?;
        self.load(&entries)
    }

    /// Loads every entry and blocks until all batches are committed.
    pub fn load(&self, entries: &[ManifestEntry]) -> Result<LoadReport> {
        let started = Instant::now();
        let state = RunState::default();
        let limiter = Semaphore::new(self.options.file_concurrency);
        let (tx, rx) = crossbeam_channel::bounded::<LoadBatch>(self.options.queue_depth);

        tracing::info!(
            files = entries.len(),
            file_concurrency = self.options.file_concurrency,
            writers = self.options.writer_count,
            batch_size = self.options.batch_size,
            "bulk load started"
        );

        thread::scope(|s| {
            let writers: Vec<_> = (0..self.options.writer_count)
                .map(|_| {
                    let rx = rx.clone();
                    let state = &state;
                    s.spawn(move || self.write_batches(rx, state))
                })
                .collect();
            drop(rx);

            let mut readers = Vec::with_capacity(entries.len());
            for entry in entries {
                let permit = limiter.acquire();
                if state.aborted() {
                    break;
                }
                let tx = tx.clone();
                let state = &state;
                readers.push(s.spawn(move || {
                    let _permit = permit;
                    if let Err(e) = self.read_file(entry, &tx, state) {
                        state.fail(e);
                    }
                }));
            }
            drop(tx);

            // Phase 1: readers. The last one drops its sender, closing the queue.
            for reader in readers {
                if reader.join().is_err() {
                    state.fail(anyhow!("file reader thread panicked"));
                }
            }
            // Phase 2: writers drain what is left.
            for writer in writers {
                if writer.join().is_err() {
                    state.fail(anyhow!("writer thread panicked"));
                }
            }
        });

        if let Some(e) = state.first_error.into_inner() {
            return Err(e);
        }

        let report = LoadReport {
            files: entries.len(),
            records: state.records.into_inner(),
            skipped_empty: state.skipped_empty.into_inner(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            files = report.files,
            records = report.records,
            skipped_empty = report.skipped_empty,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "bulk load finished"
        );
        Ok(report)
    }

    /// Streams one device file into batches on the queue.
    fn read_file(&self, entry: &ManifestEntry, tx: &Sender<LoadBatch>, state: &RunState) -> Result<()> {
        let started = Instant::now();
        let campaign = entry.campaign;
        let file = File::open(&entry.path).with_context(|| {
            format!("campaign {campaign}: opening {}", entry.path.display())
        })?;
        tracing::info!(campaign, path = %entry.path.display(), "processing file");

        let mut reader = DeviceReader::new(BufReader::new(file));
        let mut batch = self.pool.acquire(self.options.batch_size);
        let mut devices = 0u64;

        while let Some(device) = reader
            .next_device()
            .with_context(|| format!("campaign {campaign}: reading {}", entry.path.display()))?
        {
            batch.push(device);
            devices += 1;
            if batch.is_full() {
                let full = std::mem::replace(&mut batch, self.pool.acquire(self.options.batch_size));
                if !submit(tx, campaign, full, state) {
                    return Ok(());
                }
            }
        }
        if !batch.is_empty() && !submit(tx, campaign, batch, state) {
            return Ok(());
        }

        let elapsed = started.elapsed();
        state.skipped_empty.fetch_add(reader.skipped_empty(), Ordering::Relaxed);
        self.metrics.add_processing_time(elapsed);
        tracing::info!(
            campaign,
            devices,
            skipped_empty = reader.skipped_empty(),
            elapsed_ms = elapsed.as_millis() as u64,
            "file queued"
        );
        Ok(())
    }

    /// Writer loop: commits batches until the queue closes or the run fails.
    fn write_batches(&self, rx: Receiver<LoadBatch>, state: &RunState) {
        for LoadBatch { campaign, devices } in rx.iter() {
            if state.aborted() {
                return;
            }
            let count = devices.len() as u64;
            let outcome = self.store.batch(move |w| {
                apply_devices(w, Operation::Add, campaign, &devices).map(|_| ())
            });
            match outcome {
                Ok(()) => {
                    state.records.fetch_add(count, Ordering::Relaxed);
                    self.metrics.add_records(count);
                }
                Err(e) => {
                    state.fail(e.context(format!("campaign {campaign}: writing batch")));
                    return;
                }
            }
        }
    }
}

/// Hands a batch to the writers. Returns `false` if the run is stopping.
fn submit(tx: &Sender<LoadBatch>, campaign: CampaignId, devices: PooledBatch, state: &RunState) -> bool {
    if state.aborted() {
        return false;
    }
    tx.send(LoadBatch { campaign, devices }).is_ok()
}
