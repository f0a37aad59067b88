/// Incremental update: applies per-campaign add/remove lists to a populated
/// store without rebuilding it.
///
/// Files are processed one after another. Within a file, a scanner (the
/// calling thread) fills a batch while a writer thread commits the previous
/// one; the handoff holds a single batch, so batches reach the store in the
/// order they were read. Each batch is one write transaction.
use anyhow::{anyhow, Context, Result};
use codec::{CampaignId, Operation};
use crossbeam_channel::Sender;
use metrics::MetricsSink;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use store::Store;

use crate::lines::{DeviceReader, LineBatch};
use crate::manifest::UpdateFile;
use crate::pool::{BufferPool, PooledBatch};
use crate::{apply_devices, BatchReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Devices per write transaction.
    pub batch_size: usize,
    /// What every line of an update file means.
    pub operation: Operation,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            operation: Operation::Add,
        }
    }
}

/// Outcome of one update file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub campaign: CampaignId,
    pub path: PathBuf,
    pub records: u64,
    pub updated: u64,
    pub up_to_date: u64,
    pub skipped_empty: u64,
    pub batches: usize,
    pub elapsed: Duration,
}

impl FileReport {
    fn new(file: &UpdateFile) -> Self {
        Self {
            campaign: file.campaign,
            path: file.path.clone(),
            records: 0,
            updated: 0,
            up_to_date: 0,
            skipped_empty: 0,
            batches: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn add(&mut self, batch: &BatchReport) {
        self.records += batch.total as u64;
        self.updated += batch.updated as u64;
        self.up_to_date += batch.up_to_date as u64;
        self.skipped_empty += batch.skipped_empty as u64;
        self.batches += 1;
    }
}

/// Outcome of a set of update files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub files: Vec<FileReport>,
}

impl UpdateReport {
    pub fn records(&self) -> u64 {
        self.files.iter().map(|f| f.records).sum()
    }

    pub fn updated(&self) -> u64 {
        self.files.iter().map(|f| f.updated).sum()
    }

    pub fn up_to_date(&self) -> u64 {
        self.files.iter().map(|f| f.up_to_date).sum()
    }
}

pub struct Updater<'a> {
    store: &'a Store,
    options: UpdateOptions,
    metrics: &'a dyn MetricsSink,
    /// Shared by every file of this updater.
    pool: BufferPool,
}

impl<'a> Updater<'a> {
    pub fn new(store: &'a Store, options: UpdateOptions, metrics: &'a dyn MetricsSink) -> Result<Self> {
        anyhow::ensure!(options.batch_size > 0, "batch_size must be greater than zero");
        Ok(Self {
            store,
            options,
            metrics,
            // one batch being filled, one in the handoff, one being written
            pool: BufferPool::new(3),
        })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Applies `files` in order, stopping at the first failure.
    pub fn apply_all(&self, files: &[UpdateFile]) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        for file in files {
            report.files.push(self.apply_file(file)?);
        }
        tracing::info!(
            files = report.files.len(),
            records = report.records(),
            updated = report.updated(),
            up_to_date = report.up_to_date(),
            "updates applied"
        );
        Ok(report)
    }

    /// Applies one update file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, a stored record is corrupt, or a
    /// commit fails. Batches committed before the failure stay committed.
    pub fn apply_file(&self, file: &UpdateFile) -> Result<FileReport> {
        let started = Instant::now();
        let campaign = file.campaign;
        let handle = File::open(&file.path)
            .with_context(|| format!("campaign {campaign}: opening {}", file.path.display()))?;
        tracing::info!(campaign, path = %file.path.display(), op = %self.options.operation, "processing update file");

        let mut reader = DeviceReader::new(BufReader::new(handle));
        let (tx, rx) = crossbeam_channel::bounded::<PooledBatch>(1);

        let mut report = thread::scope(|s| -> Result<FileReport> {
            let writer = s.spawn(move || -> Result<FileReport> {
                let mut report = FileReport::new(file);
                for batch in rx.iter() {
                    let applied = self.apply_batch(campaign, &batch).with_context(|| {
                        format!(
                            "campaign {campaign}: applying batch {} of {}",
                            report.batches + 1,
                            file.path.display()
                        )
                    })?;
                    tracing::info!(
                        campaign,
                        total = applied.total,
                        updated = applied.updated,
                        up_to_date = applied.up_to_date,
                        "batch applied"
                    );
                    report.add(&applied);
                }
                Ok(report)
            });

            let scanned = self.scan(&mut reader, &tx, file);
            drop(tx);

            let written = writer
                .join()
                .map_err(|_| anyhow!("update writer thread panicked"))?;
            // A writer failure also cuts the scan short, so report it first.
            let report = written?;
            scanned?;
            Ok(report)
        })?;

        report.skipped_empty += reader.skipped_empty();
        report.elapsed = started.elapsed();
        self.metrics.add_records(report.records);
        self.metrics.add_processing_time(report.elapsed);
        tracing::info!(
            campaign,
            records = report.records,
            updated = report.updated,
            up_to_date = report.up_to_date,
            skipped_empty = report.skipped_empty,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "update file done"
        );
        Ok(report)
    }

    /// Merges one batch for `campaign` in a single write transaction.
    pub fn apply_batch(&self, campaign: CampaignId, devices: &LineBatch) -> Result<BatchReport> {
        let op = self.options.operation;
        self.store.update(|w| apply_devices(w, op, campaign, devices))
    }

    /// Reads the file into batches. Stops quietly if the writer has gone
    /// away; the writer's own result explains why.
    fn scan<R: BufRead>(
        &self,
        reader: &mut DeviceReader<R>,
        tx: &Sender<PooledBatch>,
        file: &UpdateFile,
    ) -> Result<()> {
        let size = self.options.batch_size;
        let mut batch = self.pool.acquire(size);
        while let Some(device) = reader
            .next_device()
            .with_context(|| format!("campaign {}: reading {}", file.campaign, file.path.display()))?
        {
            batch.push(device);
            if batch.is_full() {
                let full = std::mem::replace(&mut batch, self.pool.acquire(size));
                if tx.send(full).is_err() {
                    return Ok(());
                }
            }
        }
        if !batch.is_empty() {
            let _ = tx.send(batch);
        }
        Ok(())
    }
}
