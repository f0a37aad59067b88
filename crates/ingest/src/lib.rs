//! # Ingest - CohortKV Write Pipelines
//!
//! Two pipelines feed the store:
//!
//! ```text
//! bulk load (cold start)
//!
//!   manifest ──> file readers (≤ N, semaphore) ──> bounded queue ──> M writers
//!                  1000-line batches                                 Store::batch
//!
//! incremental update (one file at a time)
//!
//!   update file ──> scanner ──> depth-1 handoff ──> writer
//!                   100k-line batches                 Store::update, one txn per batch
//! ```
//!
//! Both merge each device through [`codec::apply`], skip empty device lines
//! and never hold a write transaction while reading a file. Batches move
//! between threads by value; line buffers are recycled through a
//! [`BufferPool`].
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                            |
//! |---------------|----------------------------------------------------|
//! | [`manifest`]  | Manifest lines, update file names, directory scan |
//! | [`lines`]     | `DeviceReader` and flat `LineBatch` buffers        |
//! | [`pool`]      | `BufferPool` free list, `PooledBatch` guard        |
//! | [`semaphore`] | Counting semaphore for file admission              |
//! | [`bulk`]      | `BulkLoader`                                       |
//! | [`update`]    | `Updater`                                          |
mod bulk;
mod lines;
mod manifest;
mod pool;
mod semaphore;
mod update;

use anyhow::{Context, Result};
use codec::{CampaignId, Operation};
use store::RecordWriter;

pub use bulk::{BulkLoader, BulkOptions, LoadReport};
pub use lines::{DeviceReader, LineBatch};
pub use manifest::{discover_updates, parse_manifest, parse_manifest_line, ManifestEntry, UpdateFile};
pub use pool::{BufferPool, PooledBatch};
pub use semaphore::{Permit, Semaphore};
pub use update::{FileReport, UpdateOptions, UpdateReport, Updater};

/// Outcome of merging one batch into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Devices in the batch.
    pub total: usize,
    /// Devices whose record was written.
    pub updated: usize,
    /// Devices whose record already reflected the operation.
    pub up_to_date: usize,
    /// Empty device ids ignored.
    pub skipped_empty: usize,
}

/// Applies `op` for `campaign` to every device of `devices` inside an open
/// write transaction. Each changed record is written exactly once.
///
/// # Errors
///
/// Fails on the first corrupt stored record or storage error; the caller's
/// transaction is then aborted as a whole.
pub(crate) fn apply_devices(
    w: &mut RecordWriter<'_>,
    op: Operation,
    campaign: CampaignId,
    devices: &LineBatch,
) -> Result<BatchReport> {
    let mut report = BatchReport {
        total: devices.len(),
        ..BatchReport::default()
    };

    for device in devices.iter() {
        if device.is_empty() {
            report.skipped_empty += 1;
            continue;
        }
        let previous = w.get(device)?;
        let applied = codec::apply(op, campaign, previous.as_deref()).with_context(|| {
            format!(
                "device {}: stored record is corrupt",
                String::from_utf8_lossy(device)
            )
        })?;

        if !applied.changed {
            report.up_to_date += 1;
            continue;
        }
        if let Some(value) = applied.value {
            w.put(device, &value)?;
            report.updated += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests;
