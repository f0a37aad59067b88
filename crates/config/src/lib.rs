//! # Config - CohortKV Settings
//!
//! Every tunable is read from the environment with a default, so the same
//! binary can be pointed at a scratch store in tests and at the production
//! store in deployment without a config file.
//!
//! ```text
//! COHORTKV_DB_PATH             store file                      (default: "db.redb")
//! COHORTKV_LISTEN_ADDR         query server address            (default: "0.0.0.0:6379")
//! COHORTKV_METRICS_ADDR        metrics scrape address          (default: "127.0.0.1:6060")
//! COHORTKV_FILE_CONCURRENCY    bulk load files read at once    (default: 4)
//! COHORTKV_WRITERS             bulk load writer threads        (default: 4)
//! COHORTKV_LOAD_BATCH          devices per bulk load batch     (default: 1000)
//! COHORTKV_QUEUE_DEPTH         bulk load batches in flight     (default: 3)
//! COHORTKV_UPDATE_BATCH        devices per update transaction  (default: 100000)
//! COHORTKV_UPDATE_DIR          directory of update files       (default: "updates")
//! COHORTKV_UPDATE_EXT          update file extension           (default: "csv")
//! COHORTKV_MAX_BATCH           calls coalesced per commit      (default: 128)
//! COHORTKV_MAX_BATCH_DELAY_MS  wait before taking over a batch (default: 10)
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub listen_addr: String,
    pub metrics_addr: String,
    pub file_concurrency: usize,
    pub writers: usize,
    pub load_batch: usize,
    pub queue_depth: usize,
    pub update_batch: usize,
    pub update_dir: PathBuf,
    pub update_ext: String,
    pub max_batch: usize,
    pub max_batch_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("db.redb"),
            listen_addr: "0.0.0.0:6379".to_string(),
            metrics_addr: "127.0.0.1:6060".to_string(),
            file_concurrency: 4,
            writers: 4,
            load_batch: 1000,
            queue_depth: 3,
            update_batch: 100_000,
            update_dir: PathBuf::from("updates"),
            update_ext: "csv".to_string(),
            max_batch: 128,
            max_batch_delay: Duration::from_millis(10),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value. Unset variables keep their defaults; set but unparsable ones
    /// are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Settings::default();
        let settings = Settings {
            db_path: lookup("COHORTKV_DB_PATH").map(PathBuf::from).unwrap_or(d.db_path),
            listen_addr: lookup("COHORTKV_LISTEN_ADDR").unwrap_or(d.listen_addr),
            metrics_addr: lookup("COHORTKV_METRICS_ADDR").unwrap_or(d.metrics_addr),
            file_concurrency: parsed(&lookup, "COHORTKV_FILE_CONCURRENCY", d.file_concurrency)?,
            writers: parsed(&lookup, "COHORTKV_WRITERS", d.writers)?,
            load_batch: parsed(&lookup, "COHORTKV_LOAD_BATCH", d.load_batch)?,
            queue_depth: parsed(&lookup, "COHORTKV_QUEUE_DEPTH", d.queue_depth)?,
            update_batch: parsed(&lookup, "COHORTKV_UPDATE_BATCH", d.update_batch)?,
            update_dir: lookup("COHORTKV_UPDATE_DIR").map(PathBuf::from).unwrap_or(d.update_dir),
            update_ext: lookup("COHORTKV_UPDATE_EXT").unwrap_or(d.update_ext),
            max_batch: parsed(&lookup, "COHORTKV_MAX_BATCH", d.max_batch)?,
            max_batch_delay: Duration::from_millis(parsed(
                &lookup,
                "COHORTKV_MAX_BATCH_DELAY_MS",
                d.max_batch_delay.as_millis() as u64,
            )?),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects sizes that would stall a pipeline.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("file_concurrency", self.file_concurrency),
            ("writers", self.writers),
            ("load_batch", self.load_batch),
            ("queue_depth", self.queue_depth),
            ("update_batch", self.update_batch),
            ("max_batch", self.max_batch),
        ];
        for (name, value) in sizes {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        Ok(())
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
