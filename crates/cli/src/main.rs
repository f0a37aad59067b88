///! # CLI - CohortKV Command-Line Tool
///!
///! One binary for every stage of the store's life: build it from a manifest,
///! apply incremental updates, serve it, and inspect it.
///!
///! ## Commands
///!
///! ```text
///! cohortkv load <MANIFEST>           Bulk load `campaignID,filePath` lines
///! cohortkv update [FILES...]         Apply `<campaignID>.csv` diff files
///!          [--dir DIR] [--remove]    (default: every file in $COHORTKV_UPDATE_DIR)
///! cohortkv serve                     Serve GET/PING over RESP on $COHORTKV_LISTEN_ADDR
///! cohortkv get <DEVICE>              Print one device's campaigns
///! cohortkv stats                     Print the number of records
///! ```
///!
///! ## Configuration
///!
///! Settings come from `COHORTKV_*` environment variables (see the `config`
///! crate); flags given on the command line win. Logs go to stderr and are
///! filtered by `RUST_LOG` (default `info`); results go to stdout.
///!
///! ## Example
///!
///! ```text
///! $ cohortkv --db devices.redb load manifest.csv
///! loaded 3 devices from 2 files in 0.01s
///! $ cohortkv --db devices.redb get d1
///! 1,2
///! $ redis-cli -p 6379 GET d1
///! 1) (integer) 1
///! 2) (integer) 2
///! ```
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Settings;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "cohortkv", version)]
#[command(about = "Device-to-campaign membership store", long_about = None)]
struct Cli {
    /// Store file [default: $COHORTKV_DB_PATH or db.redb]
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Metrics scrape address [default: $COHORTKV_METRICS_ADDR or 127.0.0.1:6060]
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    /// Do not start the metrics endpoint
    #[arg(long, global = true)]
    no_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the store from a manifest of per-campaign device files
    Load {
        /// File of `campaignID,filePath` lines
        manifest: PathBuf,

        /// Device files read at once
        #[arg(long)]
        file_concurrency: Option<usize>,

        /// Writer threads
        #[arg(long)]
        writers: Option<usize>,

        /// Devices per batch
        #[arg(long)]
        batch: Option<usize>,

        /// Batches buffered between readers and writers
        #[arg(long)]
        queue_depth: Option<usize>,
    },

    /// Add (or remove) devices to campaigns from `<campaignID>.<ext>` files
    Update {
        /// Update files; when omitted every matching file in --dir is applied
        files: Vec<PathBuf>,

        /// Directory scanned for update files
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Extension of update files in --dir
        #[arg(long)]
        ext: Option<String>,

        /// Remove the campaign from the listed devices instead of adding it
        #[arg(long)]
        remove: bool,

        /// Devices per write transaction
        #[arg(long)]
        batch: Option<usize>,
    },

    /// Serve lookups over the Redis protocol until SIGINT/SIGTERM
    Serve {
        /// Listen address [default: $COHORTKV_LISTEN_ADDR or 0.0.0.0:6379]
        #[arg(long)]
        listen: Option<String>,
    },

    /// Print the campaigns of one device
    Get {
        device: String,
    },

    /// Print store statistics
    Stats,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut settings = Settings::from_env()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(addr) = cli.metrics_addr {
        settings.metrics_addr = addr;
    }
    let metrics_enabled = !cli.no_metrics;

    match cli.command {
        Commands::Load {
            manifest,
            file_concurrency,
            writers,
            batch,
            queue_depth,
        } => {
            settings.file_concurrency = file_concurrency.unwrap_or(settings.file_concurrency);
            settings.writers = writers.unwrap_or(settings.writers);
            settings.load_batch = batch.unwrap_or(settings.load_batch);
            settings.queue_depth = queue_depth.unwrap_or(settings.queue_depth);
            settings.validate()?;
            commands::load(&settings, &manifest, metrics_enabled)
        }
        Commands::Update {
            files,
            dir,
            ext,
            remove,
            batch,
        } => {
            if let Some(dir) = dir {
                settings.update_dir = dir;
            }
            if let Some(ext) = ext {
                settings.update_ext = ext;
            }
            settings.update_batch = batch.unwrap_or(settings.update_batch);
            settings.validate()?;
            commands::update(&settings, &files, remove, metrics_enabled)
        }
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                settings.listen_addr = listen;
            }
            commands::serve(&settings, metrics_enabled)
        }
        Commands::Get { device } => commands::get(&settings, &device),
        Commands::Stats => commands::stats(&settings),
    }
}
