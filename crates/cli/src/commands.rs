use anyhow::{Context, Result};
use codec::Operation;
use config::Settings;
use ingest::{discover_updates, BulkLoader, BulkOptions, UpdateFile, UpdateOptions, Updater};
use metrics::{Metrics, MetricsEndpoint};
use server::{QueryHandler, QueryServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{BatchOptions, Store};

/// Starts the scrape endpoint unless disabled. Kept alive by the caller.
fn start_metrics(settings: &Settings, metrics: &Arc<Metrics>, enabled: bool) -> Result<Option<MetricsEndpoint>> {
    if !enabled {
        return Ok(None);
    }
    MetricsEndpoint::start(&settings.metrics_addr, Arc::clone(metrics)).map(Some)
}

fn open_writable(settings: &Settings) -> Result<Store> {
    Store::create_with(
        &settings.db_path,
        BatchOptions {
            max_batch_size: settings.max_batch,
            max_batch_delay: settings.max_batch_delay,
        },
    )
}

pub fn load(settings: &Settings, manifest: &Path, metrics_enabled: bool) -> Result<()> {
    let store = open_writable(settings)?;
    let metrics = Arc::new(Metrics::new()?);
    let _endpoint = start_metrics(settings, &metrics, metrics_enabled)?;

    let options = BulkOptions {
        file_concurrency: settings.file_concurrency,
        writer_count: settings.writers,
        batch_size: settings.load_batch,
        queue_depth: settings.queue_depth,
    };
    let loader = BulkLoader::new(&store, options, metrics.as_ref())?;
    let report = loader
        .run(manifest)
        .with_context(|| format!("bulk load from {} failed; rerun after fixing the input", manifest.display()))?;

    println!(
        "loaded {} devices from {} files in {:.2}s ({} empty lines skipped, {} records in store)",
        report.records,
        report.files,
        report.elapsed.as_secs_f64(),
        report.skipped_empty,
        store.len()?
    );
    Ok(())
}

pub fn update(settings: &Settings, files: &[PathBuf], remove: bool, metrics_enabled: bool) -> Result<()> {
    let files: Vec<UpdateFile> = if files.is_empty() {
        discover_updates(&settings.update_dir, &settings.update_ext)?
    } else {
        files.iter().cloned().map(UpdateFile::from_path).collect::<Result<_>>()?
    };
    if files.is_empty() {
        tracing::warn!(dir = %settings.update_dir.display(), ext = %settings.update_ext, "no update files found");
        println!("no update files");
        return Ok(());
    }

    let store = open_writable(settings)?;
    tracing::info!(path = %settings.db_path.display(), records = store.len()?, files = files.len(), "store opened for update");
    let metrics = Arc::new(Metrics::new()?);
    let _endpoint = start_metrics(settings, &metrics, metrics_enabled)?;

    let options = UpdateOptions {
        batch_size: settings.update_batch,
        operation: if remove { Operation::Remove } else { Operation::Add },
    };
    let updater = Updater::new(&store, options, metrics.as_ref())?;
    let report = updater.apply_all(&files)?;

    for file in &report.files {
        println!(
            "campaign {}: {} devices, {} updated, {} up to date ({})",
            file.campaign,
            file.records,
            file.updated,
            file.up_to_date,
            file.path.display()
        );
    }
    println!(
        "{} {} devices across {} files: {} updated, {} up to date",
        options.operation,
        report.records(),
        report.files.len(),
        report.updated(),
        report.up_to_date()
    );
    Ok(())
}

pub fn serve(settings: &Settings, metrics_enabled: bool) -> Result<()> {
    let store = Arc::new(Store::open_read_only(&settings.db_path)?);
    tracing::info!(path = %settings.db_path.display(), records = store.len()?, "store opened");

    let metrics = Arc::new(Metrics::new()?);
    let endpoint = start_metrics(settings, &metrics, metrics_enabled)?;

    let handler = QueryHandler::new(Arc::clone(&store), metrics);
    let server = QueryServer::bind(&settings.listen_addr, handler)?;
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || shutdown.trigger()).context("installing signal handler")?;

    println!("listening on {}", server.local_addr()?);
    server.run()?;

    drop(endpoint);
    drop(store);
    tracing::info!("store closed");
    Ok(())
}

pub fn get(settings: &Settings, device: &str) -> Result<()> {
    let store = Store::open_read_only(&settings.db_path)?;
    match store.get(device.as_bytes())? {
        None => println!("(nil)"),
        Some(raw) => {
            let set = codec::decode(&raw).with_context(|| format!("device {device}: corrupt record"))?;
            let ids: Vec<String> = set.iter().map(|c| c.to_string()).collect();
            println!("{}", ids.join(","));
        }
    }
    Ok(())
}

pub fn stats(settings: &Settings) -> Result<()> {
    let store = Store::open_read_only(&settings.db_path)?;
    let bytes = std::fs::metadata(&settings.db_path)
        .map(|m| m.len())
        .unwrap_or(0);
    println!("path: {}", settings.db_path.display());
    println!("records: {}", store.len()?);
    println!("file_bytes: {bytes}");
    Ok(())
}
