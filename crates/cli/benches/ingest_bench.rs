use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use codec::Operation;
use ingest::{LineBatch, UpdateOptions, Updater};
use metrics::NoopMetrics;
use store::Store;
use tempfile::tempdir;

const N_DEVICES: usize = 10_000;

fn build_batch() -> LineBatch {
    let mut batch = LineBatch::with_capacity(N_DEVICES);
    for i in 0..N_DEVICES {
        batch.push(format!("device-{i:08}").as_bytes());
    }
    batch
}

fn update_batch_new_devices(c: &mut Criterion) {
    c.bench_function("update_batch_add_new_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let store = Store::create(dir.path().join("bench.redb")).unwrap();
                (dir, store, build_batch())
            },
            |(_dir, store, batch)| {
                let updater = Updater::new(&store, UpdateOptions::default(), &NoopMetrics).unwrap();
                updater.apply_batch(1, &batch).unwrap();
            },
            BatchSize::LargeInput,
        );
    });
}

fn update_batch_up_to_date(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = Store::create(dir.path().join("bench.redb")).unwrap();
    let batch = build_batch();
    let updater = Updater::new(
        &store,
        UpdateOptions {
            batch_size: N_DEVICES,
            operation: Operation::Add,
        },
        &NoopMetrics,
    )
    .unwrap();
    updater.apply_batch(1, &batch).unwrap();

    c.bench_function("update_batch_add_existing_10k", |b| {
        b.iter(|| {
            let report = updater.apply_batch(1, &batch).unwrap();
            assert_eq!(report.updated, 0);
        });
    });
}

criterion_group!(benches, update_batch_new_devices, update_batch_up_to_date);
criterion_main!(benches);
