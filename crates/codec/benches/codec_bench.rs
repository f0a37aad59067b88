use codec::{apply, decode, encode, CampaignSet, Operation};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const N_CAMPAIGNS: u32 = 64;

fn build_record() -> Vec<u8> {
    let set: CampaignSet = (0..N_CAMPAIGNS).map(|c| c * 31).collect();
    encode(&set)
}

fn decode_benchmark(c: &mut Criterion) {
    let record = build_record();
    c.bench_function("decode_64_campaigns", |b| {
        b.iter(|| decode(black_box(&record)).unwrap());
    });
}

fn apply_add_hit_benchmark(c: &mut Criterion) {
    let record = build_record();
    c.bench_function("apply_add_already_member", |b| {
        b.iter(|| apply(Operation::Add, black_box(31), Some(black_box(&record))).unwrap());
    });
}

fn apply_add_miss_benchmark(c: &mut Criterion) {
    let record = build_record();
    c.bench_function("apply_add_new_campaign", |b| {
        b.iter(|| apply(Operation::Add, black_box(7), Some(black_box(&record))).unwrap());
    });
}

fn apply_absent_benchmark(c: &mut Criterion) {
    c.bench_function("apply_add_first_campaign", |b| {
        b.iter(|| apply(Operation::Add, black_box(7), None).unwrap());
    });
}

criterion_group!(
    benches,
    decode_benchmark,
    apply_add_hit_benchmark,
    apply_add_miss_benchmark,
    apply_absent_benchmark
);
criterion_main!(benches);
