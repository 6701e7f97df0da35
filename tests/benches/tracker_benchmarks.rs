//! # Signature Tracker Benchmarks
//!
//! Hot paths of ingestion and stats:
//! - merging vote sets into a full cache (evicting on every insert)
//! - per-provider status lookups across a window
//! - folding a window into totals and epoch buckets
//!
//! ```bash
//! cargo bench --package fp-tests --bench tracker_benchmarks
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fp_signature_tracker::domain::{epoch_of, ResolvedWindow, SignatureCache, StatsAccumulator};
use fp_signature_tracker::{BlockStatus, ProviderKey};

const SIGNERS_PER_BLOCK: usize = 60;
const EPOCH_WIDTH: u64 = 360;

fn signer_set(height: u64) -> Vec<ProviderKey> {
    (0..SIGNERS_PER_BLOCK)
        .filter(|i| (height as usize + i) % 7 != 0)
        .map(|i| ProviderKey::new(format!("{i:064x}")))
        .collect()
}

fn filled_cache(capacity: usize) -> SignatureCache {
    let mut cache = SignatureCache::new(capacity);
    for height in 1..=capacity as u64 {
        cache.record_votes(height, signer_set(height));
    }
    cache
}

fn bench_record_votes(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_cache/record_votes");
    for capacity in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("evicting", capacity), &capacity, |b, &capacity| {
            let mut cache = filled_cache(capacity);
            let mut height = capacity as u64;
            b.iter(|| {
                height += 1;
                black_box(cache.record_votes(height, signer_set(height)))
            });
        });
    }
    group.finish();
}

fn bench_status_lookup(c: &mut Criterion) {
    let cache = filled_cache(10_000);
    let provider = ProviderKey::new(format!("{:064x}", 3));

    let mut group = c.benchmark_group("signature_cache/status_of");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("window_1000", |b| {
        b.iter(|| {
            let signed = (9_001..=10_000u64)
                .filter(|&h| cache.status_of(h, &provider) == BlockStatus::Signed)
                .count();
            black_box(signed)
        });
    });
    group.finish();
}

fn bench_accumulator(c: &mut Criterion) {
    let cache = filled_cache(10_000);
    let provider = ProviderKey::new(format!("{:064x}", 5));

    let mut group = c.benchmark_group("stats/accumulate");
    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let window = ResolvedWindow {
                start: 10_001 - size,
                end: 10_000,
            };
            b.iter(|| {
                let mut acc = StatsAccumulator::new(provider.clone(), window);
                for height in window.start..=window.end {
                    acc.add(height, epoch_of(height, EPOCH_WIDTH), cache.status_of(height, &provider));
                }
                black_box(acc.finish())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_record_votes, bench_status_lookup, bench_accumulator);
criterion_main!(benches);
