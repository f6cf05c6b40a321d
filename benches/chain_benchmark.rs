//! Performance benchmarks for cache chains
//!
//! This benchmark suite measures:
//! - Head-tier hits on a memory + shared-memory chain
//! - Read-through with promotion from the tail tier
//! - Write-through across both tiers
//! - Envelope encode/decode across payload sizes
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use cache_tiers::backend::Backend;
use cache_tiers::{ChainBuilder, DriverConfig, Envelope, TieredCache};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

// ============================================================================
// Benchmark Fixtures
// ============================================================================

fn build_chain(rt: &tokio::runtime::Runtime, namespace: &str) -> TieredCache {
    rt.block_on(async {
        ChainBuilder::new(vec![
            DriverConfig::new("memory"),
            DriverConfig::new("shared-memory").with_option("namespace", namespace),
        ])
        .build()
        .await
        .expect("Failed to build chain")
    })
}

fn payload(size: usize) -> String {
    "x".repeat(size)
}

// ============================================================================
// Chain Benchmarks
// ============================================================================

fn chain_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for size in [100, 1_000, 10_000].iter() {
        // SET writes every tier
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("set", size), size, |b, &size| {
                let cache = build_chain(&rt, &format!("bench-set-{}", size));
                let value = payload(size);

                b.to_async(&rt).iter(|| async {
                    cache
                        .set(black_box("bench_key"), value.as_str(), None)
                        .await
                        .expect("Failed to set")
                });
            });

        // GET answered by the head tier
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("get_head_hit", size), size, |b, &size| {
                let cache = build_chain(&rt, &format!("bench-hit-{}", size));
                rt.block_on(async {
                    cache
                        .set("bench_key", payload(size).as_str(), None)
                        .await
                        .expect("Failed to set");
                });

                b.to_async(&rt)
                    .iter(|| async { cache.get_string(black_box("bench_key")).await });
            });

        // GET answered by the tail tier, then promoted
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("get_promote", size), size, |b, &size| {
                let cache = build_chain(&rt, &format!("bench-promote-{}", size));
                let tail = cache.next().expect("tail tier");
                rt.block_on(async {
                    tail.set("bench_key", payload(size).as_str(), None)
                        .await
                        .expect("Failed to set");
                });

                b.to_async(&rt).iter(|| async {
                    cache
                        .backend()
                        .delete(&["bench_key".to_string()])
                        .await
                        .expect("Failed to evict head");
                    cache.get_string(black_box("bench_key")).await
                });
            });
    }

    // Miss on every tier
    group.bench_function("get_miss", |b| {
        let cache = build_chain(&rt, "bench-miss");

        b.to_async(&rt)
            .iter(|| async { cache.get_string(black_box("nonexistent_key")).await });
    });

    // Tail-only counter
    group.bench_function("incr", |b| {
        let cache = build_chain(&rt, "bench-incr");

        b.to_async(&rt)
            .iter(|| async { cache.incr(black_box("counter")).await });
    });

    group.finish();
}

// ============================================================================
// Envelope Benchmarks
// ============================================================================

fn envelope_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    for size in [100, 1_000, 10_000].iter() {
        let envelope = Envelope::wrap(payload(*size).as_str(), None).expect("Failed to wrap");
        let encoded = envelope.encode().expect("Failed to encode");

        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("encode", size), &envelope, |b, envelope| {
                b.iter(|| black_box(envelope).encode());
            });

        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
                b.iter(|| Envelope::decode(black_box(encoded)));
            });
    }

    group.finish();
}

// ============================================================================
// Benchmark Registration
// ============================================================================

criterion_group!(benches, chain_benchmarks, envelope_benchmarks);
criterion_main!(benches);
