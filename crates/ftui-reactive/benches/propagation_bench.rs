//! Benchmarks for reactive propagation.
//!
//! Run with: cargo bench -p ftui-reactive --bench propagation_bench

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ftui_reactive::{Batch, Computed, ListenerRegistry, Observable, set_many};
use std::hint::black_box;

// =============================================================================
// Listener registry
// =============================================================================

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("listeners");

    for count in [1usize, 16, 256] {
        let registry = ListenerRegistry::<u64>::new();
        let handles: Vec<_> = (0..count)
            .map(|_| {
                registry.register(|new, _, _| {
                    black_box(*new);
                })
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("notify", count), &count, |b, _| {
            b.iter(|| registry.notify(black_box(&1), black_box(&0)))
        });
        drop(handles);
    }

    group.bench_function("register_unsubscribe_churn", |b| {
        let registry = ListenerRegistry::<u64>::new();
        b.iter(|| {
            let handle = registry.register(|_, _, _| {});
            handle.unsubscribe();
        })
    });

    group.finish();
}

// =============================================================================
// Writes and recomputation
// =============================================================================

fn bench_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation");

    group.bench_function("set_equal_value", |b| {
        let obs = Observable::new(vec![1u32; 64]);
        let _guard = obs.subscribe(|_, _, _| {});
        let same = vec![1u32; 64];
        b.iter(|| obs.set(black_box(same.clone())))
    });

    group.bench_function("set_chain_depth_8", |b| {
        let source = Observable::new(0u64);
        let mut tail = Computed::map(&source, |v| v + 1).unwrap();
        let mut chain = vec![tail.clone()];
        for _ in 1..8 {
            tail = Computed::map(&tail, |v| v + 1).unwrap();
            chain.push(tail.clone());
        }
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            source.set(n);
            black_box(tail.get().unwrap())
        })
    });

    group.finish();
}

// =============================================================================
// Batches
// =============================================================================

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");

    for width in [3usize, 32] {
        let cells: Vec<_> = (0..width).map(|_| Observable::new(0i64)).collect();
        let sum = Computed::new(cells.clone(), |values, _| {
            values.iter().map(|v| **v).sum::<i64>()
        })
        .unwrap();
        let mut n = 0i64;
        group.bench_with_input(BenchmarkId::new("set_many", width), &width, |b, _| {
            b.iter(|| {
                n += 1;
                set_many(cells.iter().map(|cell| (cell, n)));
                black_box(sum.get().unwrap())
            })
        });
    }

    group.bench_function("stage_same_cell_x16", |b| {
        let obs = Observable::new(0u32);
        b.iter(|| {
            let mut batch = Batch::new();
            for v in 0..16 {
                batch.set(&obs, v);
            }
            black_box(batch.commit())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_registry, bench_propagation, bench_batch);
criterion_main!(benches);
