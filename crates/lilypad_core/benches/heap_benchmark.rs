//! # Diagnostic Heap Benchmark
//!
//! Cost of tracked allocation compared with the bare TLSF pool, with and
//! without stack capture.
//!
//! Run with: `cargo bench --package lilypad_core --bench heap_benchmark`

// Benchmarks don't need docs; the raw pool baseline needs unsafe
#![allow(missing_docs)]
#![allow(unsafe_code)]

use std::collections::VecDeque;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lilypad_core::memory::{AnonymousPages, NativeTracer, NullTracer, StackTracer, Tlsf};
use lilypad_core::{DiagnosticHeap, HeapConfig};

fn heap_with(tracer: Box<dyn StackTracer>) -> DiagnosticHeap {
    DiagnosticHeap::with_collaborators(&HeapConfig::default(), Box::new(AnonymousPages), tracer)
        .expect("heap creation")
}

/// Benchmark: alloc/free pairs of several sizes.
fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free");
    let untraced = heap_with(Box::new(NullTracer));
    let traced = heap_with(Box::new(NativeTracer::default()));

    for size in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("untraced", size), &size, |b, &size| {
            b.iter(|| {
                let block = untraced.alloc(black_box(size), 16).unwrap();
                untraced.free(block);
            });
        });
        group.bench_with_input(BenchmarkId::new("traced", size), &size, |b, &size| {
            b.iter(|| {
                let block = traced.alloc(black_box(size), 16).unwrap();
                traced.free(block);
            });
        });
    }

    group.finish();
}

/// Benchmark: the bare pool, as the lower bound.
fn bench_raw_pool(c: &mut Criterion) {
    let mut region = vec![0u128; 64 * 1024];
    let mut pool = Box::new(Tlsf::new());
    // SAFETY: the region outlives the pool and is used by nothing else.
    let added = unsafe {
        pool.add_pool(
            region.as_mut_ptr().cast::<u8>(),
            region.len() * std::mem::size_of::<u128>(),
        )
    };
    assert!(added);

    c.bench_function("raw_tlsf_alloc_free_256", |b| {
        b.iter(|| {
            let block = pool.alloc(black_box(256), 16).unwrap();
            // SAFETY: the block was just allocated from this pool.
            unsafe { pool.free(block) };
        });
    });
}

/// Benchmark: free the oldest of many outstanding blocks, which sits at the
/// far end of the ledger.
fn bench_ledger_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_oldest_outstanding");

    for outstanding in [10usize, 1_000] {
        let heap = heap_with(Box::new(NullTracer));
        let mut held: VecDeque<_> = (0..outstanding).map(|_| heap.alloc(64, 8).unwrap()).collect();
        group.bench_with_input(BenchmarkId::from_parameter(outstanding), &outstanding, |b, _| {
            b.iter(|| {
                if let Some(oldest) = held.pop_front() {
                    heap.free(oldest);
                }
                held.push_back(heap.alloc(64, 8).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_alloc_free, bench_raw_pool, bench_ledger_depth);
criterion_main!(benches);
