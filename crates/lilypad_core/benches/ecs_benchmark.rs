//! # ECS Benchmark
//!
//! Entity churn and query iteration over heap-backed component blocks.
//!
//! Run with: `cargo bench --package lilypad_core --bench ecs_benchmark`

// Benchmarks don't need docs
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lilypad_core::memory::{AnonymousPages, NullTracer};
use lilypad_core::{DiagnosticHeap, EntityId, HeapConfig, Position, Velocity, World};

/// Entity slots per benchmark world.
const ENTITY_COUNT: usize = 10_000;

fn heap() -> Arc<DiagnosticHeap> {
    Arc::new(
        DiagnosticHeap::with_collaborators(
            &HeapConfig::default(),
            Box::new(AnonymousPages),
            Box::new(NullTracer),
        )
        .expect("heap creation"),
    )
}

/// Benchmark: add entities with two components, then drop the world.
fn bench_add_entities(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_entities");

    for count in [1_000, ENTITY_COUNT] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let heap = heap();
            b.iter(|| {
                let mut world = World::new(Arc::clone(&heap), count);
                let pos = world.register_type::<Position>().unwrap();
                let vel = world.register_type::<Velocity>().unwrap();
                for _ in 0..count {
                    black_box(world.add(pos.mask() | vel).unwrap());
                }
                world.alive_count()
            });
        });
    }

    group.finish();
}

/// Benchmark: position integration through a query.
fn bench_query_update(c: &mut Criterion) {
    let mut world = World::new(heap(), ENTITY_COUNT);
    let pos = world.register_type::<Position>().unwrap();
    let vel = world.register_type::<Velocity>().unwrap();
    for i in 0..ENTITY_COUNT {
        let id = world.add(pos.mask() | vel).unwrap();
        #[allow(clippy::cast_precision_loss)]
        let f = i as f32;
        *world.component_mut::<Velocity>(id, vel).unwrap().unwrap() = Velocity::new(f, 0.5, 0.25);
    }
    let movers: Vec<EntityId> = world.query(pos.mask() | vel).collect();

    c.bench_function("query_collect_10K", |b| {
        b.iter(|| black_box(world.query(pos.mask() | vel).count()));
    });

    c.bench_function("tick_10K_positions", |b| {
        b.iter(|| {
            for &id in &movers {
                let v = *world.component::<Velocity>(id, vel).unwrap().unwrap();
                let p = world.component_mut::<Position>(id, pos).unwrap().unwrap();
                p.x += v.x * 0.016;
                p.y += v.y * 0.016;
                p.z += v.z * 0.016;
            }
            black_box(world.alive_count())
        });
    });
}

/// Benchmark: remove and re-add a slice of the world each iteration.
fn bench_churn_cycle(c: &mut Criterion) {
    let mut world = World::new(heap(), ENTITY_COUNT);
    let pos = world.register_type::<Position>().unwrap();
    let mut ids: Vec<EntityId> = (0..ENTITY_COUNT / 2)
        .map(|_| world.add(pos.mask()).unwrap())
        .collect();

    c.bench_function("remove_add_cycle_1K", |b| {
        b.iter(|| {
            for id in ids.drain(..1_000) {
                world.remove(id).unwrap();
            }
            for _ in 0..1_000 {
                ids.push(world.add(pos.mask()).unwrap());
            }
            black_box(world.alive_count())
        });
    });
}

criterion_group!(benches, bench_add_entities, bench_query_update, bench_churn_cycle);
criterion_main!(benches);
