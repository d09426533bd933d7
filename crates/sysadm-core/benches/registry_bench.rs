//! Criterion benchmarks for the connection registry.
//!
//! `next_id` runs once per accepted connection, on the same task that handles
//! every other registry mutation, so it must stay cheap as the number of open
//! sessions grows.
//!
//! Run with:
//! ```bash
//! cargo bench --package sysadm-core --bench registry_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sysadm_core::{ConnectionRegistry, Identified, SessionId};

// ── Fixtures ──────────────────────────────────────────────────────────────────

struct BenchSession(SessionId);

impl Identified for BenchSession {
    fn id(&self) -> SessionId {
        self.0
    }
}

fn registry_of(size: u64) -> ConnectionRegistry<BenchSession> {
    let mut registry = ConnectionRegistry::new();
    for raw in 0..size {
        registry
            .register(BenchSession(SessionId::new(raw)))
            .expect("ids are distinct");
    }
    registry
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Benchmarks `next_id` against registries of increasing size.
fn bench_next_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_id");
    for size in [0u64, 10, 1_000, 100_000] {
        let registry = registry_of(size);
        group.bench_with_input(BenchmarkId::new("open_sessions", size), &registry, |b, r| {
            b.iter(|| black_box(r).next_id())
        });
    }
    group.finish();
}

/// Benchmarks one accept/close cycle: allocate an id, register, deregister.
fn bench_accept_close_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("accept_close_cycle");
    for size in [10u64, 1_000] {
        group.bench_function(BenchmarkId::new("open_sessions", size), |b| {
            let mut registry = registry_of(size);
            b.iter(|| {
                let id = registry.next_id();
                registry
                    .register(BenchSession(id))
                    .expect("next_id is always free");
                black_box(registry.deregister(id))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_next_id, bench_accept_close_cycle);
criterion_main!(benches);
