//! Interpreter benchmark suite for fiberfx.
//!
//! Measures:
//! - Synchronous `map`/`flat_map` chains on one fiber
//! - Fork/join round trips
//! - Zip fan-out under a concurrency bound
//! - Scope close with many finalizers

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use fiberfx::types::{Exit, FiberId, Value};
use fiberfx::{FinalizationStrategy, Fx, LabConfig, LabRuntime, Scope};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn lab() -> LabRuntime {
    LabRuntime::new(LabConfig::new())
}

fn map_chain(length: u64) -> Fx<u64, Infallible> {
    (0..length).fold(Fx::succeed(0), |fx, _| fx.map(|n| n + 1))
}

fn flat_map_chain(length: u64) -> Fx<u64, Infallible> {
    (0..length).fold(Fx::succeed(0), |fx, _| fx.flat_map(|n| Fx::succeed(n + 1)))
}

// =============================================================================
// SYNCHRONOUS CHAINS
// =============================================================================

fn bench_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("chains");

    for &length in &[100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(length));

        let program = map_chain(length);
        group.bench_with_input(BenchmarkId::new("map", length), &program, |b, program| {
            let lab = lab();
            b.iter(|| black_box(lab.run(program.clone())))
        });

        let program = flat_map_chain(length);
        group.bench_with_input(BenchmarkId::new("flat_map", length), &program, |b, program| {
            let lab = lab();
            b.iter(|| black_box(lab.run(program.clone())))
        });
    }

    group.finish();
}

// =============================================================================
// FORK / JOIN
// =============================================================================

fn bench_fork_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("fork_join");

    let single = Fx::<u64, Infallible>::succeed(1)
        .fork()
        .flat_map(|fiber| fiber.join());
    group.bench_function("single", |b| {
        let lab = lab();
        b.iter(|| black_box(lab.run(single.clone())))
    });

    for &width in &[10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(width as u64));
        let fan_out = Fx::zip_all((0..width).map(|i| Fx::<usize, Infallible>::succeed(i)))
            .with_concurrency(16);
        group.bench_with_input(BenchmarkId::new("zip_all", width), &fan_out, |b, program| {
            let lab = lab();
            b.iter(|| black_box(lab.run(program.clone())))
        });
    }

    let sleepers = Fx::zip_all((0..64).map(|ms| Fx::<(), Infallible>::sleep(Duration::from_millis(ms))));
    group.bench_function("zip_all_sleepers", |b| {
        let lab = lab();
        b.iter(|| black_box(lab.run(sleepers.clone())))
    });

    group.finish();
}

// =============================================================================
// FINALIZATION
// =============================================================================

fn bench_scope_close(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope_close");

    for strategy in [
        FinalizationStrategy::Sequential,
        FinalizationStrategy::Concurrent,
        FinalizationStrategy::ConcurrentN(4),
    ] {
        group.bench_with_input(
            BenchmarkId::new("finalizers_100", format!("{strategy:?}")),
            &strategy,
            |b, &strategy| {
                let lab = lab();
                let done: Value = Arc::new(());
                b.iter(|| {
                    let scope = Scope::new(FiberId::NONE, strategy);
                    for _ in 0..100 {
                        let _ = scope.ensuring(|_| Fx::unit());
                    }
                    black_box(lab.run(scope.close(Exit::Success(Arc::clone(&done)))))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_chains, bench_fork_join, bench_scope_close);
criterion_main!(benches);
