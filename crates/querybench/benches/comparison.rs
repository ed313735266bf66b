//! Backend comparison benchmarks.
//!
//! Drives the standard scenarios through criterion. Each criterion batch
//! starts a fresh harness iteration, so iteration-scoped fixtures are rebuilt
//! and local caches cleared exactly as in the `querybench` runner.

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use querybench::config::DEFAULT_SEED;
use querybench::{store, BackendKind, PoolConfig, ScenarioRegistry, Trial};

fn bench_scenarios(c: &mut Criterion, prefix: &str) {
    let store = store::init_global(&PoolConfig::new()).expect("fixture store");
    let registry = ScenarioRegistry::standard();

    for scenario in registry.matching(prefix) {
        let mut group = c.benchmark_group(&scenario.name);
        group.throughput(Throughput::Elements(1));

        for kind in BackendKind::ALL {
            let mut trial =
                Trial::setup(&store, scenario, kind, DEFAULT_SEED).expect("trial setup");
            let mut iteration = 0u64;

            group.bench_function(kind.name(), |b| {
                b.iter_custom(|iters| {
                    let mut state = trial.begin_iteration(iteration).expect("iteration setup");
                    iteration += 1;

                    let start = Instant::now();
                    for _ in 0..iters {
                        black_box(trial.invoke(&mut state).expect("operation"));
                    }
                    start.elapsed()
                });
            });

            trial.teardown().expect("trial teardown");
        }

        group.finish();
    }
}

fn bench_query(c: &mut Criterion) {
    bench_scenarios(c, "query/");
}

fn bench_complex(c: &mut Criterion) {
    bench_scenarios(c, "complex/");
}

fn bench_insert(c: &mut Criterion) {
    bench_scenarios(c, "insert/");
}

fn bench_update(c: &mut Criterion) {
    bench_scenarios(c, "update/");
}

fn bench_delete(c: &mut Criterion) {
    bench_scenarios(c, "delete/");
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(2))
        .sample_size(10);
    targets = bench_query, bench_complex, bench_insert, bench_update, bench_delete
}
criterion_main!(benches);
