//! Benchmark: Cache hit performance

use archetype_bundle::{LoadRequest, LoadingCoordinator, MockBackend};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn cache_hit_perf_benchmark(c: &mut Criterion) {
    let backend = MockBackend::new();
    backend.insert("ui/title", "title", String::from("title screen"));
    let coordinator = LoadingCoordinator::new(backend);

    // Warm the cache and keep the object alive
    let op = coordinator.load(LoadRequest::of::<String>("ui/title", "title"));
    while coordinator.is_running() {
        coordinator.tick();
    }
    let _held = op.asset();

    c.bench_function("cache_hit_load", |b| {
        b.iter(|| {
            let op = coordinator.load(black_box(LoadRequest::of::<String>("ui/title", "title")));
            black_box(op.is_finished())
        })
    });

    c.bench_function("cache_hit_rate", |b| {
        b.iter(|| black_box(coordinator.metrics().cache_hit_rate()))
    });
}

criterion_group!(benches, cache_hit_perf_benchmark);
criterion_main!(benches);
