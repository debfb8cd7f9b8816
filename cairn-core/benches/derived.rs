//! Benchmark: memoized derived reads and cache hits

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cairn_core::{Cache, FetchError, StateGraph};

fn chain(graph: &StateGraph, depth: usize) -> cairn_core::Derived<u64> {
    let base = graph.define_source("base", Some(1u64));
    let first = base.clone();
    let mut tail = graph.define_derived("d0", move |r| Ok(r.get(&first)? + 1));
    for i in 1..depth {
        let prev = tail.clone();
        tail = graph.define_derived(format!("d{i}"), move |r| Ok(r.get(&prev)? + 1));
    }
    tail
}

fn benchmark_clean_read(c: &mut Criterion) {
    let graph = StateGraph::new();
    let tail = chain(&graph, 32);
    let _ = graph.read(&tail);

    c.bench_function("derived_clean_read", |b| {
        b.iter(|| black_box(graph.read(&tail)))
    });
}

fn benchmark_read_after_set(c: &mut Criterion) {
    let graph = StateGraph::new();
    let base = graph.define_source("base", Some(0u64));
    let base_clone = base.clone();
    let parity = graph.define_derived("parity", move |r| Ok(r.get(&base_clone)? % 2));
    let parity_clone = parity.clone();
    let label = graph.define_derived("label", move |r| {
        Ok(if r.get(&parity_clone)? == 0 { "even" } else { "odd" })
    });
    let mut value = 0u64;

    // `base` stays even, so `parity` recomputes to the same value and
    // `label` is cut off.
    c.bench_function("derived_read_after_set_cutoff", |b| {
        b.iter(|| {
            value += 2;
            graph.set(&base, value);
            black_box(graph.read(&label))
        })
    });
}

fn benchmark_cache_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let cache = Cache::new(|key: String| async move { Ok::<_, FetchError>(key.len()) });
    cache.mutate("/api/mountains", |_| 3);

    c.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.get("/api/mountains")))
    });
}

criterion_group!(
    benches,
    benchmark_clean_read,
    benchmark_read_after_set,
    benchmark_cache_hit
);
criterion_main!(benches);
