//! Criterion benchmarks for `PersistentTreeMap`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stemma::{PersistentTreeMap, Value};

fn build_map(size: i64) -> PersistentTreeMap {
    (0..size).map(|i| (Value::from(i), Value::from(i))).collect()
}

fn bench_assoc(c: &mut Criterion) {
    let mut group = c.benchmark_group("treemap_assoc");
    for size in [100i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let map = build_map(size);
            b.iter(|| black_box(map.assoc(Value::from(size + 1), Value::from(0))));
        });
    }
    group.finish();
}

fn bench_val_at(c: &mut Criterion) {
    let mut group = c.benchmark_group("treemap_val_at");
    for size in [100i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let map = build_map(size);
            let key = Value::from(size / 2);
            b.iter(|| black_box(map.val_at(&key)));
        });
    }
    group.finish();
}

fn bench_ordered_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("treemap_seq_walk");
    for size in [1_000i64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let map = build_map(size);
            b.iter(|| {
                let mut count = 0usize;
                let mut current = map.seq();
                while let Some(seq) = current {
                    count += 1;
                    current = seq.next();
                }
                black_box(count)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assoc, bench_val_at, bench_ordered_walk);
criterion_main!(benches);
