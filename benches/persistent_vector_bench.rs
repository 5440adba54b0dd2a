//! Criterion benchmarks for `PersistentVector`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stemma::{PersistentVector, Value};

fn build_vector(size: i64) -> PersistentVector {
    (0..size).map(Value::from).collect()
}

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_push");
    for size in [100i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let vector = build_vector(size);
            b.iter(|| black_box(vector.push(Value::from(0))));
        });
    }
    group.finish();
}

fn bench_nth(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_nth");
    for size in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let vector = build_vector(i64::try_from(size).unwrap());
            b.iter(|| black_box(vector.nth(size / 2)));
        });
    }
    group.finish();
}

fn bench_seq_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_seq_walk");
    for size in [1_000i64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let vector = build_vector(size);
            b.iter(|| {
                let mut count = 0usize;
                let mut current = vector.seq();
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

criterion_group!(benches, bench_push, bench_nth, bench_seq_walk);
criterion_main!(benches);
