//! Criterion benchmarks for the query compiler

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_pg_access::{compile, sql, Query, SqlValue};

// ============================================================================
// Scalar Compilation Benchmarks
// ============================================================================

fn bench_scalars(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalars");

    group.bench_function("single", |b| {
        b.iter(|| {
            let query = sql!("SELECT * FROM users WHERE id = ", black_box(42), "");
            black_box(query)
        });
    });

    for count in [4usize, 16, 64] {
        let values: Vec<SqlValue> = (0..count as i64).map(SqlValue::from).collect();
        let fragments: Vec<String> = (0..=count).map(|i| format!(" c{i} = ")).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(compile(black_box(&fragments), black_box(&values))));
        });
    }

    group.finish();
}

// ============================================================================
// Array Benchmarks
// ============================================================================

fn bench_arrays(c: &mut Criterion) {
    let mut group = c.benchmark_group("arrays");

    for size in [10usize, 100, 1000] {
        let items = SqlValue::array((0..size as i64).map(SqlValue::from));
        let typed = SqlValue::cast("int8", items.clone());
        let inferred = SqlValue::cast("array", items.clone());
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("tuple", size), &items, |b, items| {
            b.iter(|| black_box(sql!("SELECT * FROM t WHERE id IN ", items.clone(), "")));
        });
        group.bench_with_input(BenchmarkId::new("typed", size), &typed, |b, typed| {
            b.iter(|| black_box(sql!("SELECT * FROM t WHERE id = ANY(", typed.clone(), ")")));
        });
        group.bench_with_input(BenchmarkId::new("inferred", size), &inferred, |b, inferred| {
            b.iter(|| black_box(sql!("SELECT * FROM t WHERE id = ANY(", inferred.clone(), ")")));
        });
    }

    group.finish();
}

// ============================================================================
// Object Benchmarks
// ============================================================================

fn bench_objects(c: &mut Criterion) {
    let mut group = c.benchmark_group("objects");

    let row = SqlValue::object([
        ("name", SqlValue::from("Alice")),
        ("email", SqlValue::from("alice@example.com")),
        ("age", SqlValue::from(30)),
        ("tags", SqlValue::cast("text", vec![SqlValue::from("a"), SqlValue::from("b")])),
        ("deleted_at", SqlValue::Undefined),
    ]);
    let filter = SqlValue::where_group([
        ("id", SqlValue::from(7)),
        ("status", SqlValue::array([SqlValue::from("new"), SqlValue::from("open")])),
        ("archived", SqlValue::Null),
        ("meta", SqlValue::object([("vip", true)])),
    ]);

    group.bench_function("assignments", |b| {
        b.iter(|| black_box(sql!("UPDATE users SET ", row.clone(), "")));
    });

    group.bench_function("where_group", |b| {
        b.iter(|| black_box(sql!("SELECT * FROM users WHERE ", filter.clone(), "")));
    });

    group.bench_function("builder", |b| {
        b.iter(|| {
            let query = Query::new("UPDATE users SET ")
                .bind(row.clone())
                .sql(" WHERE ")
                .bind(filter.clone())
                .compile();
            black_box(query)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_scalars, bench_arrays, bench_objects);
criterion_main!(benches);
