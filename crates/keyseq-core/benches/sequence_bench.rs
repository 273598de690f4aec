//! # Sequence Benchmarks
//!
//! Performance benchmarks for keyseq-core allocation.
//!
//! Run with: `cargo bench -p keyseq-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use keyseq_core::{
    Allocator, Database, GapResolver, Record, SequenceField, SequenceModel, TableSchema,
};
use std::hint::black_box;

/// Create a database whose `item` table holds `1..=size` with every tenth value missing.
fn create_holey_table(size: i64) -> Database {
    let db = Database::in_memory();
    db.create_table(TableSchema::new("item")).expect("table");
    let mut txn = db.begin();
    for n in (1..=size).filter(|n| n % 10 != 0) {
        txn.insert_record(&mut Record::new("item").with("number", n))
            .expect("insert");
    }
    txn.commit().expect("commit");
    db
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_next_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_value");

    group.bench_function("in_memory_autocommit", |b| {
        let db = Database::in_memory();
        let store = SequenceModel::default_for(&db).expect("model").current();
        b.iter(|| black_box(store.next_value_autocommit(&db, "bench", false)));
    });

    group.bench_function("redb_autocommit", |b| {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path().join("bench.redb")).expect("open");
        let store = SequenceModel::default_for(&db).expect("model").current();
        b.iter(|| black_box(store.next_value_autocommit(&db, "bench", false)));
    });

    group.finish();
}

fn bench_gap_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("gap_scan");

    for size in [100_i64, 1000, 10000].iter() {
        let db = create_holey_table(*size);
        let txn = db.begin();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                black_box(GapResolver::find_allocation(
                    &txn.collection("item"),
                    "number",
                    0,
                ))
            });
        });
    }

    group.finish();
}

fn bench_allocate_fill_gaps(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_fill_gaps");
    let field = SequenceField::new("number").fill_gaps(true);

    for size in [100_i64, 1000].iter() {
        let db = create_holey_table(*size);
        let store = SequenceModel::default_for(&db).expect("model").current();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut txn = db.begin();
                let mut item = Record::new("item");
                let outcome = Allocator::allocate(&mut txn, &store, &mut item, &field);
                txn.rollback();
                black_box(outcome)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_next_value,
    bench_gap_scan,
    bench_allocate_fill_gaps
);
criterion_main!(benches);
