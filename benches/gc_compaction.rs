//! Cost of a forced collection over a heap full of live, arena-backed
//! strings — the scenario the compacting collector's copy phase is
//! actually sized for.

use antcore::embedder::Runtime;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_collect_with_many_live_strings(c: &mut Criterion) {
    c.bench_function("gc_collect_1000_live_strings", |b| {
        b.iter(|| {
            let mut rt = Runtime::create_dynamic("<bench>").unwrap();
            rt.eval(
                "var kept = [];
                 for (let i = 0; i < 1000; i++) { kept.push('string number ' + i); }",
            )
            .unwrap();
            let stats = rt.collect_garbage().unwrap();
            black_box(stats);
        });
    });
}

fn bench_collect_after_churn(c: &mut Criterion) {
    c.bench_function("gc_collect_after_discarding_half", |b| {
        b.iter(|| {
            let mut rt = Runtime::create_dynamic("<bench>").unwrap();
            rt.eval(
                "var kept = [];
                 for (let i = 0; i < 2000; i++) {
                     let s = 'churned string ' + i;
                     if (i % 2 === 0) { kept.push(s); }
                 }",
            )
            .unwrap();
            let stats = rt.collect_garbage().unwrap();
            black_box(stats);
        });
    });
}

criterion_group!(benches, bench_collect_with_many_live_strings, bench_collect_after_churn);
criterion_main!(benches);
