//! Throughput of promise chains and microtask draining, the hot path
//! for any `async`-heavy script.

use antcore::embedder::Runtime;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_promise_then_chain(c: &mut Criterion) {
    c.bench_function("promise_then_chain_of_10", |b| {
        b.iter(|| {
            let mut rt = Runtime::create_dynamic("<bench>").unwrap();
            rt.eval(
                "var p = Promise.resolve(0);
                 for (let i = 0; i < 10; i++) { p = p.then(x => x + 1); }",
            )
            .unwrap();
            rt.run_to_completion().unwrap();
            black_box(());
        });
    });
}

fn bench_promise_all_fan_out(c: &mut Criterion) {
    c.bench_function("promise_all_fan_out_50", |b| {
        b.iter(|| {
            let mut rt = Runtime::create_dynamic("<bench>").unwrap();
            rt.eval(
                "var items = [];
                 for (let i = 0; i < 50; i++) { items.push(Promise.resolve(i)); }
                 Promise.all(items);",
            )
            .unwrap();
            rt.run_to_completion().unwrap();
            black_box(());
        });
    });
}

criterion_group!(benches, bench_promise_then_chain, bench_promise_all_fan_out);
criterion_main!(benches);
