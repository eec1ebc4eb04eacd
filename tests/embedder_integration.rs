use antcore::embedder::Runtime;

#[test]
fn arithmetic_and_string_concatenation_round_trip_through_eval() {
    let mut rt = Runtime::create_dynamic("<test>").unwrap();
    let v = rt.eval("let x = 2 + 3; let s = 'n=' + x; s;").unwrap();
    assert_eq!(rt.ev.heap.string_value(v), "n=5");
}

#[test]
fn array_methods_compose_through_the_call_dispatch_path() {
    let mut rt = Runtime::create_dynamic("<test>").unwrap();
    let v = rt.eval("[1, 2, 3].map(x => x * 2).filter(x => x > 2).reduce((a, b) => a + b, 0);").unwrap();
    assert_eq!(v.as_f64(), 10.0);
}

#[test]
fn a_promise_chain_settles_once_microtasks_are_drained() {
    let mut rt = Runtime::create_dynamic("<test>").unwrap();
    rt.eval("var settled_result; Promise.resolve(1).then(x => x + 1).then(x => { settled_result = x; });").unwrap();
    rt.run_to_completion().unwrap();
    let v = rt.global_get("settled_result").unwrap();
    assert_eq!(v.as_f64(), 2.0);
}

#[test]
fn bigint_arithmetic_stays_exact_past_f64_precision() {
    let mut rt = Runtime::create_dynamic("<test>").unwrap();
    let v = rt.eval("(10000000000000000000n + 1n).toString();").unwrap();
    assert_eq!(rt.ev.heap.string_value(v), "10000000000000001");
}

#[test]
fn a_typed_array_write_is_visible_through_the_same_backing_buffer() {
    let mut rt = Runtime::create_dynamic("<test>").unwrap();
    let v = rt.eval("let a = new Int32Array(3); a[1] = 99; a[1] + a.length;").unwrap();
    assert_eq!(v.as_f64(), 102.0);
}

#[test]
fn forced_garbage_collection_preserves_a_live_string_root() {
    let mut rt = Runtime::create_dynamic("<test>").unwrap();
    rt.eval("var kept_name = 'kept across a collection';").unwrap();
    rt.collect_garbage().unwrap();
    let v = rt.global_get("kept_name").unwrap();
    assert_eq!(rt.ev.heap.string_value(v), "kept across a collection");
}
