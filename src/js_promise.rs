//! Promise model (§4.I): exactly-once resolve/reject, a microtask queue
//! drained between coroutine ticks, and `.then()`/`.catch()`/`.finally()`
//! chaining plus the `all`/`race`/`allSettled`/`any` combinators.
//!
//! A settlement reaction (the continuation of a `.then()` call) is itself
//! registered as a native function closing over the handler, the derived
//! promise, and whether it runs on the fulfill or reject path — the same
//! "queue a callback plus its arguments" shape the teacher's task queue
//! used, just backed by [`Evaluator::natives`] instead of a bespoke `Task`
//! enum, since every continuation here already fits the `NativeFn` shape.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::eval::{EvalResult, Evaluator, NativeFn, Signal};
use crate::core::heap::PromiseState;
use crate::core::value::{Tag, Value};
use crate::error::JSError;

fn is_callable(v: Value) -> bool {
    matches!(v.type_tag(), Tag::Function | Tag::NativeFunction)
}

/// Settle `promise` as fulfilled with `value`, draining its fulfill
/// reactions onto the microtask queue. A no-op if the promise is already
/// settled (exactly-once) or if `value` is itself a promise, in which
/// case `promise` instead adopts that promise's eventual state.
pub fn resolve_promise(ev: &mut Evaluator, promise: Value, value: Value) -> EvalResult<Value> {
    if ev.heap.promise(promise).map(|p| p.state) != Some(PromiseState::Pending) {
        return Ok(Value::UNDEFINED);
    }
    if value.type_tag() == Tag::Promise && value != promise {
        let fulfill = make_reaction(ev, None, promise, false);
        let reject = make_reaction(ev, None, promise, true);
        match ev.heap.promise(value).map(|p| p.state) {
            Some(PromiseState::Pending) | None => {
                if let Some(p) = ev.heap.promise_mut(value) {
                    p.on_fulfill.push(fulfill);
                    p.on_reject.push(reject);
                }
            }
            Some(PromiseState::Fulfilled) => {
                let v = ev.heap.promise(value).map(|p| p.value).unwrap_or(Value::UNDEFINED);
                ev.microtasks.push_back((fulfill, vec![v]));
            }
            Some(PromiseState::Rejected) => {
                let v = ev.heap.promise(value).map(|p| p.value).unwrap_or(Value::UNDEFINED);
                ev.microtasks.push_back((reject, vec![v]));
            }
        }
        return Ok(Value::UNDEFINED);
    }
    settle(ev, promise, PromiseState::Fulfilled, value);
    Ok(Value::UNDEFINED)
}

/// Settle `promise` as rejected with `reason`. A no-op once already settled.
pub fn reject_promise(ev: &mut Evaluator, promise: Value, reason: Value) -> EvalResult<Value> {
    if ev.heap.promise(promise).map(|p| p.state) != Some(PromiseState::Pending) {
        return Ok(Value::UNDEFINED);
    }
    settle(ev, promise, PromiseState::Rejected, reason);
    Ok(Value::UNDEFINED)
}

fn settle(ev: &mut Evaluator, promise: Value, state: PromiseState, value: Value) {
    let (fulfill, reject) = match ev.heap.promise_mut(promise) {
        Some(p) => {
            p.state = state;
            p.value = value;
            (std::mem::take(&mut p.on_fulfill), std::mem::take(&mut p.on_reject))
        }
        None => return,
    };
    let ready = if state == PromiseState::Fulfilled { fulfill } else { reject };
    let dropped = if state == PromiseState::Fulfilled { reject } else { fulfill };
    drop(dropped);
    for reaction in ready {
        ev.microtasks.push_back((reaction, vec![value]));
    }
}

/// Build a one-shot native-function reaction: call `handler` with the
/// settled value (or pass the value/reason straight through when no
/// handler was given, per `.then(undefined, onRejected)` semantics), then
/// resolve or reject `result` with the outcome.
fn make_reaction(ev: &mut Evaluator, handler: Option<Value>, result: Value, is_reject_path: bool) -> Value {
    let handler = handler.filter(|h| is_callable(*h));
    let f: NativeFn = Rc::new(move |ev, _this, args| {
        let settled = args.first().copied().unwrap_or(Value::UNDEFINED);
        match handler {
            Some(h) => match ev.call(h, Value::UNDEFINED, &[settled]) {
                Ok(v) => resolve_promise(ev, result, v),
                Err(Signal::Thrown(e)) => reject_promise(ev, result, e),
                Err(other) => Err(other),
            },
            None if is_reject_path => reject_promise(ev, result, settled),
            None => resolve_promise(ev, result, settled),
        }
    });
    let idx = ev.register_native(f);
    Value::make(Tag::NativeFunction, idx as u64)
}

/// `promise.then(onFulfilled, onRejected)` — returns the derived promise.
pub fn promise_then(ev: &mut Evaluator, promise: Value, on_fulfilled: Option<Value>, on_rejected: Option<Value>) -> EvalResult<Value> {
    let result = ev.heap.new_promise()?;
    let fulfill_reaction = make_reaction(ev, on_fulfilled, result, false);
    let reject_reaction = make_reaction(ev, on_rejected, result, true);
    match ev.heap.promise(promise).map(|p| p.state) {
        Some(PromiseState::Pending) | None => {
            if let Some(p) = ev.heap.promise_mut(promise) {
                p.on_fulfill.push(fulfill_reaction);
                p.on_reject.push(reject_reaction);
            }
        }
        Some(PromiseState::Fulfilled) => {
            let v = ev.heap.promise(promise).map(|p| p.value).unwrap_or(Value::UNDEFINED);
            ev.microtasks.push_back((fulfill_reaction, vec![v]));
        }
        Some(PromiseState::Rejected) => {
            let v = ev.heap.promise(promise).map(|p| p.value).unwrap_or(Value::UNDEFINED);
            ev.microtasks.push_back((reject_reaction, vec![v]));
        }
    }
    Ok(result)
}

/// `promise.catch(onRejected)` is sugar for `.then(undefined, onRejected)`.
pub fn promise_catch(ev: &mut Evaluator, promise: Value, on_rejected: Value) -> EvalResult<Value> {
    promise_then(ev, promise, None, Some(on_rejected))
}

/// `promise.finally(onFinally)` runs `onFinally` with no arguments on
/// either path and passes the original settlement through unchanged
/// (unless `onFinally` itself throws).
pub fn promise_finally(ev: &mut Evaluator, promise: Value, on_finally: Value) -> EvalResult<Value> {
    if !is_callable(on_finally) {
        return promise_then(ev, promise, None, None);
    }
    let result = ev.heap.new_promise()?;
    let fulfill_reaction: NativeFn = Rc::new(move |ev, _this, args| {
        let v = args.first().copied().unwrap_or(Value::UNDEFINED);
        match ev.call(on_finally, Value::UNDEFINED, &[]) {
            Ok(_) => resolve_promise(ev, result, v),
            Err(Signal::Thrown(e)) => reject_promise(ev, result, e),
            Err(other) => Err(other),
        }
    });
    let reject_reaction: NativeFn = Rc::new(move |ev, _this, args| {
        let reason = args.first().copied().unwrap_or(Value::UNDEFINED);
        match ev.call(on_finally, Value::UNDEFINED, &[]) {
            Ok(_) => reject_promise(ev, result, reason),
            Err(Signal::Thrown(e)) => reject_promise(ev, result, e),
            Err(other) => Err(other),
        }
    });
    let fulfill_idx = ev.register_native(fulfill_reaction);
    let reject_idx = ev.register_native(reject_reaction);
    let fulfill_value = Value::make(Tag::NativeFunction, fulfill_idx as u64);
    let reject_value = Value::make(Tag::NativeFunction, reject_idx as u64);
    match ev.heap.promise(promise).map(|p| p.state) {
        Some(PromiseState::Pending) | None => {
            if let Some(p) = ev.heap.promise_mut(promise) {
                p.on_fulfill.push(fulfill_value);
                p.on_reject.push(reject_value);
            }
        }
        Some(PromiseState::Fulfilled) => {
            let v = ev.heap.promise(promise).map(|p| p.value).unwrap_or(Value::UNDEFINED);
            ev.microtasks.push_back((fulfill_value, vec![v]));
        }
        Some(PromiseState::Rejected) => {
            let v = ev.heap.promise(promise).map(|p| p.value).unwrap_or(Value::UNDEFINED);
            ev.microtasks.push_back((reject_value, vec![v]));
        }
    }
    Ok(result)
}

/// `Promise.resolve(value)` — returns `value` unchanged if it is already
/// a promise, otherwise a promise immediately resolved with it.
pub fn promise_resolve(ev: &mut Evaluator, value: Value) -> EvalResult<Value> {
    if value.type_tag() == Tag::Promise {
        return Ok(value);
    }
    let p = ev.heap.new_promise()?;
    resolve_promise(ev, p, value)?;
    Ok(p)
}

/// `Promise.reject(reason)` — a promise immediately rejected with `reason`.
pub fn promise_reject(ev: &mut Evaluator, reason: Value) -> EvalResult<Value> {
    let p = ev.heap.new_promise()?;
    reject_promise(ev, p, reason)?;
    Ok(p)
}

/// `new Promise(executor)` — runs `executor(resolve, reject)` synchronously,
/// converting a thrown executor into an immediate rejection.
pub fn promise_new(ev: &mut Evaluator, executor: Value) -> EvalResult<Value> {
    let promise = ev.heap.new_promise()?;
    let resolve_fn: NativeFn = Rc::new(move |ev, _this, args| resolve_promise(ev, promise, args.first().copied().unwrap_or(Value::UNDEFINED)));
    let reject_fn: NativeFn = Rc::new(move |ev, _this, args| reject_promise(ev, promise, args.first().copied().unwrap_or(Value::UNDEFINED)));
    let resolve_idx = ev.register_native(resolve_fn);
    let reject_idx = ev.register_native(reject_fn);
    let resolve_value = Value::make(Tag::NativeFunction, resolve_idx as u64);
    let reject_value = Value::make(Tag::NativeFunction, reject_idx as u64);
    match ev.call(executor, Value::UNDEFINED, &[resolve_value, reject_value]) {
        Ok(_) => {}
        Err(Signal::Thrown(e)) => {
            reject_promise(ev, promise, e)?;
        }
        Err(other) => return Err(other),
    }
    Ok(promise)
}

/// Shared completion state for the `all`/`allSettled`/`any` combinators,
/// each tracking one slot per input promise until every slot has a value.
struct Combinator {
    results: Vec<Value>,
    remaining: usize,
    result_promise: Value,
}

/// `Promise.all(iterable)` — fulfills with an array of values once every
/// input has fulfilled, or rejects as soon as any input rejects.
pub fn promise_all(ev: &mut Evaluator, inputs: &[Value]) -> EvalResult<Value> {
    let result_promise = ev.heap.new_promise()?;
    if inputs.is_empty() {
        let empty = ev.heap.new_array(None)?;
        resolve_promise(ev, result_promise, empty)?;
        return Ok(result_promise);
    }
    let state = Rc::new(RefCell::new(Combinator { results: vec![Value::UNDEFINED; inputs.len()], remaining: inputs.len(), result_promise }));
    for (i, input) in inputs.iter().enumerate() {
        let p = promise_resolve(ev, *input)?;
        let state_f = state.clone();
        let on_fulfilled: NativeFn = Rc::new(move |ev, _this, args| {
            let v = args.first().copied().unwrap_or(Value::UNDEFINED);
            let mut s = state_f.borrow_mut();
            s.results[i] = v;
            s.remaining -= 1;
            if s.remaining == 0 {
                let arr = ev.heap.new_array(None).map_err(Signal::Js)?;
                if let Some(o) = ev.heap.object_mut(arr) {
                    o.elements = s.results.clone();
                }
                let result_promise = s.result_promise;
                drop(s);
                resolve_promise(ev, result_promise, arr)?;
            }
            Ok(Value::UNDEFINED)
        });
        let on_rejected: NativeFn = Rc::new(move |ev, _this, args| {
            let reason = args.first().copied().unwrap_or(Value::UNDEFINED);
            reject_promise(ev, result_promise, reason)
        });
        let fulfill_idx = ev.register_native(on_fulfilled);
        let reject_idx = ev.register_native(on_rejected);
        promise_then(
            ev,
            p,
            Some(Value::make(Tag::NativeFunction, fulfill_idx as u64)),
            Some(Value::make(Tag::NativeFunction, reject_idx as u64)),
        )?;
    }
    Ok(result_promise)
}

/// `Promise.race(iterable)` — settles to match whichever input settles
/// first.
pub fn promise_race(ev: &mut Evaluator, inputs: &[Value]) -> EvalResult<Value> {
    let result_promise = ev.heap.new_promise()?;
    for input in inputs {
        let p = promise_resolve(ev, *input)?;
        let on_fulfilled: NativeFn = Rc::new(move |ev, _this, args| resolve_promise(ev, result_promise, args.first().copied().unwrap_or(Value::UNDEFINED)));
        let on_rejected: NativeFn = Rc::new(move |ev, _this, args| reject_promise(ev, result_promise, args.first().copied().unwrap_or(Value::UNDEFINED)));
        let fulfill_idx = ev.register_native(on_fulfilled);
        let reject_idx = ev.register_native(on_rejected);
        promise_then(
            ev,
            p,
            Some(Value::make(Tag::NativeFunction, fulfill_idx as u64)),
            Some(Value::make(Tag::NativeFunction, reject_idx as u64)),
        )?;
    }
    Ok(result_promise)
}

/// `Promise.allSettled(iterable)` — always fulfills, once every input has
/// settled, with an array of `{status, value}`/`{status, reason}` records.
pub fn promise_all_settled(ev: &mut Evaluator, inputs: &[Value]) -> EvalResult<Value> {
    let result_promise = ev.heap.new_promise()?;
    if inputs.is_empty() {
        let empty = ev.heap.new_array(None)?;
        resolve_promise(ev, result_promise, empty)?;
        return Ok(result_promise);
    }
    let state = Rc::new(RefCell::new(Combinator { results: vec![Value::UNDEFINED; inputs.len()], remaining: inputs.len(), result_promise }));
    for (i, input) in inputs.iter().enumerate() {
        let p = promise_resolve(ev, *input)?;
        let state_f = state.clone();
        let on_fulfilled: NativeFn = Rc::new(move |ev, _this, args| {
            let v = args.first().copied().unwrap_or(Value::UNDEFINED);
            let obj = ev.heap.new_object(None).map_err(Signal::Js)?;
            let status = ev.heap.new_string("fulfilled").map_err(Signal::Js)?;
            if let Some(o) = ev.heap.object_mut(obj) {
                o.set_named("status", status).ok();
                o.set_named("value", v).ok();
            }
            let mut s = state_f.borrow_mut();
            s.results[i] = obj;
            s.remaining -= 1;
            if s.remaining == 0 {
                let arr = ev.heap.new_array(None).map_err(Signal::Js)?;
                if let Some(o) = ev.heap.object_mut(arr) {
                    o.elements = s.results.clone();
                }
                let result_promise = s.result_promise;
                drop(s);
                resolve_promise(ev, result_promise, arr)?;
            }
            Ok(Value::UNDEFINED)
        });
        let state_r = state.clone();
        let on_rejected: NativeFn = Rc::new(move |ev, _this, args| {
            let reason = args.first().copied().unwrap_or(Value::UNDEFINED);
            let obj = ev.heap.new_object(None).map_err(Signal::Js)?;
            let status = ev.heap.new_string("rejected").map_err(Signal::Js)?;
            if let Some(o) = ev.heap.object_mut(obj) {
                o.set_named("status", status).ok();
                o.set_named("reason", reason).ok();
            }
            let mut s = state_r.borrow_mut();
            s.results[i] = obj;
            s.remaining -= 1;
            if s.remaining == 0 {
                let arr = ev.heap.new_array(None).map_err(Signal::Js)?;
                if let Some(o) = ev.heap.object_mut(arr) {
                    o.elements = s.results.clone();
                }
                let result_promise = s.result_promise;
                drop(s);
                resolve_promise(ev, result_promise, arr)?;
            }
            Ok(Value::UNDEFINED)
        });
        let fulfill_idx = ev.register_native(on_fulfilled);
        let reject_idx = ev.register_native(on_rejected);
        promise_then(
            ev,
            p,
            Some(Value::make(Tag::NativeFunction, fulfill_idx as u64)),
            Some(Value::make(Tag::NativeFunction, reject_idx as u64)),
        )?;
    }
    Ok(result_promise)
}

/// `Promise.any(iterable)` — fulfills with the first input to fulfill, or
/// rejects with an `AggregateError`-shaped object once every input has
/// rejected.
pub fn promise_any(ev: &mut Evaluator, inputs: &[Value]) -> EvalResult<Value> {
    let result_promise = ev.heap.new_promise()?;
    if inputs.is_empty() {
        let err = ev.heap.new_error(crate::error::JSErrorKind::Aggregate, "All promises were rejected".into(), Vec::new())?;
        reject_promise(ev, result_promise, err)?;
        return Ok(result_promise);
    }
    let state = Rc::new(RefCell::new(Combinator { results: vec![Value::UNDEFINED; inputs.len()], remaining: inputs.len(), result_promise }));
    for (i, input) in inputs.iter().enumerate() {
        let p = promise_resolve(ev, *input)?;
        let on_fulfilled: NativeFn = Rc::new(move |ev, _this, args| resolve_promise(ev, result_promise, args.first().copied().unwrap_or(Value::UNDEFINED)));
        let state_r = state.clone();
        let on_rejected: NativeFn = Rc::new(move |ev, _this, args| {
            let reason = args.first().copied().unwrap_or(Value::UNDEFINED);
            let mut s = state_r.borrow_mut();
            s.results[i] = reason;
            s.remaining -= 1;
            if s.remaining == 0 {
                let errors = ev.heap.new_array(None).map_err(Signal::Js)?;
                if let Some(o) = ev.heap.object_mut(errors) {
                    o.elements = s.results.clone();
                }
                let result_promise = s.result_promise;
                drop(s);
                let err = ev.heap.new_error(crate::error::JSErrorKind::Aggregate, "All promises were rejected".into(), Vec::new()).map_err(Signal::Js)?;
                ev.heap.error_set_extra(err, "errors", errors);
                reject_promise(ev, result_promise, err)?;
            }
            Ok(Value::UNDEFINED)
        });
        let fulfill_idx = ev.register_native(on_fulfilled);
        let reject_idx = ev.register_native(on_rejected);
        promise_then(
            ev,
            p,
            Some(Value::make(Tag::NativeFunction, fulfill_idx as u64)),
            Some(Value::make(Tag::NativeFunction, reject_idx as u64)),
        )?;
    }
    Ok(result_promise)
}

/// Drain the microtask queue to a fixed point. Each reaction may itself
/// enqueue further microtasks (a chained `.then()`); this keeps draining
/// until none remain, matching the "microtasks run before the event loop
/// advances" rule. Called between every macrotask by [`crate::event_loop`].
pub fn run_microtasks(ev: &mut Evaluator) -> Result<(), JSError> {
    while let Some((callback, args)) = ev.microtasks.pop_front() {
        match ev.call(callback, Value::UNDEFINED, &args) {
            Ok(_) => {}
            Err(Signal::Thrown(v)) => return Err(ev.thrown_to_error(v)),
            Err(Signal::Js(e)) => return Err(e),
            Err(_) => {}
        }
        ev.maybe_collect_garbage()?;
    }
    Ok(())
}

fn register_on(ev: &mut Evaluator, proto: Value, name: &str, f: impl Fn(&mut Evaluator, Value, &[Value]) -> EvalResult<Value> + 'static) {
    let idx = ev.register_native(Rc::new(f));
    let native = Value::make(Tag::NativeFunction, idx as u64);
    if let Some(o) = ev.heap.object_mut(proto) {
        let _ = o.set_named(name, native);
    }
}

fn set_ctor(ev: &mut Evaluator, ctor: Value, name: &str, f: Value) {
    if let Some(o) = ev.heap.object_mut(ctor) {
        let _ = o.set_named(name, f);
    }
}

/// Install `Promise.prototype` onto `ev.promise_proto` and the `Promise`
/// constructor (`resolve`/`reject`/`all`/`race`/`allSettled`/`any`) in the
/// global scope, both wired straight to this module's free functions.
pub fn install(ev: &mut Evaluator) -> Result<(), JSError> {
    ev.promise_proto = ev.heap.new_object(None)?;

    register_on(ev, ev.promise_proto, "then", |ev, this, args| {
        let on_fulfilled = args.first().copied().filter(|v| is_callable(*v));
        let on_rejected = args.get(1).copied().filter(|v| is_callable(*v));
        promise_then(ev, this, on_fulfilled, on_rejected)
    });
    register_on(ev, ev.promise_proto, "catch", |ev, this, args| {
        let on_rejected = args.first().copied().unwrap_or(Value::UNDEFINED);
        promise_catch(ev, this, on_rejected)
    });
    register_on(ev, ev.promise_proto, "finally", |ev, this, args| {
        let on_finally = args.first().copied().unwrap_or(Value::UNDEFINED);
        promise_finally(ev, this, on_finally)
    });

    let ctor = ev.heap.new_object(None)?;

    let resolve_fn = {
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| promise_resolve(ev, args.first().copied().unwrap_or(Value::UNDEFINED))));
        Value::make(Tag::NativeFunction, idx as u64)
    };
    set_ctor(ev, ctor, "resolve", resolve_fn);

    let reject_fn = {
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| promise_reject(ev, args.first().copied().unwrap_or(Value::UNDEFINED))));
        Value::make(Tag::NativeFunction, idx as u64)
    };
    set_ctor(ev, ctor, "reject", reject_fn);

    let all_fn = {
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| {
            let inputs = args.first().copied().map(|v| ev.iterate(v)).transpose()?.unwrap_or_default();
            promise_all(ev, &inputs)
        }));
        Value::make(Tag::NativeFunction, idx as u64)
    };
    set_ctor(ev, ctor, "all", all_fn);

    let race_fn = {
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| {
            let inputs = args.first().copied().map(|v| ev.iterate(v)).transpose()?.unwrap_or_default();
            promise_race(ev, &inputs)
        }));
        Value::make(Tag::NativeFunction, idx as u64)
    };
    set_ctor(ev, ctor, "race", race_fn);

    let all_settled_fn = {
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| {
            let inputs = args.first().copied().map(|v| ev.iterate(v)).transpose()?.unwrap_or_default();
            promise_all_settled(ev, &inputs)
        }));
        Value::make(Tag::NativeFunction, idx as u64)
    };
    set_ctor(ev, ctor, "allSettled", all_settled_fn);

    let any_fn = {
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| {
            let inputs = args.first().copied().map(|v| ev.iterate(v)).transpose()?.unwrap_or_default();
            promise_any(ev, &inputs)
        }));
        Value::make(Tag::NativeFunction, idx as u64)
    };
    set_ctor(ev, ctor, "any", any_fn);

    ev.global.declare_var("Promise");
    ev.global.initialize("Promise", ctor);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::Heap;

    fn evaluator() -> Evaluator {
        Evaluator::new(Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap(), "<test>")
    }

    #[test]
    fn resolve_then_reject_is_a_no_op() {
        let mut ev = evaluator();
        let p = ev.heap.new_promise().unwrap();
        resolve_promise(&mut ev, p, Value::number(1.0)).unwrap();
        reject_promise(&mut ev, p, Value::number(2.0)).unwrap();
        assert_eq!(ev.heap.promise(p).unwrap().state, PromiseState::Fulfilled);
        assert_eq!(ev.heap.promise(p).unwrap().value, Value::number(1.0));
    }

    #[test]
    fn then_reaction_runs_as_a_microtask() {
        let mut ev = evaluator();
        let p = ev.heap.new_promise().unwrap();
        let captured = ev.heap.new_promise().unwrap();
        let capture: NativeFn = Rc::new(move |ev, _this, args| resolve_promise(ev, captured, args.first().copied().unwrap_or(Value::UNDEFINED)));
        let idx = ev.register_native(capture);
        promise_then(&mut ev, p, Some(Value::make(Tag::NativeFunction, idx as u64)), None).unwrap();
        resolve_promise(&mut ev, p, Value::number(5.0)).unwrap();
        assert_eq!(ev.heap.promise(captured).unwrap().state, PromiseState::Pending);
        run_microtasks(&mut ev).unwrap();
        assert_eq!(ev.heap.promise(captured).unwrap().value, Value::number(5.0));
    }

    #[test]
    fn all_resolves_once_every_input_settles() {
        let mut ev = evaluator();
        let a = ev.heap.new_promise().unwrap();
        let b = ev.heap.new_promise().unwrap();
        let combined = promise_all(&mut ev, &[a, b]).unwrap();
        resolve_promise(&mut ev, a, Value::number(1.0)).unwrap();
        run_microtasks(&mut ev).unwrap();
        assert_eq!(ev.heap.promise(combined).unwrap().state, PromiseState::Pending);
        resolve_promise(&mut ev, b, Value::number(2.0)).unwrap();
        run_microtasks(&mut ev).unwrap();
        assert_eq!(ev.heap.promise(combined).unwrap().state, PromiseState::Fulfilled);
        let arr = ev.heap.promise(combined).unwrap().value;
        let elems = ev.heap.object(arr).unwrap().elements.clone();
        assert_eq!(elems, vec![Value::number(1.0), Value::number(2.0)]);
    }

    #[test]
    fn installed_then_method_is_reachable_via_property_lookup() {
        let mut ev = evaluator();
        install(&mut ev).unwrap();
        let p = ev.heap.new_promise().unwrap();
        let then_fn = ev.get_property(p, "then").unwrap();
        let captured = ev.heap.new_promise().unwrap();
        let capture: NativeFn = Rc::new(move |ev, _this, args| resolve_promise(ev, captured, args.first().copied().unwrap_or(Value::UNDEFINED)));
        let idx = ev.register_native(capture);
        ev.call(then_fn, p, &[Value::make(Tag::NativeFunction, idx as u64)]).unwrap();
        resolve_promise(&mut ev, p, Value::number(9.0)).unwrap();
        run_microtasks(&mut ev).unwrap();
        assert_eq!(ev.heap.promise(captured).unwrap().value, Value::number(9.0));
    }

    #[test]
    fn global_promise_resolve_produces_a_fulfilled_promise() {
        let mut ev = evaluator();
        install(&mut ev).unwrap();
        let ctor = ev.global.resolve("Promise").unwrap();
        let resolve_fn = ev.get_property(ctor, "resolve").unwrap();
        let p = ev.call(resolve_fn, Value::UNDEFINED, &[Value::number(3.0)]).unwrap();
        assert_eq!(ev.heap.promise(p).unwrap().state, PromiseState::Fulfilled);
    }

    #[test]
    fn race_settles_to_the_first_settled_input() {
        let mut ev = evaluator();
        let a = ev.heap.new_promise().unwrap();
        let b = ev.heap.new_promise().unwrap();
        let winner = promise_race(&mut ev, &[a, b]).unwrap();
        resolve_promise(&mut ev, a, Value::number(10.0)).unwrap();
        run_microtasks(&mut ev).unwrap();
        assert_eq!(ev.heap.promise(winner).unwrap().value, Value::number(10.0));
        resolve_promise(&mut ev, b, Value::number(20.0)).unwrap();
        run_microtasks(&mut ev).unwrap();
        assert_eq!(ev.heap.promise(winner).unwrap().value, Value::number(10.0));
    }
}
