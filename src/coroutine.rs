//! §4.J Cooperative coroutine scheduler.
//!
//! One stackful fiber (via the `generator` crate) backs every `async`
//! function invocation and every generator object, exactly as the original
//! distilled implementation's coroutine layer runs each suspended call atop
//! its own native stack rather than re-entering a saved AST cursor. A fiber
//! yields out to the scheduler at every `await`/`yield` point; the
//! scheduler resumes it once the awaited promise settles or `.next(v)` is
//! called, feeding the resume value back in.
//!
//! The teacher's task queue (a `VecDeque` of ready work, drained to a
//! fixed point every tick) is the model for [`Scheduler`]'s `ready` queue;
//! what's new here is that "ready work" is a suspended native stack instead
//! of a boxed closure.

use std::cell::RefCell;
use std::collections::VecDeque;

use generator::{Gn, Generator, Scope};

use crate::core::eval::{Evaluator, Signal};
use crate::core::value::Value;
use crate::error::JSError;

/// Default stack size for a coroutine's fiber (§3: 1 MiB).
pub const DEFAULT_FIBER_STACK: usize = 1024 * 1024;

/// Hard cap on how many times a single tick drains the ready queue before
/// yielding back to the embedder, guarding against a runaway chain of
/// mutually-resuming coroutines starving the host loop.
pub const CORO_PER_TICK_LIMIT: usize = 100_000;

/// What a coroutine's fiber yields out to the scheduler at a suspension
/// point, and what the scheduler feeds back in on resume.
pub enum Suspend {
    /// `await expr` — the fiber is parked until `promise` settles.
    Await(Value),
    /// `yield expr` from a generator body — control returns to whoever
    /// called `.next()`, carrying `value` and `done: false`.
    Yield(Value),
    /// The fiber's body ran to completion (or threw); no further resumes
    /// are valid.
    Done(Result<Value, Signal>),
}

/// What the scheduler sends back into a parked fiber to resume it.
pub enum Resume {
    /// The awaited promise settled with this value (fulfilled) ...
    Value(Value),
    /// ... or it rejected, and the `await` should re-throw.
    Throw(Value),
    /// A generator's `.next(v)`/`.return(v)`/`.throw(v)` call.
    Next(Value),
}

type Fiber = Generator<'static, Resume, Suspend>;

thread_local! {
    /// The currently-running fiber's yield handle, set for the duration of
    /// a `Fiber::resume`/`send` call so [`await_value`]/[`yield_value`] —
    /// invoked from deep inside `Evaluator::eval_expr` — can reach back out
    /// to the scheduler without threading a handle through every call.
    static CURRENT_SCOPE: RefCell<Vec<*mut Scope<'static, Resume, Suspend>>> = const { RefCell::new(Vec::new()) };
}

/// Called from [`crate::core::eval::Evaluator`]'s `Expr::Await` arm when
/// running inside a coroutine fiber. Yields `Suspend::Await(promise)` out
/// to the scheduler and blocks the fiber's native stack until resumed.
pub fn await_value(promise: Value) -> Result<Value, Signal> {
    suspend(Suspend::Await(promise)).map(|r| match r {
        Resume::Value(v) => Ok(v),
        Resume::Throw(v) => Err(Signal::Thrown(v)),
        Resume::Next(v) => Ok(v),
    })?
}

/// Called from `Expr::Yield`. Yields `Suspend::Yield(value)` out to
/// whichever caller is driving this generator's `.next()`.
pub fn yield_value(value: Value) -> Result<Value, Signal> {
    suspend(Suspend::Yield(value)).map(|r| match r {
        Resume::Next(v) => Ok(v),
        Resume::Value(v) => Ok(v),
        Resume::Throw(v) => Err(Signal::Thrown(v)),
    })?
}

/// Whether the calling statement is executing inside a coroutine fiber
/// (as opposed to a top-level `Evaluator::run_program` call or a
/// directly-invoked native). Consulted by `Evaluator`'s `Expr::Await`/
/// `Expr::Yield` arms to choose between the full suspending path here
/// and the degraded synchronous fallback used outside any fiber.
pub fn is_in_fiber() -> bool {
    CURRENT_SCOPE.with(|stack| !stack.borrow().is_empty())
}

fn suspend(msg: Suspend) -> Result<Resume, Signal> {
    let scope_ptr = CURRENT_SCOPE.with(|stack| stack.borrow().last().copied());
    let Some(ptr) = scope_ptr else {
        return Err(Signal::Js(JSError::type_error("await/yield used outside a coroutine fiber")));
    };
    // SAFETY: `ptr` was pushed by `spawn`'s scope closure for the lifetime of
    // the enclosing `Fiber::resume`/`send` call, which outlives this suspend
    // point since the fiber's own native stack is parked, not unwound, and no
    // other code touches this `Scope` while the fiber is parked.
    let scope = unsafe { &mut *ptr };
    scope.yield_(msg).ok_or(Signal::Js(JSError::CoroutineCancelled))
}

/// A single coroutine record: one async-function/generator invocation.
pub struct Coroutine {
    fiber: Fiber,
    pub done: bool,
    pub settled: bool,
    /// The promise returned to the caller for an async function, or the
    /// generator object's backing identity for a generator — opaque to
    /// the scheduler itself.
    pub handle: Value,
    /// Every other `Value` this coroutine's parked native stack still
    /// holds and that isn't reachable any other way while it's
    /// suspended — the captured `this`/arguments it was invoked with,
    /// plus whatever it's currently blocked on (an awaited promise, or
    /// the most recent `yield`'s argument). `Scheduler` folds this
    /// together with `handle` into the evaluator's GC root set.
    pub roots: Vec<Value>,
}

impl Coroutine {
    pub fn is_ready(&self) -> bool {
        !self.done
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }
}

/// Spawn a fiber that runs `body` (a closure invoking the async
/// function/generator's statement list against `ev`) to completion,
/// parking at every [`await_value`]/[`yield_value`] call.
///
/// `body` receives `&mut Evaluator` reborrowed through a raw pointer
/// stashed for the fiber's duration: the `generator` crate's fibers are
/// `'static`, so the closure cannot borrow `ev` directly across a
/// suspension point. Safety holds because the scheduler never resumes two
/// fibers concurrently and never touches `ev` while a fiber is parked mid
/// `resume`/`send` call — exactly the same single-threaded, one-fiber-on
/// the-native-stack-at-a-time discipline [`GcScheduler::enter_coroutine`]
/// already assumes.
pub fn spawn(ev_ptr: *mut Evaluator, handle: Value, initial_roots: Vec<Value>, body: impl FnOnce(*mut Evaluator) -> Result<Value, Signal> + 'static) -> Coroutine {
    let fiber: Fiber = Gn::new_scoped_opt(DEFAULT_FIBER_STACK, move |mut scope| {
        let ptr: *mut Scope<'static, Resume, Suspend> = &mut scope;
        CURRENT_SCOPE.with(|stack| stack.borrow_mut().push(ptr));
        let result = body(ev_ptr);
        CURRENT_SCOPE.with(|stack| {
            stack.borrow_mut().pop();
        });
        scope.yield_with(Suspend::Done(result));
        Suspend::Done(Ok(Value::UNDEFINED))
    });
    Coroutine { fiber, done: false, settled: false, handle, roots: initial_roots }
}

/// The cooperative scheduler: a ready queue of coroutine ids, each driven
/// one resume-step at a time. Owned by [`crate::event_loop`]'s driver
/// alongside the microtask queue and timer thread.
pub struct Scheduler {
    coroutines: Vec<Option<Coroutine>>,
    ready: VecDeque<usize>,
    /// Shared with the owning [`Evaluator`]'s `coroutine_roots` cell —
    /// [`Evaluator::collect_garbage`] reads it as an extra root source so
    /// a parked fiber's live values aren't invisible to the GC just
    /// because they live outside any field `Evaluator` itself holds.
    gc_roots: std::rc::Rc<RefCell<Vec<Value>>>,
}

impl Scheduler {
    pub fn new(gc_roots: std::rc::Rc<RefCell<Vec<Value>>>) -> Scheduler {
        Scheduler { coroutines: Vec::new(), ready: VecDeque::new(), gc_roots }
    }

    /// Recomputes the shared GC root cell from every live coroutine's
    /// `handle` plus its extra `roots`. Called after anything that adds,
    /// retires, or updates a coroutine record.
    fn sync_gc_roots(&self) {
        let mut out = Vec::new();
        for co in self.coroutines.iter().flatten() {
            out.push(co.handle);
            out.extend_from_slice(&co.roots);
        }
        *self.gc_roots.borrow_mut() = out;
    }

    pub fn register(&mut self, co: Coroutine) -> usize {
        let id = self.coroutines.len();
        self.coroutines.push(Some(co));
        self.ready.push_back(id);
        self.sync_gc_roots();
        id
    }

    pub fn mark_ready(&mut self, id: usize) {
        if matches!(self.coroutines.get(id), Some(Some(_))) {
            self.ready.push_back(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Drain the ready queue to a fixed point, resuming each coroutine's
    /// fiber with `Resume::Next(UNDEFINED)`. Callers that need to deliver
    /// a specific resume value (a settled promise, a `.next(v)` argument)
    /// should call [`Self::resume_with`] directly instead.
    pub fn run_ready(&mut self, ev: &mut Evaluator) -> Result<(), JSError> {
        let mut iterations = 0;
        while let Some(id) = self.ready.pop_front() {
            iterations += 1;
            if iterations > CORO_PER_TICK_LIMIT {
                return Err(JSError::FatalCoroutineLimit { limit: CORO_PER_TICK_LIMIT });
            }
            self.resume_with(ev, id, Resume::Next(Value::UNDEFINED))?;
        }
        Ok(())
    }

    /// Resume coroutine `id` with `input`, handling the `Suspend` it
    /// yields back: `Await` registers a `.then()` continuation that calls
    /// back into [`Self::resume_with`]; `Yield` leaves the coroutine
    /// parked until the next explicit `.next()`; `Done` retires it.
    pub fn resume_with(&mut self, ev: &mut Evaluator, id: usize, input: Resume) -> Result<(), JSError> {
        ev.gc.enter_coroutine();
        let outcome = {
            let Some(Some(co)) = self.coroutines.get_mut(id) else {
                ev.gc.leave_coroutine();
                return Ok(());
            };
            co.fiber.send(input)
        };
        ev.gc.leave_coroutine();
        match outcome {
            Suspend::Await(promise) => {
                if let Some(Some(co)) = self.coroutines.get_mut(id) {
                    co.roots = vec![promise];
                }
                self.sync_gc_roots();
                let on_settle_fulfilled = self.make_resume_native(ev, id, true);
                let on_settle_rejected = self.make_resume_native(ev, id, false);
                match crate::js_promise::promise_then(ev, promise, Some(on_settle_fulfilled), Some(on_settle_rejected)) {
                    Ok(_) => Ok(()),
                    Err(Signal::Js(e)) => Err(e),
                    Err(_) => Ok(()),
                }
            }
            Suspend::Yield(value) => {
                if let Some(Some(co)) = self.coroutines.get_mut(id) {
                    co.settled = false;
                    co.handle = value;
                    co.roots = vec![value];
                }
                self.sync_gc_roots();
                Ok(())
            }
            Suspend::Done(result) => {
                if let Some(Some(co)) = self.coroutines.get_mut(id) {
                    co.done = true;
                    co.settled = true;
                }
                let settled = match result {
                    Ok(value) => {
                        if let Some(Some(co)) = self.coroutines.get_mut(id) {
                            let promise = co.handle;
                            crate::js_promise::resolve_promise(ev, promise, value)
                        } else {
                            Ok(Value::UNDEFINED)
                        }
                    }
                    Err(Signal::Thrown(reason)) => {
                        if let Some(Some(co)) = self.coroutines.get_mut(id) {
                            let promise = co.handle;
                            crate::js_promise::reject_promise(ev, promise, reason)
                        } else {
                            Ok(Value::UNDEFINED)
                        }
                    }
                    Err(Signal::Js(e)) => Err(Signal::Js(e)),
                    Err(_) => Ok(Value::UNDEFINED),
                };
                let settle_result = match settled {
                    Ok(_) => Ok(()),
                    Err(Signal::Js(e)) => Err(e),
                    Err(_) => Ok(()),
                };
                self.coroutines[id] = None;
                self.sync_gc_roots();
                settle_result
            }
        }
    }

    /// Builds the native that resumes coroutine `id` when a `.then()`
    /// reaction fires. Captures a raw pointer back to this `Scheduler`
    /// rather than threading `&mut Scheduler` through `Evaluator::natives`
    /// (whose `NativeFn` shape has no room for it) — sound because the
    /// `Scheduler` is owned by [`crate::event_loop::EventLoop`] for the
    /// whole program run, strictly outliving any promise continuation
    /// registered against it.
    fn make_resume_native(&mut self, ev: &mut Evaluator, id: usize, fulfilled: bool) -> Value {
        use crate::core::value::Tag;
        use std::rc::Rc;
        let sched_ptr: *mut Scheduler = self;
        let idx = ev.register_native(Rc::new(move |ev, _this, args| {
            let value = args.first().copied().unwrap_or(Value::UNDEFINED);
            let resume = if fulfilled { Resume::Value(value) } else { Resume::Throw(value) };
            // SAFETY: see doc comment on `make_resume_native`.
            let scheduler = unsafe { &mut *sched_ptr };
            scheduler.resume_with(ev, id, resume).map_err(Signal::Js)?;
            Ok(Value::UNDEFINED)
        }));
        Value::make(Tag::NativeFunction, idx as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::Heap;

    #[test]
    fn a_coroutine_that_never_awaits_settles_immediately() {
        let mut ev = Evaluator::new(Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap(), "<test>");
        crate::js_promise::install(&mut ev).unwrap();
        let promise = ev.heap.new_promise().unwrap();
        let ev_ptr: *mut Evaluator = &mut ev;
        let co = spawn(ev_ptr, promise, vec![promise], |_ev_ptr| Ok(Value::number(42.0)));
        let mut sched = Scheduler::new(std::rc::Rc::new(RefCell::new(Vec::new())));
        let id = sched.register(co);
        sched.resume_with(&mut ev, id, Resume::Next(Value::UNDEFINED)).unwrap();
        assert_eq!(ev.heap.promise(promise).unwrap().value, Value::number(42.0));
    }
}
