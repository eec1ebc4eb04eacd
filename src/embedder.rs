//! §6 embedder API: the stable surface a host program links against.
//!
//! A [`Runtime`] bundles an [`Evaluator`] (values, heap, GC) with an
//! [`EventLoop`] (timers, microtasks, coroutines) behind the handful of
//! operations a host actually needs: create it, feed it source, call
//! back into it, drain its loop, tear it down. Everything below is safe
//! Rust — no `JSValue`/`JSContext` pointer juggling, since this crate
//! has no C ABI layer to mirror.

use crate::core::eval::{Evaluator, Signal};
use crate::core::heap::Heap;
use crate::core::parser::Parser;
use crate::core::value::Value;
use crate::error::JSError;
use crate::event_loop::EventLoop;

/// Memory bounds for a runtime's single arena, matching `ant`'s
/// `--initial-mem`/`--max-mem` flags.
#[derive(Clone, Copy, Debug)]
pub struct MemoryConfig {
    pub initial_bytes: usize,
    pub max_bytes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig { initial_bytes: 256 * 1024, max_bytes: 64 * 1024 * 1024 }
    }
}

/// A single JS execution context: one evaluator, one event loop, one
/// arena. Create one per isolated script; there is no shared-heap
/// multi-context support (§6 Non-goals).
pub struct Runtime {
    pub ev: Evaluator,
    pub loop_: EventLoop,
}

impl Runtime {
    /// `js_create`: allocate the arena, install every built-in
    /// prototype/constructor, and stand up an idle event loop.
    pub fn create(filename: &str, mem: MemoryConfig) -> Result<Runtime, JSError> {
        let heap = Heap::new(mem.initial_bytes, mem.max_bytes)?;
        let mut ev = Evaluator::new(heap, filename);
        install_builtins(&mut ev)?;
        let coroutine_roots = ev.coroutine_roots.clone();
        Ok(Runtime { ev, loop_: EventLoop::new(coroutine_roots) })
    }

    /// `js_create_dynamic`: like [`Self::create`] but with the default
    /// memory bounds, for embedders that don't need to tune them.
    pub fn create_dynamic(filename: &str) -> Result<Runtime, JSError> {
        Self::create(filename, MemoryConfig::default())
    }

    /// `js_eval`: parse and run `source` to completion as a top-level
    /// program, returning its completion value. Does not drain the
    /// event loop — call [`Self::run_to_completion`] afterward if
    /// `source` scheduled timers, promises, or coroutines.
    pub fn eval(&mut self, source: &str) -> Result<Value, JSError> {
        let program = Parser::new(source, &self.ev.filename)?.parse_program()?;
        self.ev.run_program(&program)
    }

    /// `js_call`: invoke a JS function value with an explicit `this`
    /// and argument list, surfacing a thrown exception as a `JSError`.
    pub fn call(&mut self, func: Value, this: Value, args: &[Value]) -> Result<Value, JSError> {
        match self.ev.call(func, this, args) {
            Ok(v) => Ok(v),
            Err(Signal::Thrown(v)) => Err(self.ev.thrown_to_error(v)),
            Err(Signal::Js(e)) => Err(e),
            Err(_) => Ok(Value::UNDEFINED),
        }
    }

    /// `js_global`: the global object's scope, for reading/writing
    /// top-level bindings without round-tripping through source text.
    pub fn global_get(&self, name: &str) -> Result<Value, JSError> {
        self.ev.global.resolve(name)
    }

    pub fn global_set(&self, name: &str, value: Value) {
        if !self.ev.global.has_own(name) {
            self.ev.global.declare_var(name);
        }
        self.ev.global.initialize(name, value);
    }

    /// `js_mkscope`/`js_delscope` in miniature: a fresh child scope for
    /// embedder-driven evaluation that shouldn't leak into globals.
    pub fn new_scope(&self) -> crate::core::scope::ScopeHandle {
        self.ev.global.child(crate::core::scope::ScopeKind::Block)
    }

    /// `js_run_loop`: drain timers, microtasks, and coroutines until
    /// nothing is pending.
    pub fn run_to_completion(&mut self) -> Result<(), JSError> {
        self.loop_.run_to_completion(&mut self.ev)
    }

    /// One loop iteration, for embedders that drive their own outer
    /// poll loop (e.g. alongside other event sources).
    pub fn tick(&mut self) -> Result<(), JSError> {
        self.loop_.tick(&mut self.ev)
    }

    /// `js_gc`: force an unconditional collection now, bypassing the
    /// scheduler's cooldown/threshold policy.
    pub fn collect_garbage(&mut self) -> Result<crate::core::gc::GcStats, JSError> {
        self.ev.collect_garbage()
    }

    pub fn register_poller(&mut self, poller: Box<dyn crate::event_loop::IoPoller>) {
        self.loop_.register_poller(poller);
    }
}

/// Installs every `js_*` built-in module's prototype/constructor onto
/// `ev`'s global scope. Order matters only where one module's
/// constructor references another's prototype (none currently do),
/// so this is a flat sequence rather than a dependency graph.
pub fn install_builtins(ev: &mut Evaluator) -> Result<(), JSError> {
    crate::js_object::install(ev)?;
    crate::js_array::install(ev)?;
    crate::js_string::install(ev)?;
    crate::js_bigint::install(ev)?;
    crate::js_typedarray::install(ev)?;
    crate::js_promise::install(ev)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_returns_the_final_expression_statements_value() {
        let mut rt = Runtime::create_dynamic("<test>").unwrap();
        let v = rt.eval("1 + 2;").unwrap();
        assert_eq!(v.as_f64(), 3.0);
    }

    #[test]
    fn global_bindings_round_trip_through_the_embedder_accessors() {
        let rt = Runtime::create_dynamic("<test>").unwrap();
        rt.global_set("answer", Value::number(42.0));
        assert_eq!(rt.global_get("answer").unwrap().as_f64(), 42.0);
    }

    #[test]
    fn run_to_completion_is_a_no_op_when_nothing_is_pending() {
        let mut rt = Runtime::create_dynamic("<test>").unwrap();
        rt.eval("1;").unwrap();
        rt.run_to_completion().unwrap();
    }

    #[test]
    fn a_callback_handed_to_the_loop_directly_fires_on_drain() {
        let mut rt = Runtime::create_dynamic("<test>").unwrap();
        let idx = rt.ev.register_native(std::rc::Rc::new(|_ev, _this, _args| Ok(Value::number(7.0))));
        let callback = Value::make(crate::core::value::Tag::NativeFunction, idx as u64);
        rt.loop_.set_timeout(callback, std::time::Duration::from_millis(0));
        rt.run_to_completion().unwrap();
    }
}
