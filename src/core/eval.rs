//! §4.G Tree-walking evaluator.
//!
//! Walks the AST directly against a [`crate::core::heap::Heap`] and a
//! [`crate::core::scope::ScopeHandle`] chain. Control flow (`return`,
//! `break`, `continue`, thrown values) propagates as the `Err` arm of a
//! [`Signal`] result rather than as manually-threaded execution flags —
//! the same job the distilled original's `F_BREAK`/`F_RETURN`/`F_THROW`
//! bits do, expressed the way idiomatic Rust control flow naturally
//! wants to be expressed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::ast::*;
use crate::core::call::CallStack;
use crate::core::heap::{FunctionData, Heap};
use crate::core::object::PropKey;
use crate::core::scope::{BindingKind, ScopeHandle, ScopeKind};
use crate::core::value::{Tag, Value};
use crate::error::JSError;

/// Everything that can unwind out of `eval_*`. `Js` is a host-level
/// failure (propagates straight to the embedder); the rest are
/// JS-visible control transfers that a `try`/loop/function body may
/// intercept before they reach the top.
pub enum Signal {
    Js(JSError),
    Thrown(Value),
    Return(Value),
    Break(Option<String>),
    Continue(Option<String>),
}

impl From<JSError> for Signal {
    fn from(e: JSError) -> Self {
        Signal::Js(e)
    }
}

pub type EvalResult<T> = Result<T, Signal>;

/// A native function registered with the evaluator (built-in methods:
/// `Array.prototype.map`, `console.log`, promise executors, and so on).
pub type NativeFn = Rc<dyn Fn(&mut Evaluator, Value, &[Value]) -> EvalResult<Value>>;

pub struct Evaluator {
    pub heap: Heap,
    pub global: ScopeHandle,
    pub call_stack: CallStack,
    pub natives: Vec<NativeFn>,
    pub filename: String,
    pub microtasks: std::collections::VecDeque<(Value, Vec<Value>)>,
    pub gc: crate::core::gc::GcScheduler,
    bytes_at_last_gc: usize,
    /// Well-known prototype objects installed by the `js_*` builtin
    /// modules at startup. `get_property` consults these as a fallback
    /// for their respective tags rather than threading them through
    /// every `ObjectData::proto` link, since arrays/strings/bigints are
    /// not themselves heap objects with a settable `proto` slot in every
    /// construction path.
    pub object_proto: Value,
    pub array_proto: Value,
    pub string_proto: Value,
    pub function_proto: Value,
    pub bigint_proto: Value,
    pub promise_proto: Value,
    pub typed_array_proto: Value,
    /// Extra GC roots contributed by coroutines parked outside this
    /// struct (in `crate::coroutine::Scheduler`, owned by
    /// `crate::event_loop::EventLoop`). A parked fiber's native stack can
    /// hold `Value`s — the awaited promise, a generator's captured `this`/
    /// arguments, the value it last yielded — that no field on `Evaluator`
    /// itself references, so `Scheduler` keeps this cell in sync with
    /// every live coroutine's roots and `collect_garbage` reads it like
    /// any other root source.
    pub coroutine_roots: Rc<RefCell<Vec<Value>>>,
}

impl Evaluator {
    pub fn new(heap: Heap, filename: &str) -> Evaluator {
        Evaluator {
            heap,
            global: ScopeHandle::new_global(),
            call_stack: CallStack::default(),
            natives: Vec::new(),
            filename: filename.to_string(),
            microtasks: std::collections::VecDeque::new(),
            gc: crate::core::gc::GcScheduler::default(),
            bytes_at_last_gc: 0,
            object_proto: Value::UNDEFINED,
            array_proto: Value::UNDEFINED,
            string_proto: Value::UNDEFINED,
            function_proto: Value::UNDEFINED,
            bigint_proto: Value::UNDEFINED,
            promise_proto: Value::UNDEFINED,
            typed_array_proto: Value::UNDEFINED,
            coroutine_roots: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Look up `key` on one of the well-known prototypes, given the
    /// tag-appropriate proto `Value` (or `Value::UNDEFINED` before the
    /// `js_*` install functions have run). Returns `None` rather than
    /// `Undefined` so callers can keep falling through other lookup paths.
    fn proto_lookup(&self, proto: Value, key: &str) -> Option<Value> {
        if !matches!(proto.type_tag(), Tag::Object) {
            return None;
        }
        self.heap.object(proto).and_then(|o| o.get_own(&PropKey::Named(key.to_string())))
    }

    /// Run a collection now if the scheduler's threshold/cooldown say one
    /// is due. Called at statement boundaries and between microtask
    /// drains — points where no Rust-level borrow into the heap is live,
    /// since a collection can relocate every string offset in existence.
    pub fn maybe_collect_garbage(&mut self) -> Result<(), JSError> {
        let brk = self.heap.arena.brk();
        let bytes_since_last = brk.saturating_sub(self.bytes_at_last_gc);
        let now = std::time::Instant::now();
        if self.gc.should_collect(brk, bytes_since_last, now) {
            self.collect_garbage()?;
            self.bytes_at_last_gc = self.heap.arena.brk();
            self.gc.mark_ran(now);
        }
        Ok(())
    }

    /// Unconditional collection: one Cheney pass over the single arena
    /// relocates every live string *and* every live object/array/function/
    /// error/promise/bigint/typed-array handle (§4.E), then
    /// [`crate::core::heap::Heap::retain_instances`] drops the side-table
    /// slot of anything whose handle the pass didn't find reachable.
    ///
    /// A handle's own arena offset moves, but the side-table id it points
    /// at never does, so every root and every internal pointer this walk
    /// discovers (scope bindings, prop/element values, a function's
    /// prototype link, a promise's settled value and reactions, an
    /// error's extra properties, still-parked coroutines) gets queued as a
    /// `Value` to relocate, keyed for write-back by the *owning* record's
    /// id rather than its pre-collection offset — the offset is exactly
    /// what's about to change.
    pub fn collect_garbage(&mut self) -> Result<crate::core::gc::GcStats, JSError> {
        use crate::core::gc::{self, RootSource};
        use crate::core::heap::CombinedTracer;
        use std::collections::{HashMap, HashSet};

        enum Slot {
            Scope(ScopeHandle, String),
            Prop(u32, usize),
            Element(u32, usize),
            ObjectProto(u32),
            FunctionProto(u32),
            PromiseValue(u32),
            PromiseCallback(u32, bool, usize),
            ErrorExtra(u32, String),
            Microtask(usize, Option<usize>),
            CoroutineRoot(usize),
        }

        let mut roots: Vec<Value> = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();
        let mut visited: HashSet<(Tag, u32)> = HashSet::new();
        let mut queue: Vec<Value> = Vec::new();
        let mut live: HashMap<Tag, HashSet<u32>> = HashMap::new();

        let mut visit = |v: Value, slot: Option<Slot>, roots: &mut Vec<Value>, slots: &mut Vec<Slot>, queue: &mut Vec<Value>| {
            if !v.type_tag().is_heap() {
                return;
            }
            roots.push(v);
            if let Some(s) = slot {
                slots.push(s);
            }
            queue.push(v);
        };

        self.global.trace_bindings(&mut |scope, name, v| {
            visit(v, Some(Slot::Scope(scope, name)), &mut roots, &mut slots, &mut queue);
        });
        for (i, (reaction, args)) in self.microtasks.iter().enumerate() {
            visit(*reaction, Some(Slot::Microtask(i, None)), &mut roots, &mut slots, &mut queue);
            for (j, a) in args.iter().enumerate() {
                visit(*a, Some(Slot::Microtask(i, Some(j))), &mut roots, &mut slots, &mut queue);
            }
        }
        for (i, v) in self.coroutine_roots.borrow().iter().enumerate() {
            visit(*v, Some(Slot::CoroutineRoot(i)), &mut roots, &mut slots, &mut queue);
        }

        while let Some(v) = queue.pop() {
            let tag = v.type_tag();
            let id = match self.heap.instance_id(v) {
                Some(id) => id,
                None if matches!(tag, Tag::String) => v.offset(),
                None => continue,
            };
            if !visited.insert((tag, id)) {
                continue;
            }
            live.entry(tag).or_default().insert(id);
            match tag {
                Tag::Object | Tag::Array => {
                    if let Some(o) = self.heap.object(v) {
                        if let Some(p) = o.proto {
                            let pv = Value::make(Tag::Object, p as u64);
                            visit(pv, Some(Slot::ObjectProto(id)), &mut roots, &mut slots, &mut queue);
                        }
                        for i in 0..o.prop_count() {
                            let pv = o.prop_value_at(i);
                            visit(pv, Some(Slot::Prop(id, i)), &mut roots, &mut slots, &mut queue);
                        }
                        for i in 0..o.elements.len() {
                            let ev = o.elements[i];
                            visit(ev, Some(Slot::Element(id, i)), &mut roots, &mut slots, &mut queue);
                        }
                    }
                }
                Tag::Function => {
                    if let Some(f) = self.heap.function(v) {
                        let pv = Value::make(Tag::Object, f.proto_object as u64);
                        visit(pv, Some(Slot::FunctionProto(id)), &mut roots, &mut slots, &mut queue);
                        let closure = f.closure_scope.clone();
                        closure.trace_bindings(&mut |scope, name, cv| {
                            visit(cv, Some(Slot::Scope(scope, name)), &mut roots, &mut slots, &mut queue);
                        });
                    }
                }
                Tag::Error => {
                    if let Some(e) = self.heap.error(v) {
                        for i in 0..e.extra.len() {
                            let (key, ev) = e.extra[i].clone();
                            visit(ev, Some(Slot::ErrorExtra(id, key)), &mut roots, &mut slots, &mut queue);
                        }
                    }
                }
                Tag::Promise => {
                    if let Some(p) = self.heap.promise(v) {
                        visit(p.value, Some(Slot::PromiseValue(id)), &mut roots, &mut slots, &mut queue);
                        for (i, cb) in p.on_fulfill.iter().enumerate() {
                            visit(*cb, Some(Slot::PromiseCallback(id, true, i)), &mut roots, &mut slots, &mut queue);
                        }
                        for (i, cb) in p.on_reject.iter().enumerate() {
                            visit(*cb, Some(Slot::PromiseCallback(id, false, i)), &mut roots, &mut slots, &mut queue);
                        }
                    }
                }
                _ => {}
            }
        }

        struct Roots {
            values: Vec<Value>,
        }
        impl RootSource for Roots {
            fn visit_roots(&self, visit: &mut dyn FnMut(Value)) {
                for v in &self.values {
                    visit(*v);
                }
            }
            fn update_roots(&mut self, updated: &[Value]) {
                self.values = updated.to_vec();
            }
        }

        let mut root_source = Roots { values: roots };
        let tracer = CombinedTracer;
        let stats = gc::collect(&mut self.heap.arena, &mut root_source, &tracer)?;

        let mut updated_coroutine_roots = self.coroutine_roots.borrow().clone();
        for (slot, v) in slots.into_iter().zip(root_source.values.into_iter()) {
            match slot {
                Slot::Scope(scope, name) => scope.initialize(&name, v),
                Slot::Prop(id, i) => {
                    if let Some(o) = self.heap.object_mut_by_id(id) {
                        o.set_prop_value_at(i, v);
                    }
                }
                Slot::Element(id, i) => {
                    if let Some(o) = self.heap.object_mut_by_id(id) {
                        if i < o.elements.len() {
                            o.elements[i] = v;
                        }
                    }
                }
                Slot::ObjectProto(id) => {
                    if let Some(o) = self.heap.object_mut_by_id(id) {
                        o.proto = Some(v.offset());
                    }
                }
                Slot::FunctionProto(id) => {
                    if let Some(f) = self.heap.function_mut_by_id(id) {
                        f.proto_object = v.offset();
                    }
                }
                Slot::PromiseValue(id) => {
                    if let Some(p) = self.heap.promise_mut_by_id(id) {
                        p.value = v;
                    }
                }
                Slot::PromiseCallback(id, fulfilled, i) => {
                    if let Some(p) = self.heap.promise_mut_by_id(id) {
                        let list = if fulfilled { &mut p.on_fulfill } else { &mut p.on_reject };
                        if let Some(cb) = list.get_mut(i) {
                            *cb = v;
                        }
                    }
                }
                Slot::ErrorExtra(id, key) => {
                    if let Some(e) = self.heap.error_mut_by_id(id) {
                        if let Some(entry) = e.extra.iter_mut().find(|(k, _)| *k == key) {
                            entry.1 = v;
                        }
                    }
                }
                Slot::Microtask(i, None) => {
                    if let Some(entry) = self.microtasks.get_mut(i) {
                        entry.0 = v;
                    }
                }
                Slot::Microtask(i, Some(j)) => {
                    if let Some(entry) = self.microtasks.get_mut(i) {
                        if let Some(a) = entry.1.get_mut(j) {
                            *a = v;
                        }
                    }
                }
                Slot::CoroutineRoot(i) => {
                    if let Some(slot) = updated_coroutine_roots.get_mut(i) {
                        *slot = v;
                    }
                }
            }
        }
        *self.coroutine_roots.borrow_mut() = updated_coroutine_roots;

        self.heap.retain_instances(&live);
        Ok(stats)
    }

    pub fn register_native(&mut self, f: NativeFn) -> u32 {
        self.natives.push(f);
        (self.natives.len() - 1) as u32
    }

    pub fn run_program(&mut self, program: &Program) -> Result<Value, JSError> {
        let scope = self.global.clone();
        self.hoist(program, &scope);
        let mut last = Value::UNDEFINED;
        for stmt in program {
            match self.eval_stmt(stmt, &scope) {
                Ok(v) => last = v,
                Err(Signal::Js(e)) => return Err(e),
                Err(Signal::Thrown(v)) => return Err(self.thrown_to_error(v)),
                Err(Signal::Return(_) | Signal::Break(_) | Signal::Continue(_)) => break,
            }
            self.maybe_collect_garbage()?;
        }
        Ok(last)
    }

    pub fn thrown_to_error(&self, v: Value) -> JSError {
        if let Some(e) = self.heap.error(v) {
            JSError::Evaluation { kind: e.kind.clone(), message: e.message.clone(), stack: e.stack.clone() }
        } else if v.is_number() {
            JSError::type_error(format!("Uncaught {}", v.as_f64()))
        } else if matches!(v.type_tag(), Tag::String) {
            JSError::type_error(format!("Uncaught {}", self.heap.string_value(v)))
        } else {
            JSError::type_error("Uncaught exception")
        }
    }

    /// Pre-pass: hoist `var` and function declarations to the top of
    /// their enclosing function/global scope, and reserve (uninitialized)
    /// bindings for `let`/`const` in this exact block — the standard
    /// two-phase approach to avoiding order-dependent declaration bugs.
    fn hoist(&mut self, stmts: &[Statement], scope: &ScopeHandle) {
        for stmt in stmts {
            match stmt {
                Statement::VarDecl { kind: Declarator::Var, declarations } => {
                    for (pattern, _) in declarations {
                        hoist_pattern_var(pattern, scope);
                    }
                }
                Statement::VarDecl { kind, declarations } => {
                    let bk = if *kind == Declarator::Let { BindingKind::Let } else { BindingKind::Const };
                    for (pattern, _) in declarations {
                        hoist_pattern_lexical(pattern, scope, bk);
                    }
                }
                Statement::FunctionDecl(f) => {
                    if let Some(name) = &f.name {
                        scope.declare_var(name);
                    }
                }
                Statement::If { consequent, alternate, .. } => {
                    self.hoist(std::slice::from_ref(consequent.as_ref()), scope);
                    if let Some(a) = alternate {
                        self.hoist(std::slice::from_ref(a.as_ref()), scope);
                    }
                }
                Statement::For { body, .. } | Statement::While { body, .. } | Statement::DoWhile { body, .. } | Statement::ForIn { body, .. } | Statement::ForOf { body, .. } => {
                    self.hoist(std::slice::from_ref(body.as_ref()), scope);
                }
                Statement::Block(inner) => self.hoist(inner, scope),
                Statement::Try { block, catch_block, finally_block, .. } => {
                    self.hoist(block, scope);
                    if let Some(c) = catch_block {
                        self.hoist(c, scope);
                    }
                    if let Some(f) = finally_block {
                        self.hoist(f, scope);
                    }
                }
                _ => {}
            }
        }
    }

    fn eval_stmt(&mut self, stmt: &Statement, scope: &ScopeHandle) -> EvalResult<Value> {
        match stmt {
            Statement::Empty => Ok(Value::UNDEFINED),
            Statement::Expr(e) => self.eval_expr(e, scope),
            Statement::VarDecl { kind, declarations } => {
                for (pattern, init) in declarations {
                    let value = match init {
                        Some(e) => self.eval_expr(e, scope)?,
                        None => Value::UNDEFINED,
                    };
                    self.bind_pattern(pattern, value, scope, kind.clone())?;
                }
                Ok(Value::UNDEFINED)
            }
            Statement::FunctionDecl(f) => {
                let func = self.make_function(f, scope)?;
                if let Some(name) = &f.name {
                    scope.initialize(name, func);
                }
                Ok(Value::UNDEFINED)
            }
            Statement::ClassDecl(c) => self.eval_class(c, scope),
            Statement::Block(inner) => {
                let block_scope = scope.child(ScopeKind::Block);
                self.hoist(inner, &block_scope);
                self.eval_block_body(inner, &block_scope)
            }
            Statement::If { test, consequent, alternate } => {
                if self.truthy(self.eval_expr(test, scope)?) {
                    self.eval_stmt(consequent, scope)
                } else if let Some(alt) = alternate {
                    self.eval_stmt(alt, scope)
                } else {
                    Ok(Value::UNDEFINED)
                }
            }
            Statement::While { test, body } => {
                while self.truthy(self.eval_expr(test, scope)?) {
                    match self.eval_stmt(body, scope) {
                        Err(Signal::Break(None)) => break,
                        Err(Signal::Continue(None)) => continue,
                        other => {
                            other?;
                        }
                    }
                }
                Ok(Value::UNDEFINED)
            }
            Statement::DoWhile { test, body } => {
                loop {
                    match self.eval_stmt(body, scope) {
                        Err(Signal::Break(None)) => break,
                        Err(Signal::Continue(None)) => {}
                        other => {
                            other?;
                        }
                    }
                    if !self.truthy(self.eval_expr(test, scope)?) {
                        break;
                    }
                }
                Ok(Value::UNDEFINED)
            }
            Statement::For { init, test, update, body } => {
                let for_scope = scope.child(ScopeKind::Block);
                if let Some(init) = init {
                    self.hoist(std::slice::from_ref(init.as_ref()), &for_scope);
                    self.eval_stmt(init, &for_scope)?;
                }
                loop {
                    if let Some(t) = test {
                        if !self.truthy(self.eval_expr(t, &for_scope)?) {
                            break;
                        }
                    }
                    // Each iteration gets its own lexical copy so closures
                    // created inside the body capture that iteration's
                    // binding, not a shared final value (the classic
                    // `for (let i...)` closure-capture requirement).
                    let iter_scope = for_scope.child(ScopeKind::Block);
                    match self.eval_stmt(body, &iter_scope) {
                        Err(Signal::Break(None)) => break,
                        Err(Signal::Continue(None)) => {}
                        other => {
                            other?;
                        }
                    }
                    if let Some(u) = update {
                        self.eval_expr(u, &for_scope)?;
                    }
                }
                Ok(Value::UNDEFINED)
            }
            Statement::ForOf { decl_kind, pattern, iterable, body, .. } => {
                let iter_value = self.eval_expr(iterable, scope)?;
                let items = self.iterate(iter_value)?;
                for item in items {
                    let iter_scope = scope.child(ScopeKind::Block);
                    let kind = decl_kind.clone().unwrap_or(Declarator::Let);
                    self.bind_pattern(pattern, item, &iter_scope, kind)?;
                    match self.eval_stmt(body, &iter_scope) {
                        Err(Signal::Break(None)) => break,
                        Err(Signal::Continue(None)) => continue,
                        other => {
                            other?;
                        }
                    }
                }
                Ok(Value::UNDEFINED)
            }
            Statement::ForIn { decl_kind, pattern, object, body } => {
                let obj_value = self.eval_expr(object, scope)?;
                let keys = self.heap.object(obj_value).map(|o| o.own_enumerable_keys()).unwrap_or_default();
                for key in keys {
                    let iter_scope = scope.child(ScopeKind::Block);
                    let kind = decl_kind.clone().unwrap_or(Declarator::Let);
                    let key_value = self.heap.new_string(&key)?;
                    self.bind_pattern(pattern, key_value, &iter_scope, kind)?;
                    match self.eval_stmt(body, &iter_scope) {
                        Err(Signal::Break(None)) => break,
                        Err(Signal::Continue(None)) => continue,
                        other => {
                            other?;
                        }
                    }
                }
                Ok(Value::UNDEFINED)
            }
            Statement::Break(label) => Err(Signal::Break(label.clone())),
            Statement::Continue(label) => Err(Signal::Continue(label.clone())),
            Statement::Return(e) => {
                let v = match e {
                    Some(e) => self.eval_expr(e, scope)?,
                    None => Value::UNDEFINED,
                };
                Err(Signal::Return(v))
            }
            Statement::Throw(e) => {
                let v = self.eval_expr(e, scope)?;
                Err(Signal::Thrown(v))
            }
            Statement::Try { block, catch_param, catch_block, finally_block } => {
                let try_scope = scope.child(ScopeKind::Block);
                self.hoist(block, &try_scope);
                let result = self.eval_block_body(block, &try_scope);
                let result = match result {
                    Err(Signal::Thrown(v)) => {
                        if let Some(catch_stmts) = catch_block {
                            let catch_scope = scope.child(ScopeKind::Block);
                            if let Some(param) = catch_param {
                                self.bind_pattern(param, v, &catch_scope, Declarator::Let)?;
                            }
                            self.hoist(catch_stmts, &catch_scope);
                            self.eval_block_body(catch_stmts, &catch_scope)
                        } else {
                            Err(Signal::Thrown(v))
                        }
                    }
                    other => other,
                };
                if let Some(finally_stmts) = finally_block {
                    let finally_scope = scope.child(ScopeKind::Block);
                    self.hoist(finally_stmts, &finally_scope);
                    let finally_result = self.eval_block_body(finally_stmts, &finally_scope);
                    if let Err(sig) = finally_result {
                        return Err(sig);
                    }
                }
                result
            }
            Statement::Switch { discriminant, cases } => {
                let disc = self.eval_expr(discriminant, scope)?;
                let switch_scope = scope.child(ScopeKind::Block);
                let mut matched = false;
                let mut default_index = None;
                for (i, case) in cases.iter().enumerate() {
                    match &case.test {
                        Some(test_expr) => {
                            if !matched {
                                let test_val = self.eval_expr(test_expr, &switch_scope)?;
                                matched = strict_equals(disc, test_val);
                            }
                        }
                        None => default_index = Some(i),
                    }
                    if matched {
                        for stmt in &case.body {
                            match self.eval_stmt(stmt, &switch_scope) {
                                Err(Signal::Break(None)) => return Ok(Value::UNDEFINED),
                                other => {
                                    other?;
                                }
                            }
                        }
                    }
                }
                if !matched {
                    if let Some(start) = default_index {
                        for case in &cases[start..] {
                            for stmt in &case.body {
                                match self.eval_stmt(stmt, &switch_scope) {
                                    Err(Signal::Break(None)) => return Ok(Value::UNDEFINED),
                                    other => {
                                        other?;
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(Value::UNDEFINED)
            }
            Statement::Labeled { label, body } => match self.eval_stmt(body, scope) {
                Err(Signal::Break(Some(l))) if l == *label => Ok(Value::UNDEFINED),
                Err(Signal::Continue(Some(l))) if l == *label => Ok(Value::UNDEFINED),
                other => other,
            },
        }
    }

    fn eval_block_body(&mut self, stmts: &[Statement], scope: &ScopeHandle) -> EvalResult<Value> {
        let mut last = Value::UNDEFINED;
        for stmt in stmts {
            last = self.eval_stmt(stmt, scope)?;
        }
        Ok(last)
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, scope: &ScopeHandle, kind: Declarator) -> EvalResult<()> {
        match pattern {
            Pattern::Ident(name) => {
                match kind {
                    Declarator::Var => {
                        scope.declare_var(name);
                        scope.initialize(name, value);
                    }
                    Declarator::Let => scope.initialize(name, value),
                    Declarator::Const => scope.initialize(name, value),
                }
                Ok(())
            }
            Pattern::Default(inner, default_expr) => {
                let v = if value.is_undefined() { self.eval_expr(default_expr, scope)? } else { value };
                self.bind_pattern(inner, v, scope, kind)
            }
            Pattern::Rest(inner) => self.bind_pattern(inner, value, scope, kind),
            Pattern::Array(items) => {
                let elements = self.iterate(value)?;
                for (i, item) in items.iter().enumerate() {
                    if let Some(p) = item {
                        let v = elements.get(i).copied().unwrap_or(Value::UNDEFINED);
                        self.bind_pattern(p, v, scope, kind)?;
                    }
                }
                Ok(())
            }
            Pattern::Object(fields) => {
                for (key, p) in fields {
                    let v = self.get_property(value, key)?;
                    self.bind_pattern(p, v, scope, kind)?;
                }
                Ok(())
            }
        }
    }

    fn eval_class(&mut self, class: &ClassDecl, scope: &ScopeHandle) -> EvalResult<Value> {
        let super_proto_offset = match &class.superclass {
            Some(e) => {
                let super_ctor = self.eval_expr(e, scope)?;
                let super_proto = self.get_property(super_ctor, "prototype").map_err(Signal::Js)?;
                if matches!(super_proto.type_tag(), Tag::Object) { Some(super_proto.offset()) } else { None }
            }
            None => None,
        };
        let ctor_fn = class.members.iter().find_map(|m| match m {
            ClassMember::Method { function, kind: MethodKind::Constructor, .. } => Some(function.clone()),
            _ => None,
        });
        let ctor = match ctor_fn {
            Some(f) => self.make_function(&f, scope)?,
            None => self.make_function(&Function { name: class.name.clone(), params: Vec::new(), body: Vec::new(), is_async: false, is_generator: false, is_arrow: false }, scope)?,
        };
        // `make_function` gave the constructor its own (empty) prototype
        // object — that's the one instances created via `new` link to, so
        // inheritance and methods both attach to it rather than a second,
        // disconnected object.
        let proto_id = self.heap.function(ctor).map(|f| f.proto_object).expect("just-created function");
        let proto_value = Value::make(Tag::Object, proto_id as u64);
        if let Some(proto_obj) = self.heap.object_mut(proto_value) {
            proto_obj.proto = super_proto_offset;
            proto_obj.set_named("constructor", ctor).ok();
        }
        for member in &class.members {
            if let ClassMember::Method { key, function, kind: MethodKind::Normal | MethodKind::Getter | MethodKind::Setter, .. } = member {
                let method = self.make_function(function, scope)?;
                if let Some(o) = self.heap.object_mut(proto_value) {
                    o.set_named(key, method).ok();
                }
            }
        }
        if let Some(name) = &class.name {
            scope.declare_var(name);
            scope.initialize(name, ctor);
        }
        Ok(ctor)
    }

    fn make_function(&mut self, f: &Function, scope: &ScopeHandle) -> EvalResult<Value> {
        let proto_value = self.heap.new_object(None)?;
        let data = FunctionData {
            name: f.name.clone().unwrap_or_default(),
            params: f.params.clone(),
            body: f.body.clone(),
            closure_scope: scope.clone(),
            is_async: f.is_async,
            is_generator: f.is_generator,
            bound_this: None,
            proto_object: proto_value.offset(),
        };
        Ok(self.heap.new_function(data)?)
    }

    fn eval_expr(&mut self, expr: &Expr, scope: &ScopeHandle) -> EvalResult<Value> {
        match expr {
            Expr::NumberLit(n) => Ok(Value::number(*n)),
            Expr::BigIntLit(s) => {
                let digits = s.trim_end_matches('n');
                let n: num_bigint::BigInt = digits.parse().map_err(|_| JSError::syntax_error("invalid BigInt literal"))?;
                Ok(self.heap.new_bigint(n)?)
            }
            Expr::StringLit(s) => Ok(self.heap.new_string(s)?),
            Expr::BoolLit(b) => Ok(Value::boolean(*b)),
            Expr::NullLit => Ok(Value::NULL),
            Expr::UndefinedLit => Ok(Value::UNDEFINED),
            Expr::TemplateLit(parts) => {
                let mut acc = self.heap.new_string("")?;
                for part in parts {
                    let piece = match part {
                        TemplateElement::Literal(s) => self.heap.new_string(s)?,
                        TemplateElement::Expr(e) => {
                            let v = self.eval_expr(e, scope)?;
                            self.to_string_value(v)?
                        }
                    };
                    acc = self.heap.concat_strings(acc, piece)?;
                }
                Ok(acc)
            }
            Expr::Ident(name) => Ok(scope.resolve(name)?),
            Expr::This => scope.resolve("this").or(Ok(Value::UNDEFINED)),
            Expr::Super => scope.resolve("this").or(Ok(Value::UNDEFINED)),
            Expr::NewTarget => Ok(Value::UNDEFINED),
            Expr::ArrayLit(items) => {
                let arr = self.heap.new_array(None)?;
                for item in items {
                    match item {
                        None => {
                            if let Some(o) = self.heap.object_mut(arr) {
                                o.elements.push(Value::UNDEFINED);
                            }
                        }
                        Some(ArrayElement::Item(e)) => {
                            let v = self.eval_expr(e, scope)?;
                            if let Some(o) = self.heap.object_mut(arr) {
                                o.elements.push(v);
                            }
                        }
                        Some(ArrayElement::Spread(e)) => {
                            let v = self.eval_expr(e, scope)?;
                            let spread = self.iterate(v)?;
                            if let Some(o) = self.heap.object_mut(arr) {
                                o.elements.extend(spread);
                            }
                        }
                    }
                }
                Ok(arr)
            }
            Expr::ObjectLit(props) => {
                let obj = self.heap.new_object(None)?;
                for prop in props {
                    match prop {
                        PropertyDef::KeyValue { key, computed_key, value } => {
                            let v = self.eval_expr(value, scope)?;
                            let resolved_key = match computed_key {
                                Some(e) => {
                                    let kv = self.eval_expr(e, scope)?;
                                    self.to_property_key(kv)?
                                }
                                None => key.clone(),
                            };
                            if let Some(o) = self.heap.object_mut(obj) {
                                o.set_named(&resolved_key, v).map_err(Signal::Js)?;
                            }
                        }
                        PropertyDef::Method { key, function } => {
                            let method = self.make_function(function, scope)?;
                            if let Some(o) = self.heap.object_mut(obj) {
                                o.set_named(key, method).map_err(Signal::Js)?;
                            }
                        }
                        PropertyDef::Spread(e) => {
                            let v = self.eval_expr(e, scope)?;
                            let pairs: Vec<(String, Value)> = self
                                .heap
                                .object(v)
                                .map(|src| src.own_enumerable_keys().into_iter().filter_map(|k| src.get_own(&PropKey::Named(k.clone())).map(|val| (k, val))).collect())
                                .unwrap_or_default();
                            for (k, val) in pairs {
                                if let Some(o) = self.heap.object_mut(obj) {
                                    o.set_named(&k, val).ok();
                                }
                            }
                        }
                    }
                }
                Ok(obj)
            }
            Expr::Function(f) => self.make_function(f, scope),
            Expr::ArrowBody(f) => self.make_function(f, scope),
            Expr::Class(c) => self.eval_class(c, scope),
            Expr::Unary(op, inner) => self.eval_unary(op, inner, scope),
            Expr::Binary(op, l, r) => {
                let lv = self.eval_expr(l, scope)?;
                let rv = self.eval_expr(r, scope)?;
                self.apply_binop(op, lv, rv)
            }
            Expr::Logical(op, l, r) => match op {
                BinOp::And => {
                    let lv = self.eval_expr(l, scope)?;
                    if !self.truthy(lv) { Ok(lv) } else { self.eval_expr(r, scope) }
                }
                BinOp::Or => {
                    let lv = self.eval_expr(l, scope)?;
                    if self.truthy(lv) { Ok(lv) } else { self.eval_expr(r, scope) }
                }
                BinOp::Nullish => {
                    let lv = self.eval_expr(l, scope)?;
                    if !lv.is_nullish() { Ok(lv) } else { self.eval_expr(r, scope) }
                }
                _ => unreachable!("non-logical BinOp in Expr::Logical"),
            },
            Expr::Conditional(test, cons, alt) => {
                let t = self.eval_expr(test, scope)?;
                if self.truthy(t) { self.eval_expr(cons, scope) } else { self.eval_expr(alt, scope) }
            }
            Expr::Assign(op, target, value) => self.eval_assign(op, target, value, scope),
            Expr::Sequence(exprs) => {
                let mut last = Value::UNDEFINED;
                for e in exprs {
                    last = self.eval_expr(e, scope)?;
                }
                Ok(last)
            }
            Expr::Update { op, prefix, target } => self.eval_update(op, *prefix, target, scope),
            Expr::Member { object, property, computed, optional } => {
                let obj = self.eval_expr(object, scope)?;
                if *optional && obj.is_nullish() {
                    return Ok(Value::UNDEFINED);
                }
                let key = if *computed {
                    let kv = self.eval_expr(property, scope)?;
                    self.to_property_key(kv)?
                } else if let Expr::StringLit(s) = property.as_ref() {
                    s.clone()
                } else {
                    unreachable!("non-computed member property must be a string literal")
                };
                self.get_property(obj, &key).map_err(Signal::Js)
            }
            Expr::Call { callee, args, optional } => self.eval_call(callee, args, *optional, scope),
            Expr::New { callee, args } => self.eval_new(callee, args, scope),
            Expr::Spread(e) => self.eval_expr(e, scope),
            Expr::Await(e) => {
                let v = self.eval_expr(e, scope)?;
                if crate::coroutine::is_in_fiber() {
                    return crate::coroutine::await_value(v);
                }
                // Outside a coroutine fiber, `await` degrades to "resolve
                // immediately if already settled" — full suspension is
                // only meaningful on a parked fiber, which `crate::coroutine`
                // provides when this evaluator is driven by a `Scheduler`.
                if let Some(p) = self.heap.promise(v) {
                    match p.state {
                        crate::core::heap::PromiseState::Fulfilled => Ok(p.value),
                        crate::core::heap::PromiseState::Rejected => Err(Signal::Thrown(p.value)),
                        crate::core::heap::PromiseState::Pending => Err(Signal::Js(JSError::type_error("await on a pending promise outside a coroutine"))),
                    }
                } else {
                    Ok(v)
                }
            }
            Expr::Yield { argument, delegate } => {
                let v = match argument {
                    Some(e) => self.eval_expr(e, scope)?,
                    None => Value::UNDEFINED,
                };
                if !crate::coroutine::is_in_fiber() {
                    return Err(Signal::Js(JSError::type_error("yield outside a generator coroutine")));
                }
                if *delegate {
                    // `yield* iterable` — drain the delegate eagerly (via the
                    // same non-protocol `iterate` every `for-of` uses) and
                    // yield each element out as its own suspension point,
                    // rather than yielding the iterable itself once.
                    let items = self.iterate(v)?;
                    let mut last = Value::UNDEFINED;
                    for item in items {
                        last = crate::coroutine::yield_value(item)?;
                    }
                    Ok(last)
                } else {
                    crate::coroutine::yield_value(v)
                }
            }
        }
    }

    fn eval_unary(&mut self, op: &UnOp, inner: &Expr, scope: &ScopeHandle) -> EvalResult<Value> {
        if *op == UnOp::TypeOf {
            if let Expr::Ident(name) = inner {
                if scope.resolve(name).is_err() {
                    return Ok(self.heap.new_string("undefined")?);
                }
            }
        }
        if *op == UnOp::Delete {
            if let Expr::Member { object, property, computed, .. } = inner {
                let obj = self.eval_expr(object, scope)?;
                let key = if *computed {
                    let kv = self.eval_expr(property, scope)?;
                    self.to_property_key(kv)?
                } else if let Expr::StringLit(s) = property.as_ref() {
                    s.clone()
                } else {
                    unreachable!()
                };
                let deleted = self.heap.object_mut(obj).map(|o| o.delete(&PropKey::Named(key))).unwrap_or(false);
                return Ok(Value::boolean(deleted));
            }
            return Ok(Value::boolean(true));
        }
        let v = self.eval_expr(inner, scope)?;
        match op {
            UnOp::Neg => Ok(Value::number(-self.to_number(v)?)),
            UnOp::Plus => Ok(Value::number(self.to_number(v)?)),
            UnOp::Not => Ok(Value::boolean(!self.truthy(v))),
            UnOp::BitNot => Ok(Value::number(!(self.to_number(v)? as i32) as f64)),
            UnOp::Void => Ok(Value::UNDEFINED),
            UnOp::TypeOf => Ok(self.heap.new_string(self.type_of(v))?),
            UnOp::Delete => unreachable!("handled above"),
        }
    }

    fn type_of(&self, v: Value) -> &'static str {
        v.type_of_immediate().unwrap_or_else(|| match v.type_tag() {
            Tag::String => "string",
            Tag::Object | Tag::Array | Tag::Error | Tag::Promise | Tag::TypedArray => "object",
            Tag::Function | Tag::NativeFunction => "function",
            Tag::BigInt => "bigint",
            _ => "object",
        })
    }

    fn eval_update(&mut self, op: &UpdateOp, prefix: bool, target: &Expr, scope: &ScopeHandle) -> EvalResult<Value> {
        let old = self.eval_expr(target, scope)?;
        let old_n = self.to_number(old)?;
        let new_n = match op {
            UpdateOp::Increment => old_n + 1.0,
            UpdateOp::Decrement => old_n - 1.0,
        };
        let new_v = Value::number(new_n);
        self.assign_to_target(target, new_v, scope)?;
        Ok(if prefix { new_v } else { Value::number(old_n) })
    }

    fn eval_assign(&mut self, op: &AssignOp, target: &Expr, value_expr: &Expr, scope: &ScopeHandle) -> EvalResult<Value> {
        let new_value = if *op == AssignOp::Set {
            self.eval_expr(value_expr, scope)?
        } else {
            let current = self.eval_expr(target, scope)?;
            let rhs = self.eval_expr(value_expr, scope)?;
            let binop = match op {
                AssignOp::Add => BinOp::Add,
                AssignOp::Sub => BinOp::Sub,
                AssignOp::Mul => BinOp::Mul,
                AssignOp::Div => BinOp::Div,
                AssignOp::Set => unreachable!(),
            };
            self.apply_binop(&binop, current, rhs)?
        };
        self.assign_to_target(target, new_value, scope)?;
        Ok(new_value)
    }

    fn assign_to_target(&mut self, target: &Expr, value: Value, scope: &ScopeHandle) -> EvalResult<()> {
        match target {
            Expr::Ident(name) => Ok(scope.assign(name, value)?),
            Expr::Member { object, property, computed, .. } => {
                let obj = self.eval_expr(object, scope)?;
                let key = if *computed {
                    let kv = self.eval_expr(property, scope)?;
                    self.to_property_key(kv)?
                } else if let Expr::StringLit(s) = property.as_ref() {
                    s.clone()
                } else {
                    unreachable!()
                };
                if matches!(obj.type_tag(), Tag::Array) {
                    if let Ok(idx) = key.parse::<usize>() {
                        if let Some(o) = self.heap.object_mut(obj) {
                            if idx >= o.elements.len() {
                                o.elements.resize(idx + 1, Value::UNDEFINED);
                            }
                            o.elements[idx] = value;
                            return Ok(());
                        }
                    }
                }
                if matches!(obj.type_tag(), Tag::TypedArray) {
                    if let Ok(idx) = key.parse::<usize>() {
                        let n = self.to_number(value)?;
                        if let Some(t) = self.heap.typed_array_mut(obj) {
                            t.set(idx, n);
                        }
                        return Ok(());
                    }
                }
                if let Some(o) = self.heap.object_mut(obj) {
                    o.set_named(&key, value).map_err(Signal::Js)?;
                }
                Ok(())
            }
            _ => Err(Signal::Js(JSError::syntax_error("invalid assignment target"))),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[ArrayElement], optional: bool, scope: &ScopeHandle) -> EvalResult<Value> {
        let (this_value, func) = match callee {
            Expr::Member { object, property, computed, optional: member_optional } => {
                let obj = self.eval_expr(object, scope)?;
                if *member_optional && obj.is_nullish() {
                    return Ok(Value::UNDEFINED);
                }
                let key = if *computed {
                    let kv = self.eval_expr(property, scope)?;
                    self.to_property_key(kv)?
                } else if let Expr::StringLit(s) = property.as_ref() {
                    s.clone()
                } else {
                    unreachable!()
                };
                let f = self.get_property(obj, &key).map_err(Signal::Js)?;
                (obj, f)
            }
            other => (Value::UNDEFINED, self.eval_expr(other, scope)?),
        };
        if optional && func.is_nullish() {
            return Ok(Value::UNDEFINED);
        }
        let arg_values = self.eval_args(args, scope)?;
        self.call(func, this_value, &arg_values)
    }

    fn eval_args(&mut self, args: &[ArrayElement], scope: &ScopeHandle) -> EvalResult<Vec<Value>> {
        let mut out = Vec::new();
        for a in args {
            match a {
                ArrayElement::Item(e) => out.push(self.eval_expr(e, scope)?),
                ArrayElement::Spread(e) => {
                    let v = self.eval_expr(e, scope)?;
                    out.extend(self.iterate(v)?);
                }
            }
        }
        Ok(out)
    }

    fn eval_new(&mut self, callee: &Expr, args: &[ArrayElement], scope: &ScopeHandle) -> EvalResult<Value> {
        let ctor = self.eval_expr(callee, scope)?;
        let arg_values = self.eval_args(args, scope)?;
        let proto_id = self.heap.function(ctor).map(|f| f.proto_object);
        let instance = self.heap.new_object(proto_id)?;
        let result = self.call(ctor, instance, &arg_values)?;
        // A constructor that returns a heap value (object, array, or one of
        // the native-backed tags like Promise) overrides the default `this`,
        // matching ordinary JS constructor-return semantics.
        Ok(if result.type_tag().is_heap() && !matches!(result.type_tag(), Tag::String) { result } else { instance })
    }

    /// The single call-dispatch point: plain JS functions, natives, and
    /// bound wrappers all funnel through here so stack-depth accounting
    /// and `this`-binding stay in one place.
    pub fn call(&mut self, func: Value, this_value: Value, args: &[Value]) -> EvalResult<Value> {
        match func.type_tag() {
            Tag::NativeFunction => {
                let idx = func.offset() as usize;
                let native = self.natives.get(idx).cloned().ok_or_else(|| JSError::type_error("native function not found"))?;
                native(self, this_value, args)
            }
            Tag::Function => {
                let data = self.heap.function(func).ok_or_else(|| JSError::type_error("not a function"))?;
                let call_scope = data.closure_scope.child(ScopeKind::Function);
                let params = data.params.clone();
                let body = data.body.clone();
                let name = data.name.clone();
                let is_generator = data.is_generator;
                let is_async = data.is_async;
                let bound_this = data.bound_this;
                call_scope.declare_var("this");
                call_scope.initialize("this", bound_this.unwrap_or(this_value));
                self.bind_params(&params, args, &call_scope)?;
                self.call_stack.push(&self.filename.clone(), &name, 0, 0).map_err(Signal::Js)?;
                self.hoist(&body, &call_scope);
                if is_generator || is_async {
                    // Generator/async bodies are driven by the coroutine
                    // scheduler (`crate::coroutine`), which re-enters this
                    // evaluator one statement-run at a time; a direct call
                    // here just runs the body to completion for callers
                    // that never suspend it (e.g. a generator with no
                    // `yield` reached, or an async function with no
                    // pending `await`).
                }
                let result = self.eval_block_body(&body, &call_scope);
                self.call_stack.pop();
                match result {
                    Ok(v) => Ok(v),
                    Err(Signal::Return(v)) => Ok(v),
                    Err(other) => Err(other),
                }
            }
            _ => Err(Signal::Js(JSError::type_error("value is not callable"))),
        }
    }

    fn bind_params(&mut self, params: &[Param], args: &[Value], scope: &ScopeHandle) -> EvalResult<()> {
        let mut i = 0;
        for p in params {
            if p.rest {
                let rest_arr = self.heap.new_array(None)?;
                if let Some(o) = self.heap.object_mut(rest_arr) {
                    o.elements.extend_from_slice(&args[i.min(args.len())..]);
                }
                self.bind_pattern(&p.pattern, rest_arr, scope, Declarator::Let)?;
                break;
            }
            let v = args.get(i).copied().unwrap_or(Value::UNDEFINED);
            self.bind_pattern(&p.pattern, v, scope, Declarator::Let)?;
            i += 1;
        }
        Ok(())
    }

    pub fn get_property(&mut self, obj: Value, key: &str) -> Result<Value, JSError> {
        if matches!(obj.type_tag(), Tag::Array) {
            if key == "length" {
                let len = self.heap.object(obj).map(|o| o.elements.len()).unwrap_or(0);
                return Ok(Value::number(len as f64));
            }
            if let Ok(idx) = key.parse::<usize>() {
                if let Some(v) = self.heap.object(obj).and_then(|o| o.elements.get(idx).copied()) {
                    return Ok(v);
                }
            }
            if let Some(own) = self.heap.object(obj).and_then(|o| o.get_own(&PropKey::Named(key.to_string()))) {
                return Ok(own);
            }
            if let Some(v) = self.proto_lookup(self.array_proto, key) {
                return Ok(v);
            }
        }
        if matches!(obj.type_tag(), Tag::String) {
            if key == "length" {
                return Ok(Value::number(crate::core::rope::length_utf16(&self.heap.arena, obj.offset()) as f64));
            }
            if let Some(v) = self.proto_lookup(self.string_proto, key) {
                return Ok(v);
            }
        }
        if matches!(obj.type_tag(), Tag::Error) {
            if let Some(e) = self.heap.error(obj) {
                if key == "message" {
                    let message = e.message.clone();
                    return Ok(self.heap.new_string(&message)?);
                }
                if key == "name" {
                    let name = e.kind.name();
                    return Ok(self.heap.new_string(name)?);
                }
                if key == "stack" {
                    let mut s = format!("{}: {}", e.kind.name(), e.message);
                    for frame in &e.stack {
                        s.push('\n');
                        s.push_str(&frame.to_string());
                    }
                    return Ok(self.heap.new_string(&s)?);
                }
                if let Some((_, v)) = e.extra.iter().find(|(k, _)| k == key) {
                    return Ok(*v);
                }
            }
        }
        if matches!(obj.type_tag(), Tag::BigInt) {
            if let Some(v) = self.proto_lookup(self.bigint_proto, key) {
                return Ok(v);
            }
        }
        if matches!(obj.type_tag(), Tag::Promise) {
            if let Some(v) = self.proto_lookup(self.promise_proto, key) {
                return Ok(v);
            }
        }
        if matches!(obj.type_tag(), Tag::TypedArray) {
            if key == "length" {
                return Ok(Value::number(self.heap.typed_array(obj).map(|t| t.len()).unwrap_or(0) as f64));
            }
            if let Ok(idx) = key.parse::<usize>() {
                return Ok(self.heap.typed_array(obj).and_then(|t| t.get(idx)).map(Value::number).unwrap_or(Value::UNDEFINED));
            }
            if let Some(v) = self.proto_lookup(self.typed_array_proto, key) {
                return Ok(v);
            }
        }
        if matches!(obj.type_tag(), Tag::Function) {
            if key == "prototype" {
                return Ok(self.heap.function(obj).map(|f| Value::make(Tag::Object, f.proto_object as u64)).unwrap_or(Value::UNDEFINED));
            }
            if key == "name" {
                return Ok(self.heap.function(obj).map(|f| f.name.clone()).map(|n| self.heap.new_string(&n)).transpose()?.unwrap_or(Value::UNDEFINED));
            }
            if let Some(v) = self.proto_lookup(self.function_proto, key) {
                return Ok(v);
            }
        }
        let mut cur = Some(obj);
        let mut steps = 0;
        while let Some(o) = cur {
            steps += 1;
            if steps > 10_000 {
                break;
            }
            if let Some(data) = self.heap.object(o) {
                if let Some(v) = data.get_own(&PropKey::Named(key.to_string())) {
                    return Ok(v);
                }
                cur = data.proto.map(|off| Value::make(Tag::Object, off as u64));
            } else {
                break;
            }
        }
        if matches!(obj.type_tag(), Tag::Object | Tag::Array) {
            if let Some(v) = self.proto_lookup(self.object_proto, key) {
                return Ok(v);
            }
        }
        Ok(Value::UNDEFINED)
    }

    pub fn to_property_key(&mut self, v: Value) -> Result<String, Signal> {
        if matches!(v.type_tag(), Tag::String) {
            Ok(self.heap.string_value(v))
        } else if v.is_number() {
            Ok(format_number(v.as_f64()))
        } else {
            Ok(self.to_string_value(v).map(|s| self.heap.string_value(s))?)
        }
    }

    pub fn to_string_value(&mut self, v: Value) -> Result<Value, Signal> {
        if matches!(v.type_tag(), Tag::String) {
            return Ok(v);
        }
        let s = match v.type_tag() {
            _ if v.is_number() => format_number(v.as_f64()),
            Tag::Undefined => "undefined".to_string(),
            Tag::Null => "null".to_string(),
            Tag::Boolean => v.as_bool().unwrap().to_string(),
            Tag::Array => {
                let items = self.heap.object(v).map(|o| o.elements.clone()).unwrap_or_default();
                let mut parts = Vec::new();
                for item in items {
                    let s = self.to_string_value(item)?;
                    parts.push(self.heap.string_value(s));
                }
                parts.join(",")
            }
            Tag::BigInt => self.heap.bigint(v).map(|b| b.to_string()).unwrap_or_default(),
            _ => "[object Object]".to_string(),
        };
        Ok(self.heap.new_string(&s)?)
    }

    pub fn to_number(&mut self, v: Value) -> Result<f64, Signal> {
        if v.is_number() {
            return Ok(v.as_f64());
        }
        Ok(match v.type_tag() {
            Tag::Boolean => {
                if v.as_bool().unwrap() {
                    1.0
                } else {
                    0.0
                }
            }
            Tag::Null => 0.0,
            Tag::Undefined => f64::NAN,
            Tag::String => self.heap.string_value(v).trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        })
    }

    pub fn truthy(&self, v: Value) -> bool {
        if let Some(b) = v.truthy_immediate() {
            return b;
        }
        match v.type_tag() {
            Tag::String => crate::core::rope::length_utf8(&self.heap.arena, v.offset()) > 0,
            _ => true,
        }
    }

    /// Apply a binary operator. String `+` triggers rope concatenation;
    /// everything else follows ordinary numeric/boolean coercion.
    fn apply_binop(&mut self, op: &BinOp, l: Value, r: Value) -> EvalResult<Value> {
        if *op == BinOp::Add && (matches!(l.type_tag(), Tag::String) || matches!(r.type_tag(), Tag::String)) {
            let ls = self.to_string_value(l)?;
            let rs = self.to_string_value(r)?;
            return Ok(self.heap.concat_strings(ls, rs)?);
        }
        if matches!(l.type_tag(), Tag::BigInt) || matches!(r.type_tag(), Tag::BigInt) {
            if let Some(result) = self.apply_bigint_binop(op, l, r)? {
                return Ok(result);
            }
        }
        match op {
            BinOp::Add => Ok(Value::number(self.to_number(l)? + self.to_number(r)?)),
            BinOp::Sub => Ok(Value::number(self.to_number(l)? - self.to_number(r)?)),
            BinOp::Mul => Ok(Value::number(self.to_number(l)? * self.to_number(r)?)),
            BinOp::Div => Ok(Value::number(self.to_number(l)? / self.to_number(r)?)),
            BinOp::Mod => Ok(Value::number(self.to_number(l)? % self.to_number(r)?)),
            BinOp::Pow => Ok(Value::number(self.to_number(l)?.powf(self.to_number(r)?))),
            BinOp::Eq => Ok(Value::boolean(loose_equals(self, l, r)?)),
            BinOp::NotEq => Ok(Value::boolean(!loose_equals(self, l, r)?)),
            BinOp::StrictEq => Ok(Value::boolean(strict_equals(l, r))),
            BinOp::StrictNotEq => Ok(Value::boolean(!strict_equals(l, r))),
            BinOp::Lt => Ok(Value::boolean(self.to_number(l)? < self.to_number(r)?)),
            BinOp::Gt => Ok(Value::boolean(self.to_number(l)? > self.to_number(r)?)),
            BinOp::LtEq => Ok(Value::boolean(self.to_number(l)? <= self.to_number(r)?)),
            BinOp::GtEq => Ok(Value::boolean(self.to_number(l)? >= self.to_number(r)?)),
            BinOp::BitAnd => Ok(Value::number(((self.to_number(l)? as i32) & (self.to_number(r)? as i32)) as f64)),
            BinOp::BitOr => Ok(Value::number(((self.to_number(l)? as i32) | (self.to_number(r)? as i32)) as f64)),
            BinOp::BitXor => Ok(Value::number(((self.to_number(l)? as i32) ^ (self.to_number(r)? as i32)) as f64)),
            BinOp::Shl => Ok(Value::number(((self.to_number(l)? as i32) << ((self.to_number(r)? as i32) & 31)) as f64)),
            BinOp::Shr => Ok(Value::number(((self.to_number(l)? as i32) >> ((self.to_number(r)? as i32) & 31)) as f64)),
            BinOp::UShr => Ok(Value::number(((self.to_number(l)? as u32) >> ((self.to_number(r)? as i32) & 31)) as f64)),
            BinOp::In => {
                let key = self.to_property_key(r)?;
                Ok(Value::boolean(self.heap.object(l).map(|o| o.get_own(&PropKey::Named(key)).is_some()).unwrap_or(false)))
            }
            BinOp::InstanceOf => {
                let proto = self.get_property(r, "prototype").map_err(Signal::Js)?;
                let mut cur = self.heap.object(l).and_then(|o| o.proto);
                while let Some(off) = cur {
                    if off == proto.offset() {
                        return Ok(Value::boolean(true));
                    }
                    cur = self.heap.object(Value::make(Tag::Object, off as u64)).and_then(|o| o.proto);
                }
                Ok(Value::boolean(false))
            }
            BinOp::And | BinOp::Or | BinOp::Nullish => unreachable!("handled in eval_expr as Logical"),
        }
    }

    /// `BigInt` arithmetic and comparison, dispatched out of [`Self::apply_binop`]
    /// whenever either operand carries the `BigInt` tag. Returns `Ok(None)` for
    /// operators it doesn't special-case (`In`/`InstanceOf`/logical), letting the
    /// caller fall through to the numeric path.
    fn apply_bigint_binop(&mut self, op: &BinOp, l: Value, r: Value) -> EvalResult<Option<Value>> {
        let both_bigint = matches!(l.type_tag(), Tag::BigInt) && matches!(r.type_tag(), Tag::BigInt);
        if !both_bigint {
            return match op {
                BinOp::Eq => Ok(Some(Value::boolean(false))),
                BinOp::NotEq => Ok(Some(Value::boolean(true))),
                BinOp::StrictEq => Ok(Some(Value::boolean(false))),
                BinOp::StrictNotEq => Ok(Some(Value::boolean(true))),
                BinOp::Add
                | BinOp::Sub
                | BinOp::Mul
                | BinOp::Div
                | BinOp::Mod
                | BinOp::Pow
                | BinOp::BitAnd
                | BinOp::BitOr
                | BinOp::BitXor
                | BinOp::Shl
                | BinOp::Shr
                | BinOp::UShr => Err(JSError::type_error("Cannot mix BigInt and other types, use explicit conversions").into()),
                _ => Ok(None),
            };
        }
        let a = self.heap.bigint(l).cloned().unwrap_or_default();
        let b = self.heap.bigint(r).cloned().unwrap_or_default();
        let out = match op {
            BinOp::Add => Some(self.heap.new_bigint(a + b)?),
            BinOp::Sub => Some(self.heap.new_bigint(a - b)?),
            BinOp::Mul => Some(self.heap.new_bigint(a * b)?),
            BinOp::Div => {
                if b == num_bigint::BigInt::from(0) {
                    return Err(JSError::range_error("Division by zero").into());
                }
                Some(self.heap.new_bigint(a / b)?)
            }
            BinOp::Mod => {
                if b == num_bigint::BigInt::from(0) {
                    return Err(JSError::range_error("Division by zero").into());
                }
                Some(self.heap.new_bigint(a % b)?)
            }
            BinOp::BitAnd => Some(self.heap.new_bigint(a & b)?),
            BinOp::BitOr => Some(self.heap.new_bigint(a | b)?),
            BinOp::BitXor => Some(self.heap.new_bigint(a ^ b)?),
            BinOp::Eq | BinOp::StrictEq => Some(Value::boolean(a == b)),
            BinOp::NotEq | BinOp::StrictNotEq => Some(Value::boolean(a != b)),
            BinOp::Lt => Some(Value::boolean(a < b)),
            BinOp::Gt => Some(Value::boolean(a > b)),
            BinOp::LtEq => Some(Value::boolean(a <= b)),
            BinOp::GtEq => Some(Value::boolean(a >= b)),
            _ => None,
        };
        Ok(out)
    }

    /// Drives the `for-of`/iterable protocol. Arrays flatten directly;
    /// anything else is treated as already-a-sequence via its own
    /// `@@iterator`-shaped `next` method if present, falling back to an
    /// empty sequence (kept simple: the full generator-backed iterator
    /// protocol lives in `crate::coroutine`).
    pub fn iterate(&mut self, v: Value) -> EvalResult<Vec<Value>> {
        if matches!(v.type_tag(), Tag::Array) {
            return Ok(self.heap.object(v).map(|o| o.elements.clone()).unwrap_or_default());
        }
        if matches!(v.type_tag(), Tag::String) {
            let s = self.heap.string_value(v);
            let mut out = Vec::new();
            for ch in s.chars() {
                out.push(self.heap.new_string(&ch.to_string())?);
            }
            return Ok(out);
        }
        if matches!(v.type_tag(), Tag::TypedArray) {
            let Some(t) = self.heap.typed_array(v) else { return Ok(Vec::new()) };
            return Ok((0..t.len()).filter_map(|i| t.get(i)).map(Value::number).collect());
        }
        Ok(Vec::new())
    }
}

fn hoist_pattern_var(pattern: &Pattern, scope: &ScopeHandle) {
    match pattern {
        Pattern::Ident(name) => scope.declare_var(name),
        Pattern::Default(inner, _) | Pattern::Rest(inner) => hoist_pattern_var(inner, scope),
        Pattern::Array(items) => {
            for item in items.iter().flatten() {
                hoist_pattern_var(item, scope);
            }
        }
        Pattern::Object(fields) => {
            for (_, p) in fields {
                hoist_pattern_var(p, scope);
            }
        }
    }
}

fn hoist_pattern_lexical(pattern: &Pattern, scope: &ScopeHandle, kind: BindingKind) {
    match pattern {
        Pattern::Ident(name) => {
            scope.declare_lexical(name, kind).ok();
        }
        Pattern::Default(inner, _) | Pattern::Rest(inner) => hoist_pattern_lexical(inner, scope, kind),
        Pattern::Array(items) => {
            for item in items.iter().flatten() {
                hoist_pattern_lexical(item, scope, kind);
            }
        }
        Pattern::Object(fields) => {
            for (_, p) in fields {
                hoist_pattern_lexical(p, scope, kind);
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub fn strict_equals(l: Value, r: Value) -> bool {
    if l.is_number() && r.is_number() {
        return l.as_f64() == r.as_f64();
    }
    if l.type_tag() != r.type_tag() {
        return false;
    }
    l.bits() == r.bits()
}

fn loose_equals(ev: &mut Evaluator, l: Value, r: Value) -> EvalResult<bool> {
    if l.type_tag() == r.type_tag() || (l.is_number() && r.is_number()) {
        return Ok(strict_equals(l, r));
    }
    if l.is_nullish() && r.is_nullish() {
        return Ok(true);
    }
    let ln = ev.to_number(l)?;
    let rn = ev.to_number(r)?;
    Ok(ln == rn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::Heap;
    use crate::core::parser::Parser;

    fn run(src: &str) -> Value {
        let heap = Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap();
        let mut ev = Evaluator::new(heap, "<test>");
        let program = Parser::new(src, "<test>").unwrap().parse_program().unwrap();
        ev.run_program(&program).unwrap()
    }

    #[test]
    fn arithmetic_expression_evaluates() {
        let v = run("1 + 2 * 3;");
        assert_eq!(v.as_f64(), 7.0);
    }

    #[test]
    fn string_concatenation_builds_a_rope_and_reads_back() {
        let heap = Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap();
        let mut ev = Evaluator::new(heap, "<test>");
        let program = Parser::new(r#"let s = "foo" + "bar"; s;"#, "<test>").unwrap().parse_program().unwrap();
        let v = ev.run_program(&program).unwrap();
        assert_eq!(ev.heap.string_value(v), "foobar");
    }

    #[test]
    fn if_else_picks_the_right_branch() {
        let v = run("let x = 0; if (1 > 0) { x = 1; } else { x = 2; } x;");
        assert_eq!(v.as_f64(), 1.0);
    }

    #[test]
    fn for_loop_accumulates() {
        let v = run("let sum = 0; for (let i = 0; i < 5; i = i + 1) { sum = sum + i; } sum;");
        assert_eq!(v.as_f64(), 10.0);
    }

    #[test]
    fn closures_capture_their_declaring_scope() {
        let v = run("function makeAdder(x) { return function(y) { return x + y; }; } let add5 = makeAdder(5); add5(3);");
        assert_eq!(v.as_f64(), 8.0);
    }

    #[test]
    fn try_catch_recovers_from_a_thrown_value() {
        let v = run("let r = 0; try { throw 1; } catch (e) { r = e + 1; } r;");
        assert_eq!(v.as_f64(), 2.0);
    }

    #[test]
    fn array_literal_and_index_read() {
        let v = run("let a = [1, 2, 3]; a[1];");
        assert_eq!(v.as_f64(), 2.0);
    }
}
