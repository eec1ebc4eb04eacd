//! §4.F Scope chain.
//!
//! Each running scope is a parent-linked lookup frame. Function scopes
//! are the unit `var` hoists to; block scopes (`{}`, `for`, `catch`) hold
//! only `let`/`const` bindings introduced directly inside them. Lookup
//! walks the chain iteratively from innermost to outermost, matching the
//! object-prototype walk in [`crate::core::object::lookup_chain`] so both
//! "is this name visible" questions share one mental model.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::core::value::Value;
use crate::error::JSError;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BindingKind {
    Var,
    Let,
    Const,
}

struct Binding {
    value: Value,
    kind: BindingKind,
    initialized: bool,
}

pub struct Scope {
    pub kind: ScopeKind,
    parent: Option<ScopeHandle>,
    bindings: HashMap<String, Binding>,
}

/// A shared handle to a scope. Functions close over this (not a borrow),
/// so the same scope chain can be re-entered by multiple calls — the
/// defining feature of a closure. Cloning is cheap (refcount bump).
#[derive(Clone)]
pub struct ScopeHandle(Rc<RefCell<Scope>>);

impl ScopeHandle {
    pub fn new_global() -> ScopeHandle {
        ScopeHandle(Rc::new(RefCell::new(Scope { kind: ScopeKind::Global, parent: None, bindings: HashMap::new() })))
    }

    pub fn child(&self, kind: ScopeKind) -> ScopeHandle {
        ScopeHandle(Rc::new(RefCell::new(Scope { kind, parent: Some(self.clone()), bindings: HashMap::new() })))
    }

    pub fn parent(&self) -> Option<ScopeHandle> {
        self.0.borrow().parent.clone()
    }

    /// The nearest enclosing function (or global) scope — where `var`
    /// declarations hoist to.
    fn hoist_target(&self) -> ScopeHandle {
        let mut cur = self.clone();
        loop {
            let is_block = cur.0.borrow().kind == ScopeKind::Block;
            if !is_block {
                return cur;
            }
            let next = cur.0.borrow().parent.clone().expect("block scope always has a parent");
            cur = next;
        }
    }

    /// Declare a `var` binding, hoisting it to the enclosing function
    /// scope. Re-declaration is allowed and simply leaves the existing
    /// value (hoisting runs before execution, so the first visit wins).
    pub fn declare_var(&self, name: &str) {
        let target = self.hoist_target();
        target.0.borrow_mut().bindings.entry(name.to_string()).or_insert(Binding { value: Value::UNDEFINED, kind: BindingKind::Var, initialized: true });
    }

    /// Declare a `let`/`const` binding in this exact scope, uninitialized
    /// (temporal-dead-zone) until [`ScopeHandle::initialize`] runs at the
    /// binding's declaration point.
    pub fn declare_lexical(&self, name: &str, kind: BindingKind) -> Result<(), JSError> {
        let mut scope = self.0.borrow_mut();
        if scope.bindings.contains_key(name) {
            return Err(JSError::syntax_error(format!("Identifier '{name}' has already been declared")));
        }
        scope.bindings.insert(name.to_string(), Binding { value: Value::UNDEFINED, kind, initialized: false });
        Ok(())
    }

    pub fn initialize(&self, name: &str, value: Value) {
        if let Some(b) = self.0.borrow_mut().bindings.get_mut(name) {
            b.value = value;
            b.initialized = true;
        }
    }

    /// Resolve `name`, walking outward. Strict mode distinguishes an
    /// unresolved reference (ReferenceError) from non-strict code, which
    /// the evaluator handles by installing an implicit global instead —
    /// that policy lives in the evaluator, not here, since this layer has
    /// no notion of "the global object" (only the global *scope*).
    pub fn resolve(&self, name: &str) -> Result<Value, JSError> {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur {
            let s = scope.0.borrow();
            if let Some(b) = s.bindings.get(name) {
                if !b.initialized {
                    return Err(JSError::reference_error(format!("Cannot access '{name}' before initialization")));
                }
                return Ok(b.value);
            }
            cur = s.parent.clone();
        }
        Err(JSError::reference_error(format!("{name} is not defined")))
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), JSError> {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur {
            let mut s = scope.0.borrow_mut();
            if let Some(b) = s.bindings.get_mut(name) {
                if !b.initialized {
                    return Err(JSError::reference_error(format!("Cannot access '{name}' before initialization")));
                }
                if b.kind == BindingKind::Const {
                    return Err(JSError::type_error(format!("Assignment to constant variable '{name}'")));
                }
                b.value = value;
                return Ok(());
            }
            let next = s.parent.clone();
            drop(s);
            cur = next;
        }
        Err(JSError::reference_error(format!("{name} is not defined")))
    }

    pub fn trace(&self, visit: &mut dyn FnMut(Value)) {
        self.trace_bindings(&mut |_, _, v| visit(v));
    }

    /// Like [`trace`](Self::trace) but also yields the owning scope handle
    /// and binding name for each value, so a GC pass can write a relocated
    /// value back to the exact binding it came from.
    pub fn trace_bindings(&self, visit: &mut dyn FnMut(ScopeHandle, String, Value)) {
        let s = self.0.borrow();
        for (name, b) in s.bindings.iter() {
            if b.initialized {
                visit(self.clone(), name.clone(), b.value);
            }
        }
        if let Some(p) = &s.parent {
            p.trace_bindings(visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_hoists_through_block_scopes_to_function_scope() {
        let func = ScopeHandle::new_global().child(ScopeKind::Function);
        let block = func.child(ScopeKind::Block);
        block.declare_var("x");
        block.initialize("x", Value::number(1.0));
        assert_eq!(block.resolve("x").unwrap(), Value::number(1.0));
        assert!(func.has_own("x"));
    }

    #[test]
    fn let_is_block_scoped_and_invisible_from_parent() {
        let func = ScopeHandle::new_global().child(ScopeKind::Function);
        let block = func.child(ScopeKind::Block);
        block.declare_lexical("y", BindingKind::Let).unwrap();
        block.initialize("y", Value::number(2.0));
        assert_eq!(block.resolve("y").unwrap(), Value::number(2.0));
        assert!(!func.has_own("y"));
    }

    #[test]
    fn temporal_dead_zone_blocks_read_before_initialize() {
        let s = ScopeHandle::new_global();
        s.declare_lexical("z", BindingKind::Let).unwrap();
        assert!(s.resolve("z").is_err());
    }

    #[test]
    fn const_rejects_reassignment() {
        let s = ScopeHandle::new_global();
        s.declare_lexical("c", BindingKind::Const).unwrap();
        s.initialize("c", Value::number(1.0));
        assert!(s.assign("c", Value::number(2.0)).is_err());
    }

    #[test]
    fn unresolved_identifier_is_reference_error() {
        let s = ScopeHandle::new_global();
        assert!(s.resolve("nope").is_err());
    }

    #[test]
    fn cloned_handle_shares_the_same_underlying_bindings() {
        let s = ScopeHandle::new_global();
        s.declare_var("shared");
        let captured = s.clone();
        s.initialize("shared", Value::number(7.0));
        assert_eq!(captured.resolve("shared").unwrap(), Value::number(7.0));
    }
}
