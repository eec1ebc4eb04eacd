//! Typed array constructors (`Int8Array`, `Float64Array`, ...) and
//! `TypedArray.prototype` element access.
//!
//! Kept deliberately modest: a typed array is a `Tag::TypedArray` value
//! backed by a flat byte buffer ([`crate::core::heap::TypedArrayData`]),
//! with indexed get/set handled directly in
//! [`crate::core::eval::Evaluator::get_property`]/`assign_to_target`, the
//! same split `Array`'s `length`/index fast path already uses. This module
//! only wires up the constructors and the handful of prototype methods
//! that don't need special per-index dispatch.

use std::rc::Rc;

use crate::core::eval::{EvalResult, Evaluator};
use crate::core::heap::TypedArrayKind;
use crate::core::value::{Tag, Value};
use crate::error::JSError;

const KINDS: &[(&str, TypedArrayKind)] = &[
    ("Int8Array", TypedArrayKind::Int8),
    ("Uint8Array", TypedArrayKind::Uint8),
    ("Uint8ClampedArray", TypedArrayKind::Uint8Clamped),
    ("Int16Array", TypedArrayKind::Int16),
    ("Uint16Array", TypedArrayKind::Uint16),
    ("Int32Array", TypedArrayKind::Int32),
    ("Uint32Array", TypedArrayKind::Uint32),
    ("Float32Array", TypedArrayKind::Float32),
    ("Float64Array", TypedArrayKind::Float64),
];

fn register_on(ev: &mut Evaluator, proto: Value, name: &str, f: impl Fn(&mut Evaluator, Value, &[Value]) -> EvalResult<Value> + 'static) {
    let idx = ev.register_native(Rc::new(f));
    let native = Value::make(Tag::NativeFunction, idx as u64);
    if let Some(o) = ev.heap.object_mut(proto) {
        let _ = o.set_named(name, native);
    }
}

pub fn install(ev: &mut Evaluator) -> Result<(), JSError> {
    ev.typed_array_proto = ev.heap.new_object(None)?;

    register_on(ev, ev.typed_array_proto, "fill", |ev, this, args| {
        let value = args.first().copied().map(|v| ev.to_number(v)).transpose()?.unwrap_or(0.0);
        if let Some(t) = ev.heap.typed_array_mut(this) {
            for i in 0..t.len() {
                t.set(i, value);
            }
        }
        Ok(this)
    });

    register_on(ev, ev.typed_array_proto, "set", |ev, this, args| {
        let source = args.first().copied().unwrap_or(Value::UNDEFINED);
        let offset = args.get(1).copied().map(|v| ev.to_number(v)).transpose()?.unwrap_or(0.0) as usize;
        let values = ev.iterate(source)?;
        for (i, v) in values.into_iter().enumerate() {
            let n = ev.to_number(v)?;
            if let Some(t) = ev.heap.typed_array_mut(this) {
                t.set(offset + i, n);
            }
        }
        Ok(Value::UNDEFINED)
    });

    register_on(ev, ev.typed_array_proto, "slice", |ev, this, args| {
        let Some(t) = ev.heap.typed_array(this) else { return Ok(Value::UNDEFINED) };
        let len = t.len();
        let kind = t.kind;
        let start = args.first().copied().map(|v| ev.to_number(v)).transpose()?.unwrap_or(0.0) as isize;
        let end = args.get(1).copied().map(|v| ev.to_number(v)).transpose()?.unwrap_or(len as f64) as isize;
        let clamp = |n: isize| -> usize {
            if n < 0 { (len as isize + n).max(0) as usize } else { (n as usize).min(len) }
        };
        let (s, e) = (clamp(start), clamp(end));
        let count = e.saturating_sub(s);
        let out = ev.heap.new_typed_array(kind, count)?;
        for i in 0..count {
            if let (Some(src), Some(v)) = (ev.heap.typed_array(this), ev.heap.typed_array(this).and_then(|t| t.get(s + i))) {
                let _ = src;
                if let Some(dst) = ev.heap.typed_array_mut(out) {
                    dst.set(i, v);
                }
            }
        }
        Ok(out)
    });

    register_on(ev, ev.typed_array_proto, "toString", |ev, this, _args| {
        let values: Vec<f64> = match ev.heap.typed_array(this) {
            Some(t) => (0..t.len()).filter_map(|i| t.get(i)).collect(),
            None => return Ok(ev.heap.new_string("")?),
        };
        let mut parts = Vec::with_capacity(values.len());
        for n in values {
            let s = ev.to_string_value(Value::number(n))?;
            parts.push(ev.heap.string_value(s));
        }
        Ok(ev.heap.new_string(&parts.join(","))?)
    });

    for (name, kind) in KINDS {
        let kind = *kind;
        let ctor_fn = move |ev: &mut Evaluator, _this: Value, args: &[Value]| -> EvalResult<Value> {
            let arg = args.first().copied().unwrap_or(Value::UNDEFINED);
            if arg.is_number() {
                return Ok(ev.heap.new_typed_array(kind, arg.as_f64() as usize)?);
            }
            let values = ev.iterate(arg)?;
            let arr = ev.heap.new_typed_array(kind, values.len())?;
            for (i, v) in values.into_iter().enumerate() {
                let n = ev.to_number(v)?;
                if let Some(t) = ev.heap.typed_array_mut(arr) {
                    t.set(i, n);
                }
            }
            Ok(arr)
        };
        let idx = ev.register_native(Rc::new(ctor_fn));
        let ctor = Value::make(Tag::NativeFunction, idx as u64);
        ev.global.declare_var(name);
        ev.global.initialize(name, ctor);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::Heap;
    use crate::core::parser::Parser;

    fn run(src: &str) -> (Evaluator, Value) {
        let mut ev = Evaluator::new(Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap(), "<test>");
        install(&mut ev).unwrap();
        let program = Parser::new(src, "<test>").unwrap().parse_program().unwrap();
        let v = ev.run_program(&program).unwrap();
        (ev, v)
    }

    #[test]
    fn constructing_from_a_length_zero_fills_the_buffer() {
        let (_ev, v) = run("let a = new Int32Array(4); a[0];");
        assert_eq!(v.as_f64(), 0.0);
    }

    #[test]
    fn indexed_assignment_round_trips_through_the_byte_buffer() {
        let (_ev, v) = run("let a = new Uint8Array(2); a[0] = 255; a[0];");
        assert_eq!(v.as_f64(), 255.0);
    }

    #[test]
    fn uint8_clamped_saturates_out_of_range_writes() {
        let (_ev, v) = run("let a = new Uint8ClampedArray(1); a[0] = 400; a[0];");
        assert_eq!(v.as_f64(), 255.0);
    }

    #[test]
    fn float64_preserves_fractional_values() {
        let (_ev, v) = run("let a = new Float64Array(1); a[0] = 1.5; a[0];");
        assert_eq!(v.as_f64(), 1.5);
    }

    #[test]
    fn length_reflects_the_element_count_not_the_byte_count() {
        let (_ev, v) = run("new Int32Array(5).length;");
        assert_eq!(v.as_f64(), 5.0);
    }
}
