//! `BigInt` constructor, conversions and `BigInt.prototype` methods.
//!
//! Arithmetic itself (`+`, `-`, `*`, ...) is dispatched out of
//! [`crate::core::eval::Evaluator::apply_binop`] directly against the
//! `num_bigint::BigInt` stored in the heap side table; this module only
//! covers the constructor function and prototype surface, the same split
//! [`crate::js_string`] uses for rope concatenation vs. `String.prototype`.

use std::rc::Rc;

use num_bigint::BigInt;

use crate::core::eval::{EvalResult, Evaluator, Signal};
use crate::core::value::{Tag, Value};
use crate::error::JSError;

fn register_on(ev: &mut Evaluator, proto: Value, name: &str, f: impl Fn(&mut Evaluator, Value, &[Value]) -> EvalResult<Value> + 'static) {
    let idx = ev.register_native(Rc::new(f));
    let native = Value::make(Tag::NativeFunction, idx as u64);
    if let Some(o) = ev.heap.object_mut(proto) {
        let _ = o.set_named(name, native);
    }
}

fn as_bigint(ev: &Evaluator, v: Value) -> BigInt {
    ev.heap.bigint(v).cloned().unwrap_or_default()
}

/// `BigInt(value)`: numbers must be integral, strings are parsed as decimal.
fn coerce(ev: &mut Evaluator, v: Value) -> Result<BigInt, Signal> {
    if matches!(v.type_tag(), Tag::BigInt) {
        return Ok(as_bigint(ev, v));
    }
    if v.is_number() {
        let n = v.as_f64();
        if n.fract() != 0.0 || !n.is_finite() {
            return Err(JSError::range_error("The number is not a safe integer").into());
        }
        return Ok(BigInt::from(n as i64));
    }
    if matches!(v.type_tag(), Tag::String) {
        let s = ev.heap.string_value(v);
        return s.trim().parse::<BigInt>().map_err(|_| JSError::syntax_error("Cannot convert string to a BigInt").into());
    }
    if matches!(v.type_tag(), Tag::Boolean) {
        return Ok(BigInt::from(v.as_bool().unwrap_or(false) as i64));
    }
    Err(JSError::type_error("Cannot convert value to a BigInt").into())
}

pub fn install(ev: &mut Evaluator) -> Result<(), JSError> {
    ev.bigint_proto = ev.heap.new_object(None)?;

    register_on(ev, ev.bigint_proto, "toString", |ev, this, args| {
        let n = as_bigint(ev, this);
        let radix = args.first().copied().map(|v| ev.to_number(v)).transpose()?.unwrap_or(10.0) as u32;
        let text = if radix == 10 { n.to_string() } else { n.to_str_radix(radix) };
        Ok(ev.heap.new_string(&text)?)
    });
    register_on(ev, ev.bigint_proto, "valueOf", |_ev, this, _args| Ok(this));

    let ctor_fn = |ev: &mut Evaluator, _this: Value, args: &[Value]| -> EvalResult<Value> {
        let arg = args.first().copied().unwrap_or(Value::UNDEFINED);
        let n = coerce(ev, arg)?;
        Ok(ev.heap.new_bigint(n)?)
    };
    let idx = ev.register_native(Rc::new(ctor_fn));
    let ctor = Value::make(Tag::NativeFunction, idx as u64);

    ev.global.declare_var("BigInt");
    ev.global.initialize("BigInt", ctor);
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
        crate::js_string::install(&mut ev).unwrap();
        let program = Parser::new(src, "<test>").unwrap().parse_program().unwrap();
        let v = ev.run_program(&program).unwrap();
        (ev, v)
    }

    #[test]
    fn bigint_constructor_parses_decimal_strings() {
        let (ev, v) = run(r#"BigInt("123456789012345678901234567890");"#);
        assert_eq!(as_bigint(&ev, v), "123456789012345678901234567890".parse::<BigInt>().unwrap());
    }

    #[test]
    fn bigint_addition_does_not_lose_precision() {
        let (ev, v) = run("100000000000000000000n + 1n;");
        assert_eq!(as_bigint(&ev, v), BigInt::from(10u64).pow(20) + 1);
    }

    #[test]
    fn to_string_supports_a_radix_argument() {
        let (ev, v) = run("(255n).toString(16);");
        assert_eq!(ev.heap.string_value(v), "ff");
    }

    #[test]
    fn mixing_bigint_and_number_in_arithmetic_throws() {
        let mut ev = Evaluator::new(Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap(), "<test>");
        install(&mut ev).unwrap();
        let program = Parser::new("1n + 1;", "<test>").unwrap().parse_program().unwrap();
        assert!(ev.run_program(&program).is_err());
    }
}
