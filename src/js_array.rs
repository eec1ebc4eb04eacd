//! `Array.prototype` methods.
//!
//! Registered on [`Evaluator::array_proto`] and consulted by
//! `Evaluator::get_property`'s `Tag::Array` fallback (arrays aren't
//! themselves linked to a settable `proto` slot for every construction
//! path — see the note on [`Evaluator::array_proto`]).
//!
//! Callback-taking methods (`map`, `filter`, `forEach`, ...) invoke the
//! callback through [`Evaluator::call`], the single dispatch point shared
//! with ordinary JS calls, so user-defined callbacks and natives compose
//! without a separate code path.

use std::rc::Rc;

use crate::core::eval::{EvalResult, Evaluator};
use crate::core::value::{Tag, Value};
use crate::error::JSError;

fn elements(ev: &Evaluator, this: Value) -> Vec<Value> {
    ev.heap.object(this).map(|o| o.elements.clone()).unwrap_or_default()
}

fn set_elements(ev: &mut Evaluator, this: Value, elems: Vec<Value>) {
    if let Some(o) = ev.heap.object_mut(this) {
        o.elements = elems;
    }
}

fn clamp_index(n: f64, len: usize) -> usize {
    if n.is_nan() {
        0
    } else if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn register(ev: &mut Evaluator, name: &str, f: impl Fn(&mut Evaluator, Value, &[Value]) -> EvalResult<Value> + 'static) {
    let idx = ev.register_native(Rc::new(f));
    let native = Value::make(Tag::NativeFunction, idx as u64);
    let proto = ev.array_proto;
    if let Some(o) = ev.heap.object_mut(proto) {
        let _ = o.set_named(name, native);
    }
}

/// Install `Array.prototype` onto `ev.array_proto`. Call once per
/// [`Evaluator`] before running scripts that use array methods.
pub fn install(ev: &mut Evaluator) -> Result<(), JSError> {
    ev.array_proto = ev.heap.new_object(None)?;

    register(ev, "push", |ev, this, args| {
        if let Some(o) = ev.heap.object_mut(this) {
            o.elements.extend_from_slice(args);
            return Ok(Value::number(o.elements.len() as f64));
        }
        Ok(Value::number(0.0))
    });

    register(ev, "pop", |ev, this, _args| {
        if let Some(o) = ev.heap.object_mut(this) { Ok(o.elements.pop().unwrap_or(Value::UNDEFINED)) } else { Ok(Value::UNDEFINED) }
    });

    register(ev, "shift", |ev, this, _args| {
        if let Some(o) = ev.heap.object_mut(this) {
            if o.elements.is_empty() { Ok(Value::UNDEFINED) } else { Ok(o.elements.remove(0)) }
        } else {
            Ok(Value::UNDEFINED)
        }
    });

    register(ev, "unshift", |ev, this, args| {
        if let Some(o) = ev.heap.object_mut(this) {
            for (i, a) in args.iter().enumerate() {
                o.elements.insert(i, *a);
            }
            return Ok(Value::number(o.elements.len() as f64));
        }
        Ok(Value::number(0.0))
    });

    register(ev, "slice", |ev, this, args| {
        let elems = elements(ev, this);
        let len = elems.len();
        let start = clamp_index(args.first().map(|v| ev.to_number(*v)).transpose()?.unwrap_or(0.0), len);
        let end = clamp_index(args.get(1).map(|v| ev.to_number(*v)).transpose()?.unwrap_or(len as f64), len);
        let arr = ev.heap.new_array(None)?;
        let slice = if start < end { elems[start..end].to_vec() } else { Vec::new() };
        set_elements(ev, arr, slice);
        Ok(arr)
    });

    register(ev, "splice", |ev, this, args| {
        let mut elems = elements(ev, this);
        let len = elems.len();
        let start = clamp_index(args.first().map(|v| ev.to_number(*v)).transpose()?.unwrap_or(0.0), len);
        let delete_count = args.get(1).map(|v| ev.to_number(*v)).transpose()?.map(|n| (n.max(0.0) as usize).min(len - start)).unwrap_or(len - start);
        let removed: Vec<Value> = elems.splice(start..start + delete_count, args.iter().skip(2).copied()).collect();
        set_elements(ev, this, elems);
        let arr = ev.heap.new_array(None)?;
        set_elements(ev, arr, removed);
        Ok(arr)
    });

    register(ev, "indexOf", |ev, this, args| {
        let elems = elements(ev, this);
        let Some(&needle) = args.first() else { return Ok(Value::number(-1.0)) };
        let found = elems.iter().position(|&v| crate::core::eval::strict_equals(v, needle));
        Ok(Value::number(found.map(|i| i as f64).unwrap_or(-1.0)))
    });

    register(ev, "lastIndexOf", |ev, this, args| {
        let elems = elements(ev, this);
        let Some(&needle) = args.first() else { return Ok(Value::number(-1.0)) };
        let found = elems.iter().rposition(|&v| crate::core::eval::strict_equals(v, needle));
        Ok(Value::number(found.map(|i| i as f64).unwrap_or(-1.0)))
    });

    register(ev, "includes", |ev, this, args| {
        let elems = elements(ev, this);
        let Some(&needle) = args.first() else { return Ok(Value::boolean(false)) };
        Ok(Value::boolean(elems.iter().any(|&v| crate::core::eval::strict_equals(v, needle))))
    });

    register(ev, "at", |ev, this, args| {
        let elems = elements(ev, this);
        let n = args.first().map(|v| ev.to_number(*v)).transpose()?.unwrap_or(0.0);
        let i = if n < 0.0 { elems.len() as f64 + n } else { n };
        if i < 0.0 { Ok(Value::UNDEFINED) } else { Ok(elems.get(i as usize).copied().unwrap_or(Value::UNDEFINED)) }
    });

    register(ev, "join", |ev, this, args| {
        let elems = elements(ev, this);
        let sep = match args.first() {
            Some(v) => {
                let sv = ev.to_string_value(*v)?;
                ev.heap.string_value(sv)
            }
            None => ",".to_string(),
        };
        let mut parts = Vec::with_capacity(elems.len());
        for e in elems {
            if e.is_nullish() {
                parts.push(String::new());
            } else {
                let sv = ev.to_string_value(e)?;
                parts.push(ev.heap.string_value(sv));
            }
        }
        Ok(ev.heap.new_string(&parts.join(&sep))?)
    });

    register(ev, "concat", |ev, this, args| {
        let mut out = elements(ev, this);
        for a in args {
            if matches!(a.type_tag(), Tag::Array) {
                out.extend(elements(ev, *a));
            } else {
                out.push(*a);
            }
        }
        let arr = ev.heap.new_array(None)?;
        set_elements(ev, arr, out);
        Ok(arr)
    });

    register(ev, "reverse", |ev, this, _args| {
        let mut elems = elements(ev, this);
        elems.reverse();
        set_elements(ev, this, elems);
        Ok(this)
    });

    register(ev, "flat", |ev, this, args| {
        let depth = args.first().map(|v| ev.to_number(*v)).transpose()?.unwrap_or(1.0);
        fn flatten(ev: &Evaluator, elems: Vec<Value>, depth: f64, out: &mut Vec<Value>) {
            for e in elems {
                if depth > 0.0 && matches!(e.type_tag(), Tag::Array) {
                    flatten(ev, elements(ev, e), depth - 1.0, out);
                } else {
                    out.push(e);
                }
            }
        }
        let mut out = Vec::new();
        flatten(ev, elements(ev, this), depth, &mut out);
        let arr = ev.heap.new_array(None)?;
        set_elements(ev, arr, out);
        Ok(arr)
    });

    register(ev, "forEach", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        for (i, e) in elems.into_iter().enumerate() {
            ev.call(cb, Value::UNDEFINED, &[e, Value::number(i as f64), this])?;
        }
        Ok(Value::UNDEFINED)
    });

    register(ev, "map", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        let mut out = Vec::with_capacity(elems.len());
        for (i, e) in elems.into_iter().enumerate() {
            out.push(ev.call(cb, Value::UNDEFINED, &[e, Value::number(i as f64), this])?);
        }
        let arr = ev.heap.new_array(None)?;
        set_elements(ev, arr, out);
        Ok(arr)
    });

    register(ev, "filter", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        let mut out = Vec::new();
        for (i, e) in elems.into_iter().enumerate() {
            let keep = ev.call(cb, Value::UNDEFINED, &[e, Value::number(i as f64), this])?;
            if ev.truthy(keep) {
                out.push(e);
            }
        }
        let arr = ev.heap.new_array(None)?;
        set_elements(ev, arr, out);
        Ok(arr)
    });

    register(ev, "find", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        for (i, e) in elems.into_iter().enumerate() {
            let hit = ev.call(cb, Value::UNDEFINED, &[e, Value::number(i as f64), this])?;
            if ev.truthy(hit) {
                return Ok(e);
            }
        }
        Ok(Value::UNDEFINED)
    });

    register(ev, "findIndex", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        for (i, e) in elems.into_iter().enumerate() {
            let hit = ev.call(cb, Value::UNDEFINED, &[e, Value::number(i as f64), this])?;
            if ev.truthy(hit) {
                return Ok(Value::number(i as f64));
            }
        }
        Ok(Value::number(-1.0))
    });

    register(ev, "some", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        for (i, e) in elems.into_iter().enumerate() {
            let hit = ev.call(cb, Value::UNDEFINED, &[e, Value::number(i as f64), this])?;
            if ev.truthy(hit) {
                return Ok(Value::boolean(true));
            }
        }
        Ok(Value::boolean(false))
    });

    register(ev, "every", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        for (i, e) in elems.into_iter().enumerate() {
            let hit = ev.call(cb, Value::UNDEFINED, &[e, Value::number(i as f64), this])?;
            if !ev.truthy(hit) {
                return Ok(Value::boolean(false));
            }
        }
        Ok(Value::boolean(true))
    });

    register(ev, "reduce", |ev, this, args| {
        let elems = elements(ev, this);
        let cb = args.first().copied().unwrap_or(Value::UNDEFINED);
        let mut iter = elems.into_iter().enumerate();
        let mut acc = match args.get(1) {
            Some(&init) => init,
            None => match iter.next() {
                Some((_, v)) => v,
                None => return Err(crate::error::JSError::type_error("Reduce of empty array with no initial value").into()),
            },
        };
        for (i, e) in iter {
            acc = ev.call(cb, Value::UNDEFINED, &[acc, e, Value::number(i as f64), this])?;
        }
        Ok(acc)
    });

    register(ev, "sort", |ev, this, args| {
        let mut elems = elements(ev, this);
        let cb = args.first().copied();
        let mut err = None;
        elems.sort_by(|&a, &b| {
            if err.is_some() {
                return std::cmp::Ordering::Equal;
            }
            let ordering = match cb {
                Some(f) => match ev.call(f, Value::UNDEFINED, &[a, b]) {
                    Ok(r) => match ev.to_number(r) {
                        Ok(n) => {
                            if n < 0.0 {
                                std::cmp::Ordering::Less
                            } else if n > 0.0 {
                                std::cmp::Ordering::Greater
                            } else {
                                std::cmp::Ordering::Equal
                            }
                        }
                        Err(e) => {
                            err = Some(e);
                            std::cmp::Ordering::Equal
                        }
                    },
                    Err(e) => {
                        err = Some(e);
                        std::cmp::Ordering::Equal
                    }
                },
                None => {
                    let (sa, sb) = match (ev.to_string_value(a), ev.to_string_value(b)) {
                        (Ok(sa), Ok(sb)) => (ev.heap.string_value(sa), ev.heap.string_value(sb)),
                        _ => return std::cmp::Ordering::Equal,
                    };
                    sa.cmp(&sb)
                }
            };
            ordering
        });
        if let Some(e) = err {
            return Err(e);
        }
        set_elements(ev, this, elems);
        Ok(this)
    });

    register(ev, "fill", |ev, this, args| {
        let mut elems = elements(ev, this);
        let len = elems.len();
        let value = args.first().copied().unwrap_or(Value::UNDEFINED);
        let start = clamp_index(args.get(1).map(|v| ev.to_number(*v)).transpose()?.unwrap_or(0.0), len);
        let end = clamp_index(args.get(2).map(|v| ev.to_number(*v)).transpose()?.unwrap_or(len as f64), len);
        for slot in elems.iter_mut().take(end).skip(start) {
            *slot = value;
        }
        set_elements(ev, this, elems);
        Ok(this)
    });

    register(ev, "toString", |ev, this, _args| {
        let elems = elements(ev, this);
        let mut parts = Vec::with_capacity(elems.len());
        for e in elems {
            if e.is_nullish() {
                parts.push(String::new());
            } else {
                let sv = ev.to_string_value(e)?;
                parts.push(ev.heap.string_value(sv));
            }
        }
        Ok(ev.heap.new_string(&parts.join(","))?)
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::Heap;

    fn evaluator() -> Evaluator {
        let mut ev = Evaluator::new(Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap(), "<test>");
        install(&mut ev).unwrap();
        ev
    }

    fn make_array(ev: &mut Evaluator, nums: &[f64]) -> Value {
        let arr = ev.heap.new_array(None).unwrap();
        set_elements(ev, arr, nums.iter().map(|&n| Value::number(n)).collect());
        arr
    }

    fn call_method(ev: &mut Evaluator, this: Value, name: &str, args: &[Value]) -> Value {
        let f = ev.get_property(this, name).unwrap();
        ev.call(f, this, args).unwrap()
    }

    #[test]
    fn push_and_pop_mutate_in_place() {
        let mut ev = evaluator();
        let arr = make_array(&mut ev, &[1.0, 2.0]);
        call_method(&mut ev, arr, "push", &[Value::number(3.0)]);
        assert_eq!(elements(&ev, arr).len(), 3);
        let popped = call_method(&mut ev, arr, "pop", &[]);
        assert_eq!(popped, Value::number(3.0));
    }

    #[test]
    fn map_applies_the_callback_to_every_element() {
        let mut ev = evaluator();
        let arr = make_array(&mut ev, &[1.0, 2.0, 3.0]);
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| Ok(Value::number(ev.to_number(args[0])? * 2.0))));
        let doubler = Value::make(Tag::NativeFunction, idx as u64);
        let mapped = call_method(&mut ev, arr, "map", &[doubler]);
        assert_eq!(elements(&ev, mapped), vec![Value::number(2.0), Value::number(4.0), Value::number(6.0)]);
    }

    #[test]
    fn reduce_without_initial_value_uses_first_element() {
        let mut ev = evaluator();
        let arr = make_array(&mut ev, &[1.0, 2.0, 3.0]);
        let idx = ev.register_native(Rc::new(|ev: &mut Evaluator, _this, args: &[Value]| Ok(Value::number(ev.to_number(args[0])? + ev.to_number(args[1])?))));
        let add = Value::make(Tag::NativeFunction, idx as u64);
        let sum = call_method(&mut ev, arr, "reduce", &[add]);
        assert_eq!(sum, Value::number(6.0));
    }

    #[test]
    fn reduce_on_empty_array_without_initial_value_errors() {
        let mut ev = evaluator();
        let arr = make_array(&mut ev, &[]);
        let idx = ev.register_native(Rc::new(|_ev: &mut Evaluator, _this, _args: &[Value]| Ok(Value::UNDEFINED)));
        let noop = Value::make(Tag::NativeFunction, idx as u64);
        let f = ev.get_property(arr, "reduce").unwrap();
        assert!(ev.call(f, arr, &[noop]).is_err());
    }

    #[test]
    fn sort_without_comparator_uses_string_order() {
        let mut ev = evaluator();
        let arr = make_array(&mut ev, &[10.0, 2.0, 1.0]);
        call_method(&mut ev, arr, "sort", &[]);
        assert_eq!(elements(&ev, arr), vec![Value::number(1.0), Value::number(10.0), Value::number(2.0)]);
    }

    #[test]
    fn flat_flattens_one_level_by_default() {
        let mut ev = evaluator();
        let inner = make_array(&mut ev, &[2.0, 3.0]);
        let outer = ev.heap.new_array(None).unwrap();
        set_elements(&mut ev, outer, vec![Value::number(1.0), inner]);
        let flat = call_method(&mut ev, outer, "flat", &[]);
        assert_eq!(elements(&ev, flat), vec![Value::number(1.0), Value::number(2.0), Value::number(3.0)]);
    }
}
