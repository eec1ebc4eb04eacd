//! `String.prototype` methods.
//!
//! Registered on [`Evaluator::string_proto`] and consulted by
//! `Evaluator::get_property`'s `Tag::String` fallback rather than a settable
//! `proto` slot — primitive strings aren't heap objects with property
//! chains of their own.
//!
//! JS string indices are UTF-16 code units (`length` already reflects this,
//! via [`crate::core::rope::length_utf16`]), so methods that index by
//! position work over a `Vec<u16>` view and round-trip to UTF-8 only at the
//! arena boundary.

use std::rc::Rc;

use crate::core::eval::{EvalResult, Evaluator};
use crate::core::value::{Tag, Value};
use crate::error::JSError;
use crate::unicode::{utf16_find, utf16_rfind, utf16_to_utf8, utf8_to_utf16};

fn as_string(ev: &Evaluator, v: Value) -> String {
    if matches!(v.type_tag(), Tag::String) { ev.heap.string_value(v) } else { String::new() }
}

fn arg_number(ev: &mut Evaluator, args: &[Value], i: usize, default: f64) -> Result<f64, crate::core::eval::Signal> {
    match args.get(i) {
        Some(v) => ev.to_number(*v),
        None => Ok(default),
    }
}

fn arg_string(ev: &mut Evaluator, args: &[Value], i: usize) -> Result<String, crate::core::eval::Signal> {
    match args.get(i).copied() {
        Some(v) => {
            let sv = ev.to_string_value(v)?;
            Ok(ev.heap.string_value(sv))
        }
        None => Ok("undefined".to_string()),
    }
}

/// Clamp a relative index argument into `[0, len]`, JS `ToIntegerOrInfinity`
/// + clamp style.
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
    let proto = ev.string_proto;
    if let Some(o) = ev.heap.object_mut(proto) {
        let _ = o.set_named(name, native);
    }
}

/// Install `String.prototype` onto `ev.string_proto`. Call once per
/// [`Evaluator`] before running scripts that use string methods.
pub fn install(ev: &mut Evaluator) -> Result<(), JSError> {
    ev.string_proto = ev.heap.new_object(None)?;

    register(ev, "charAt", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let n = arg_number(ev, args, 0, 0.0)?;
        let s = if n >= 0.0 { units.get(n as usize).map(|&u| utf16_to_utf8(&[u])) } else { None };
        Ok(ev.heap.new_string(&s.unwrap_or_default())?)
    });

    register(ev, "charCodeAt", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let n = arg_number(ev, args, 0, 0.0)?;
        let code = if n >= 0.0 { units.get(n as usize).copied() } else { None };
        Ok(code.map(|u| Value::number(u as f64)).unwrap_or(Value::number(f64::NAN)))
    });

    register(ev, "codePointAt", |ev, this, args| {
        let s = as_string(ev, this);
        let n = arg_number(ev, args, 0, 0.0)?.max(0.0) as usize;
        let cp = s.encode_utf16().collect::<Vec<u16>>().get(n).copied();
        Ok(cp.map(|u| Value::number(u as f64)).unwrap_or(Value::UNDEFINED))
    });

    register(ev, "at", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let n = arg_number(ev, args, 0, 0.0)?;
        let i = if n < 0.0 { units.len() as f64 + n } else { n };
        if i < 0.0 {
            return Ok(Value::UNDEFINED);
        }
        match units.get(i as usize) {
            Some(&u) => Ok(ev.heap.new_string(&utf16_to_utf8(&[u]))?),
            None => Ok(Value::UNDEFINED),
        }
    });

    register(ev, "slice", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let len = units.len();
        let start = clamp_index(arg_number(ev, args, 0, 0.0)?, len);
        let end = clamp_index(arg_number(ev, args, 1, len as f64)?, len);
        let s = if start < end { utf16_to_utf8(&units[start..end]) } else { String::new() };
        Ok(ev.heap.new_string(&s)?)
    });

    register(ev, "substring", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let len = units.len();
        let a = arg_number(ev, args, 0, 0.0)?.clamp(0.0, len as f64) as usize;
        let b = arg_number(ev, args, 1, len as f64)?.clamp(0.0, len as f64) as usize;
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        Ok(ev.heap.new_string(&utf16_to_utf8(&units[start..end]))?)
    });

    register(ev, "indexOf", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let needle = utf8_to_utf16(&arg_string(ev, args, 0)?);
        let from = (arg_number(ev, args, 1, 0.0)?.max(0.0) as usize).min(units.len());
        let found = utf16_find(&units[from..], &needle).map(|i| i + from);
        Ok(Value::number(found.map(|i| i as f64).unwrap_or(-1.0)))
    });

    register(ev, "lastIndexOf", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let needle = utf8_to_utf16(&arg_string(ev, args, 0)?);
        let found = utf16_rfind(&units, &needle);
        Ok(Value::number(found.map(|i| i as f64).unwrap_or(-1.0)))
    });

    register(ev, "includes", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let needle = utf8_to_utf16(&arg_string(ev, args, 0)?);
        Ok(Value::boolean(utf16_find(&units, &needle).is_some()))
    });

    register(ev, "startsWith", |ev, this, args| {
        let s = as_string(ev, this);
        let needle = arg_string(ev, args, 0)?;
        Ok(Value::boolean(s.starts_with(&needle)))
    });

    register(ev, "endsWith", |ev, this, args| {
        let s = as_string(ev, this);
        let needle = arg_string(ev, args, 0)?;
        Ok(Value::boolean(s.ends_with(&needle)))
    });

    register(ev, "toUpperCase", |ev, this, _args| Ok(ev.heap.new_string(&as_string(ev, this).to_uppercase())?));
    register(ev, "toLowerCase", |ev, this, _args| Ok(ev.heap.new_string(&as_string(ev, this).to_lowercase())?));
    register(ev, "trim", |ev, this, _args| Ok(ev.heap.new_string(as_string(ev, this).trim())?));
    register(ev, "trimStart", |ev, this, _args| Ok(ev.heap.new_string(as_string(ev, this).trim_start())?));
    register(ev, "trimEnd", |ev, this, _args| Ok(ev.heap.new_string(as_string(ev, this).trim_end())?));

    register(ev, "concat", |ev, this, args| {
        let mut acc = if matches!(this.type_tag(), Tag::String) { this } else { ev.heap.new_string("")? };
        for a in args {
            let piece = ev.to_string_value(*a)?;
            acc = ev.heap.concat_strings(acc, piece)?;
        }
        Ok(acc)
    });

    register(ev, "repeat", |ev, this, args| {
        let s = as_string(ev, this);
        let n = arg_number(ev, args, 0, 0.0)?;
        if n < 0.0 || n.is_infinite() {
            return Err(JSError::range_error("Invalid count value").into());
        }
        Ok(ev.heap.new_string(&s.repeat(n as usize))?)
    });

    register(ev, "padStart", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let target = arg_number(ev, args, 0, 0.0)?.max(0.0) as usize;
        let pad = if args.len() > 1 { arg_string(ev, args, 1)? } else { " ".to_string() };
        let pad_units = utf8_to_utf16(&pad);
        let mut out = units.clone();
        if !pad_units.is_empty() && out.len() < target {
            let needed = target - out.len();
            let mut prefix: Vec<u16> = Vec::with_capacity(needed);
            for i in 0..needed {
                prefix.push(pad_units[i % pad_units.len()]);
            }
            prefix.extend(out);
            out = prefix;
        }
        Ok(ev.heap.new_string(&utf16_to_utf8(&out))?)
    });

    register(ev, "padEnd", |ev, this, args| {
        let units = utf8_to_utf16(&as_string(ev, this));
        let target = arg_number(ev, args, 0, 0.0)?.max(0.0) as usize;
        let pad = if args.len() > 1 { arg_string(ev, args, 1)? } else { " ".to_string() };
        let pad_units = utf8_to_utf16(&pad);
        let mut out = units;
        if !pad_units.is_empty() {
            let mut i = 0;
            while out.len() < target {
                out.push(pad_units[i % pad_units.len()]);
                i += 1;
            }
        }
        Ok(ev.heap.new_string(&utf16_to_utf8(&out))?)
    });

    register(ev, "split", |ev, this, args| {
        let s = as_string(ev, this);
        let arr = ev.heap.new_array(None)?;
        let parts: Vec<String> = match args.first() {
            None => vec![s],
            Some(sep) if matches!(sep.type_tag(), Tag::String) => {
                let sep = ev.heap.string_value(*sep);
                if sep.is_empty() { s.chars().map(|c| c.to_string()).collect() } else { s.split(&sep as &str).map(str::to_string).collect() }
            }
            Some(_) => vec![s],
        };
        let values = parts.into_iter().map(|p| ev.heap.new_string(&p)).collect::<Result<Vec<_>, _>>()?;
        if let Some(o) = ev.heap.object_mut(arr) {
            o.elements = values;
        }
        Ok(arr)
    });

    register(ev, "replace", |ev, this, args| {
        let s = as_string(ev, this);
        let search = arg_string(ev, args, 0)?;
        let replacement = arg_string(ev, args, 1)?;
        Ok(ev.heap.new_string(&s.replacen(&search, &replacement, 1))?)
    });

    register(ev, "replaceAll", |ev, this, args| {
        let s = as_string(ev, this);
        let search = arg_string(ev, args, 0)?;
        let replacement = arg_string(ev, args, 1)?;
        let out = if search.is_empty() { s } else { s.replace(&search, &replacement) };
        Ok(ev.heap.new_string(&out)?)
    });

    register(ev, "toString", |_ev, this, _args| Ok(this));
    register(ev, "valueOf", |_ev, this, _args| Ok(this));
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

    fn call_method(ev: &mut Evaluator, this: &str, name: &str, args: &[Value]) -> Value {
        let this = ev.heap.new_string(this).unwrap();
        let f = ev.get_property(this, name).unwrap();
        ev.call(f, this, args).unwrap()
    }

    #[test]
    fn slice_uses_utf16_indices() {
        let mut ev = evaluator();
        let r = call_method(&mut ev, "hello world", "slice", &[Value::number(6.0)]);
        assert_eq!(ev.heap.string_value(r), "world");
    }

    #[test]
    fn index_of_finds_a_substring() {
        let mut ev = evaluator();
        let needle = ev.heap.new_string("world").unwrap();
        let r = call_method(&mut ev, "hello world", "indexOf", &[needle]);
        assert_eq!(r, Value::number(6.0));
    }

    #[test]
    fn pad_start_pads_to_target_length() {
        let mut ev = evaluator();
        let r = call_method(&mut ev, "5", "padStart", &[Value::number(3.0)]);
        assert_eq!(ev.heap.string_value(r), "  5");
    }

    #[test]
    fn split_on_separator_builds_an_array() {
        let mut ev = evaluator();
        let sep = ev.heap.new_string(",").unwrap();
        let arr = call_method(&mut ev, "a,b,c", "split", &[sep]);
        let elems = ev.heap.object(arr).unwrap().elements.clone();
        assert_eq!(elems.len(), 3);
        assert_eq!(ev.heap.string_value(elems[1]), "b");
    }

    #[test]
    fn repeat_rejects_a_negative_count() {
        let mut ev = evaluator();
        let this = ev.heap.new_string("x").unwrap();
        let f = ev.get_property(this, "repeat").unwrap();
        assert!(ev.call(f, this, &[Value::number(-1.0)]).is_err());
    }

    #[test]
    fn starts_and_ends_with_check_substrings() {
        let mut ev = evaluator();
        let prefix = ev.heap.new_string("hell").unwrap();
        let r = call_method(&mut ev, "hello", "startsWith", &[prefix]);
        assert_eq!(r, Value::boolean(true));
    }
}
