//! `Object` constructor statics and `Object.prototype` methods.
//!
//! Mirrors [`crate::js_array`]'s shape: a `proto` object on the
//! [`Evaluator`], consulted by `get_property`'s final Object/Array
//! fallback, plus a handful of statics installed directly on the global
//! `Object` binding.

use std::rc::Rc;

use crate::core::eval::{EvalResult, Evaluator};
use crate::core::object::PropKey;
use crate::core::value::{Tag, Value};
use crate::error::JSError;

fn register_on(ev: &mut Evaluator, proto: Value, name: &str, f: impl Fn(&mut Evaluator, Value, &[Value]) -> EvalResult<Value> + 'static) {
    let idx = ev.register_native(Rc::new(f));
    let native = Value::make(Tag::NativeFunction, idx as u64);
    if let Some(o) = ev.heap.object_mut(proto) {
        let _ = o.set_named(name, native);
    }
}

fn own_pairs(ev: &Evaluator, obj: Value) -> Vec<(String, Value)> {
    ev.heap
        .object(obj)
        .map(|o| o.own_enumerable_keys().into_iter().filter_map(|k| o.get_own(&PropKey::Named(k.clone())).map(|v| (k, v))).collect())
        .unwrap_or_default()
}

fn array_of(ev: &mut Evaluator, values: Vec<Value>) -> Result<Value, JSError> {
    let arr = ev.heap.new_array(None)?;
    if let Some(o) = ev.heap.object_mut(arr) {
        o.elements = values;
    }
    Ok(arr)
}

/// Install `Object.prototype` onto `ev.object_proto`, and `Object.*` statics
/// (`keys`/`values`/`entries`/`assign`/`freeze`/...) onto a fresh `Object`
/// constructor bound in the global scope.
pub fn install(ev: &mut Evaluator) -> Result<(), JSError> {
    ev.object_proto = ev.heap.new_object(None)?;

    register_on(ev, ev.object_proto, "hasOwnProperty", |ev, this, args| {
        let Some(&key) = args.first() else { return Ok(Value::boolean(false)) };
        let key = ev.to_property_key(key)?;
        Ok(Value::boolean(ev.heap.object(this).map(|o| o.get_own(&PropKey::Named(key)).is_some()).unwrap_or(false)))
    });

    register_on(ev, ev.object_proto, "isPrototypeOf", |ev, this, args| {
        let Some(&candidate) = args.first() else { return Ok(Value::boolean(false)) };
        let mut cur = ev.heap.object(candidate).and_then(|o| o.proto);
        while let Some(off) = cur {
            if matches!(this.type_tag(), Tag::Object) && off == this.offset() {
                return Ok(Value::boolean(true));
            }
            cur = ev.heap.object(Value::make(Tag::Object, off as u64)).and_then(|o| o.proto);
        }
        Ok(Value::boolean(false))
    });

    register_on(ev, ev.object_proto, "toString", |ev, this, _args| Ok(ev.heap.new_string("[object Object]")?));
    register_on(ev, ev.object_proto, "valueOf", |_ev, this, _args| Ok(this));

    let ctor = ev.heap.new_object(None)?;

    let native_fn = |ev: &mut Evaluator, f: fn(&mut Evaluator, Value, &[Value]) -> EvalResult<Value>| {
        let idx = ev.register_native(Rc::new(f));
        Value::make(Tag::NativeFunction, idx as u64)
    };

    let keys = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        let pairs = own_pairs(ev, obj);
        let mut values = Vec::with_capacity(pairs.len());
        for (k, _) in pairs {
            values.push(ev.heap.new_string(&k)?);
        }
        Ok(array_of(ev, values)?)
    });
    set_ctor(ev, ctor, "keys", keys);

    let values_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        let pairs = own_pairs(ev, obj);
        let values = pairs.into_iter().map(|(_, v)| v).collect();
        Ok(array_of(ev, values)?)
    });
    set_ctor(ev, ctor, "values", values_fn);

    let entries_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        let pairs = own_pairs(ev, obj);
        let mut entries = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let key = ev.heap.new_string(&k)?;
            entries.push(array_of(ev, vec![key, v])?);
        }
        Ok(array_of(ev, entries)?)
    });
    set_ctor(ev, ctor, "entries", entries_fn);

    let assign_fn = native_fn(ev, |ev, _this, args| {
        let Some(&target) = args.first() else { return Ok(Value::UNDEFINED) };
        for source in &args[1.min(args.len())..] {
            for (k, v) in own_pairs(ev, *source) {
                if let Some(o) = ev.heap.object_mut(target) {
                    o.set_named(&k, v).map_err(crate::core::eval::Signal::Js)?;
                }
            }
        }
        Ok(target)
    });
    set_ctor(ev, ctor, "assign", assign_fn);

    let freeze_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        if let Some(o) = ev.heap.object_mut(obj) {
            o.freeze();
        }
        Ok(obj)
    });
    set_ctor(ev, ctor, "freeze", freeze_fn);

    let is_frozen_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        Ok(Value::boolean(ev.heap.object(obj).map(|o| !o.extensible).unwrap_or(true)))
    });
    set_ctor(ev, ctor, "isFrozen", is_frozen_fn);

    let seal_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        if let Some(o) = ev.heap.object_mut(obj) {
            o.seal();
        }
        Ok(obj)
    });
    set_ctor(ev, ctor, "seal", seal_fn);

    let is_sealed_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        Ok(Value::boolean(ev.heap.object(obj).map(|o| !o.extensible).unwrap_or(true)))
    });
    set_ctor(ev, ctor, "isSealed", is_sealed_fn);

    let get_proto_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        Ok(ev.heap.object(obj).and_then(|o| o.proto).map(|off| Value::make(Tag::Object, off as u64)).unwrap_or(Value::NULL))
    });
    set_ctor(ev, ctor, "getPrototypeOf", get_proto_fn);

    let set_proto_fn = native_fn(ev, |ev, _this, args| {
        let obj = args.first().copied().unwrap_or(Value::UNDEFINED);
        let proto = args.get(1).copied().unwrap_or(Value::NULL);
        let proto_off = if matches!(proto.type_tag(), Tag::Object) { Some(proto.offset()) } else { None };
        if let Some(o) = ev.heap.object_mut(obj) {
            o.proto = proto_off;
        }
        Ok(obj)
    });
    set_ctor(ev, ctor, "setPrototypeOf", set_proto_fn);

    let create_fn = native_fn(ev, |ev, _this, args| {
        let proto = args.first().copied().unwrap_or(Value::NULL);
        let proto_off = if matches!(proto.type_tag(), Tag::Object) { Some(proto.offset()) } else { None };
        Ok(ev.heap.new_object(proto_off)?)
    });
    set_ctor(ev, ctor, "create", create_fn);

    ev.global.declare_var("Object");
    ev.global.initialize("Object", ctor);
    Ok(())
}

fn set_ctor(ev: &mut Evaluator, ctor: Value, name: &str, f: Value) {
    if let Some(o) = ev.heap.object_mut(ctor) {
        let _ = o.set_named(name, f);
    }
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

    #[test]
    fn keys_returns_own_enumerable_names_in_order() {
        let mut ev = evaluator();
        let obj = ev.heap.new_object(None).unwrap();
        ev.heap.object_mut(obj).unwrap().set_named("a", Value::number(1.0)).unwrap();
        ev.heap.object_mut(obj).unwrap().set_named("b", Value::number(2.0)).unwrap();
        let object_ctor = ev.global.resolve("Object").unwrap();
        let keys_fn = ev.get_property(object_ctor, "keys").unwrap();
        let result = ev.call(keys_fn, Value::UNDEFINED, &[obj]).unwrap();
        let elems = ev.heap.object(result).unwrap().elements.clone();
        assert_eq!(elems.len(), 2);
        assert_eq!(ev.heap.string_value(elems[0]), "a");
    }

    #[test]
    fn freeze_rejects_subsequent_writes() {
        let mut ev = evaluator();
        let obj = ev.heap.new_object(None).unwrap();
        ev.heap.object_mut(obj).unwrap().set_named("x", Value::number(1.0)).unwrap();
        let object_ctor = ev.global.resolve("Object").unwrap();
        let freeze_fn = ev.get_property(object_ctor, "freeze").unwrap();
        ev.call(freeze_fn, Value::UNDEFINED, &[obj]).unwrap();
        assert!(ev.heap.object_mut(obj).unwrap().set_named("x", Value::number(2.0)).is_err());
    }

    #[test]
    fn set_prototype_of_changes_lookup_chain() {
        let mut ev = evaluator();
        let proto = ev.heap.new_object(None).unwrap();
        ev.heap.object_mut(proto).unwrap().set_named("greet", Value::number(42.0)).unwrap();
        let obj = ev.heap.new_object(None).unwrap();
        let object_ctor = ev.global.resolve("Object").unwrap();
        let set_proto_fn = ev.get_property(object_ctor, "setPrototypeOf").unwrap();
        ev.call(set_proto_fn, Value::UNDEFINED, &[obj, proto]).unwrap();
        assert_eq!(ev.get_property(obj, "greet").unwrap(), Value::number(42.0));
    }
}
