//! §4.D Object and property chain.
//!
//! An object is a small arena-resident header (a `proto` offset plus flag
//! bits) followed by a singly-linked list of property records. A property
//! record is `{ next, key, value, flags }`. Above a configurable chain
//! length the object upgrades to a hash-bucketed layout so property
//! lookup stays sublinear on wide objects; arrays additionally carry a
//! dense element buffer used as a fast path ahead of the property chain.
//!
//! Grounded on the distilled original's `include/config.h`
//! (`SLOTMASK`/`CONSTMASK`/`ARRMASK`/`NONCONFIGMASK` flag bits and the
//! `internal_slot_t` roster) and `include/internal.h` (the property-chain
//! object layout this mirrors field-for-field).

use std::collections::HashMap;

use crate::core::arena::{Arena, Offset};
use crate::core::value::{Tag, Value};
use crate::error::JSError;

/// Chain length above which an object upgrades to hash-bucketed storage.
pub const HASH_UPGRADE_THRESHOLD: usize = 16;

/// Minimal bitflags reimplementation — avoids pulling in the `bitflags`
/// crate for four bits.
macro_rules! bitflags_like {
    (pub struct $name:ident: u8 { $(const $variant:ident = $value:expr;)* }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name(pub u8);
        impl $name {
            $(pub const $variant: $name = $name($value);)*
            pub const EMPTY: $name = $name(0);
            pub fn contains(self, other: $name) -> bool { self.0 & other.0 == other.0 }
            pub fn insert(&mut self, other: $name) { self.0 |= other.0; }
            pub fn remove(&mut self, other: $name) { self.0 &= !other.0; }
        }
        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name { $name(self.0 | rhs.0) }
        }
    };
}

bitflags_like! {
    pub struct PropFlags: u8 {
        const SLOT = 0b0001;
        const CONST = 0b0010;
        const ARRAY = 0b0100;
        const NONCONFIG = 0b1000;
    }
}

/// Reserved internal-slot identifiers, carried over from the distilled
/// original's `internal_slot_t` so embedder diagnostics and the evaluator
/// agree on numbering without needing string keys for engine-private data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InternalSlot {
    Pid = 1,
    Async = 2,
    With = 3,
    Scope = 4,
    This = 5,
    BoundThis = 6,
    BoundArgs = 7,
    FieldCount = 8,
    Source = 9,
    Fields = 10,
    Strict = 11,
    Code = 12,
    CFunc = 13,
    Coro = 14,
    Proto = 15,
    Frozen = 16,
    Sealed = 17,
    Extensible = 18,
    Buffer = 19,
    TargetFunc = 20,
    Version = 21,
    Name = 22,
    Map = 23,
    Set = 24,
    Primitive = 25,
    ProxyRef = 26,
    Builtin = 27,
    Data = 28,
}

/// A property key: either a string name or a reserved internal slot.
/// Internal slots are excluded from `for-in`/`Object.keys` enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropKey {
    Named(String),
    Slot(InternalSlot),
}

struct PropRecord {
    key: PropKey,
    value: Value,
    flags: PropFlags,
}

/// An object's property storage: a chain preserving insertion order, plus
/// (once the chain grows past [`HASH_UPGRADE_THRESHOLD`]) a name -> index
/// side table for O(1) lookup. The chain itself remains the source of
/// truth for iteration order and for the GC's root-walk.
pub struct ObjectData {
    pub proto: Option<Offset>,
    props: Vec<PropRecord>,
    index: Option<HashMap<PropKey, usize>>,
    /// Dense element storage used by arrays ahead of the property chain.
    pub elements: Vec<Value>,
    pub is_array: bool,
    pub extensible: bool,
}

impl ObjectData {
    pub fn new(proto: Option<Offset>) -> ObjectData {
        ObjectData { proto, props: Vec::new(), index: None, elements: Vec::new(), is_array: false, extensible: true }
    }

    pub fn new_array(proto: Option<Offset>) -> ObjectData {
        let mut o = ObjectData::new(proto);
        o.is_array = true;
        o
    }

    fn maybe_build_index(&mut self) {
        if self.index.is_none() && self.props.len() > HASH_UPGRADE_THRESHOLD {
            let mut map = HashMap::with_capacity(self.props.len() * 2);
            for (i, p) in self.props.iter().enumerate() {
                map.insert(p.key.clone(), i);
            }
            self.index = Some(map);
        }
    }

    fn find(&self, key: &PropKey) -> Option<usize> {
        if let Some(map) = &self.index {
            return map.get(key).copied();
        }
        self.props.iter().position(|p| &p.key == key)
    }

    pub fn get_own(&self, key: &PropKey) -> Option<Value> {
        self.find(key).map(|i| self.props[i].value)
    }

    pub fn get_own_flags(&self, key: &PropKey) -> Option<PropFlags> {
        self.find(key).map(|i| self.props[i].flags)
    }

    /// `define_property` — §4.D. Overwrites an existing own property in
    /// place (respecting `CONST`/`NONCONFIG`); otherwise appends, upgrading
    /// to a hash index once the chain crosses the threshold.
    pub fn define(&mut self, key: PropKey, value: Value, flags: PropFlags) -> Result<(), JSError> {
        if let Some(i) = self.find(&key) {
            let existing = &self.props[i];
            if existing.flags.contains(PropFlags::CONST) {
                return Err(JSError::type_error(format!("Assignment to constant property {:?}", existing.key)));
            }
            if existing.flags.contains(PropFlags::NONCONFIG) && existing.flags != flags {
                return Err(JSError::type_error("Cannot redefine non-configurable property"));
            }
            self.props[i].value = value;
            self.props[i].flags = flags;
            return Ok(());
        }
        if !self.extensible {
            return Err(JSError::type_error("Cannot add property, object is not extensible"));
        }
        self.props.push(PropRecord { key: key.clone(), value, flags });
        if let Some(map) = &mut self.index {
            map.insert(key, self.props.len() - 1);
        } else {
            self.maybe_build_index();
        }
        Ok(())
    }

    pub fn set_named(&mut self, name: &str, value: Value) -> Result<(), JSError> {
        self.define(PropKey::Named(name.to_string()), value, PropFlags::EMPTY)
    }

    pub fn delete(&mut self, key: &PropKey) -> bool {
        if let Some(i) = self.find(key) {
            if self.props[i].flags.contains(PropFlags::NONCONFIG) {
                return false;
            }
            self.props.remove(i);
            self.index = None;
            self.maybe_build_index();
            true
        } else {
            false
        }
    }

    /// Own enumerable string keys, in insertion order, excluding internal
    /// slots (`for-in` / `Object.keys` semantics — §4.G).
    pub fn own_enumerable_keys(&self) -> Vec<String> {
        self.props
            .iter()
            .filter_map(|p| match &p.key {
                PropKey::Named(n) => Some(n.clone()),
                PropKey::Slot(_) => None,
            })
            .collect()
    }

    pub fn freeze(&mut self) {
        self.extensible = false;
        for p in &mut self.props {
            p.flags.insert(PropFlags::CONST | PropFlags::NONCONFIG);
        }
    }

    pub fn seal(&mut self) {
        self.extensible = false;
        for p in &mut self.props {
            p.flags.insert(PropFlags::NONCONFIG);
        }
    }

    /// Number of own properties, for GC root-walks that need positional
    /// (rather than by-key) access into the property chain.
    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    pub fn prop_value_at(&self, i: usize) -> Value {
        self.props[i].value
    }

    /// GC-only: overwrite a property's value in place by position,
    /// bypassing the `CONST`/`NONCONFIG` checks `define` enforces — this
    /// never changes which slot holds a value, only relocates its bits.
    pub fn set_prop_value_at(&mut self, i: usize, v: Value) {
        self.props[i].value = v;
    }

    /// Roots reachable from this object's own storage, for the GC's
    /// reserve/update phases (§4.E): property values, the prototype link,
    /// and array elements.
    pub fn trace(&self, mut visit: impl FnMut(Value)) {
        for p in &self.props {
            visit(p.value);
        }
        for e in &self.elements {
            visit(*e);
        }
    }
}

/// Walk the prototype chain looking up `key`, iteratively (no recursion,
/// so a cyclic chain — which [`set_proto`] prevents, but defence in depth
/// matters here too — can't blow the Rust stack).
pub fn lookup_chain(arena_objects: &impl Fn(Offset) -> *const ObjectData, start: Offset, key: &PropKey) -> Option<Value> {
    let mut cur = Some(start);
    let mut steps = 0usize;
    while let Some(off) = cur {
        steps += 1;
        if steps > 100_000 {
            return None;
        }
        let obj = unsafe { &*arena_objects(off) };
        if let Some(v) = obj.get_own(key) {
            return Some(v);
        }
        cur = obj.proto;
    }
    None
}

/// Attempt to install `new_proto` as `obj`'s prototype, rejecting the
/// change if it would introduce a cycle.
pub fn set_proto(arena_objects: &impl Fn(Offset) -> *const ObjectData, obj: Offset, new_proto: Option<Offset>) -> Result<(), JSError> {
    let mut cur = new_proto;
    let mut steps = 0usize;
    while let Some(off) = cur {
        if off == obj {
            return Err(JSError::type_error("Cyclic __proto__ value"));
        }
        steps += 1;
        if steps > 100_000 {
            return Err(JSError::range_error("Prototype chain too long"));
        }
        cur = unsafe { &*arena_objects(off) }.proto;
    }
    Ok(())
}

/// Wrapper used by [`Tag::Object`]/[`Tag::Array`] values to construct a
/// `Value` pointing at an `ObjectData` kept in a side table (the arena
/// stores raw bytes; live Rust objects with `Vec`/`HashMap` fields live
/// in a heap side-table keyed by offset, same split the teacher's
/// `gc-arena`-based design used, now scoped to just this module).
pub fn value_for(tag: Tag, offset: Offset) -> Value {
    Value::make(tag, offset as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_get_round_trip() {
        let mut o = ObjectData::new(None);
        o.set_named("x", Value::number(1.0)).unwrap();
        assert_eq!(o.get_own(&PropKey::Named("x".into())), Some(Value::number(1.0)));
    }

    #[test]
    fn const_property_rejects_overwrite() {
        let mut o = ObjectData::new(None);
        o.define(PropKey::Named("x".into()), Value::number(1.0), PropFlags::CONST).unwrap();
        let err = o.set_named("x", Value::number(2.0)).unwrap_err();
        assert!(matches!(err, JSError::Evaluation { .. }));
    }

    #[test]
    fn hash_index_builds_above_threshold_and_stays_correct() {
        let mut o = ObjectData::new(None);
        for i in 0..(HASH_UPGRADE_THRESHOLD + 5) {
            o.set_named(&format!("k{i}"), Value::number(i as f64)).unwrap();
        }
        assert!(o.index.is_some());
        for i in 0..(HASH_UPGRADE_THRESHOLD + 5) {
            assert_eq!(o.get_own(&PropKey::Named(format!("k{i}"))), Some(Value::number(i as f64)));
        }
    }

    #[test]
    fn frozen_object_rejects_new_and_existing_writes() {
        let mut o = ObjectData::new(None);
        o.set_named("x", Value::number(1.0)).unwrap();
        o.freeze();
        assert!(o.set_named("x", Value::number(2.0)).is_err());
        assert!(o.define(PropKey::Named("y".into()), Value::number(1.0), PropFlags::EMPTY).is_err());
    }

    #[test]
    fn enumerable_keys_exclude_internal_slots() {
        let mut o = ObjectData::new(None);
        o.set_named("visible", Value::number(1.0)).unwrap();
        o.define(PropKey::Slot(InternalSlot::Scope), Value::number(2.0), PropFlags::EMPTY).unwrap();
        assert_eq!(o.own_enumerable_keys(), vec!["visible".to_string()]);
    }
}
